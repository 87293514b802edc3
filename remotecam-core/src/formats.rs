//! Pixel format constants and capability negotiation
//!
//! Centralizes fourcc handling and the ordered choice of output format,
//! sizes and fixed frame rates for a sensor.

use serde::{Deserialize, Serialize};

use crate::types::{Resolution, SensorCharacteristics};

/// V4L2 fourcc constants
///
/// See: <https://www.kernel.org/doc/html/latest/userspace-api/media/v4l/pixfmt.html>
pub mod fourcc {
    /// Motion-JPEG, one JPEG image per buffer
    pub const MJPG: u32 = u32::from_le_bytes(*b"MJPG");
    /// JPEG
    pub const JPEG: u32 = u32::from_le_bytes(*b"JPEG");
    /// YUV 4:2:0 fully planar (I420)
    pub const YU12: u32 = u32::from_le_bytes(*b"YU12");
    /// YUV 4:2:0 semi-planar, UV interleaved
    pub const NV12: u32 = u32::from_le_bytes(*b"NV12");
    /// YUV 4:2:0 semi-planar, VU interleaved
    pub const NV21: u32 = u32::from_le_bytes(*b"NV21");
    /// YUV 4:2:2 packed
    pub const YUYV: u32 = u32::from_le_bytes(*b"YUYV");
}

/// Sizes offered when the sensor reports neither compressed nor planar output
pub const FALLBACK_SIZES: [Resolution; 2] = [Resolution::new(1280, 720), Resolution::new(640, 480)];

/// Size used when nothing else is known
pub const PLACEHOLDER_SIZE: Resolution = Resolution::new(640, 480);

/// Hardware rate assumed when the sensor reports no fixed range
pub const DEFAULT_HARDWARE_FPS: u32 = 30;

/// Frame layout as seen by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Already-compressed JPEG
    Jpeg,
    /// Planar or semi-planar 4:2:0 with arbitrary strides
    Yuv420,
    /// Anything else, by fourcc
    Unsupported(u32),
}

impl PixelFormat {
    /// Map a V4L2 fourcc to the pipeline layout
    ///
    /// YUYV is 4:2:2 but is exposed as a strided 4:2:0 view by skipping
    /// every other chroma row.
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            fourcc::MJPG | fourcc::JPEG => Self::Jpeg,
            fourcc::YU12 | fourcc::NV12 | fourcc::NV21 | fourcc::YUYV => Self::Yuv420,
            other => Self::Unsupported(other),
        }
    }

    /// Whether frames in this format are already compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg => write!(f, "JPEG"),
            Self::Yuv420 => write!(f, "YUV420"),
            Self::Unsupported(code) => write!(f, "{}", fourcc_to_string(*code)),
        }
    }
}

/// Render a fourcc as its four ASCII characters
pub fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Where the negotiated output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationSource {
    /// Sensor offers compressed output
    Compressed,
    /// Sensor offers planar 4:2:0 output
    Planar,
    /// Sensor offers neither, or characteristics were unreadable
    Fallback,
    /// Nothing usable at all
    Placeholder,
}

/// Chosen output format and size list for a sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNegotiation {
    pub format: PixelFormat,
    /// Largest first
    pub sizes: Vec<Resolution>,
    pub source: NegotiationSource,
}

/// Pick output format and sizes: compressed, else planar, else fallback
///
/// Hardware lists are ordered smallest first, so both are reversed.
pub fn negotiate_output(characteristics: Option<&SensorCharacteristics>) -> OutputNegotiation {
    let Some(chars) = characteristics else {
        return OutputNegotiation {
            format: PixelFormat::Yuv420,
            sizes: FALLBACK_SIZES.to_vec(),
            source: NegotiationSource::Fallback,
        };
    };

    let (format, mut sizes, source) = if !chars.sizes_for(PixelFormat::Jpeg).is_empty() {
        (
            PixelFormat::Jpeg,
            chars.sizes_for(PixelFormat::Jpeg).to_vec(),
            NegotiationSource::Compressed,
        )
    } else if !chars.sizes_for(PixelFormat::Yuv420).is_empty() {
        (
            PixelFormat::Yuv420,
            chars.sizes_for(PixelFormat::Yuv420).to_vec(),
            NegotiationSource::Planar,
        )
    } else {
        (
            PixelFormat::Yuv420,
            FALLBACK_SIZES.to_vec(),
            NegotiationSource::Fallback,
        )
    };

    if source != NegotiationSource::Fallback {
        sizes.reverse();
    }
    sizes.retain(|s| s.area() > 0);

    if sizes.is_empty() {
        return OutputNegotiation {
            format,
            sizes: vec![PLACEHOLDER_SIZE],
            source: NegotiationSource::Placeholder,
        };
    }

    OutputNegotiation {
        format,
        sizes,
        source,
    }
}

/// Fixed (lower == upper) hardware rates, distinct, highest first
pub fn hardware_fixed_fps(characteristics: Option<&SensorCharacteristics>) -> Vec<u32> {
    let mut rates: Vec<u32> = characteristics
        .map(|c| {
            c.fps_ranges
                .iter()
                .filter(|r| r.is_fixed() && r.upper > 0)
                .map(|r| r.upper)
                .collect()
        })
        .unwrap_or_default();

    rates.sort_unstable_by(|a, b| b.cmp(a));
    rates.dedup();

    if rates.is_empty() {
        rates.push(DEFAULT_HARDWARE_FPS);
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FpsRange;

    fn chars(sizes: Vec<(PixelFormat, Vec<Resolution>)>) -> SensorCharacteristics {
        SensorCharacteristics {
            output_sizes: sizes,
            ..Default::default()
        }
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(fourcc::MJPG), PixelFormat::Jpeg);
        assert_eq!(PixelFormat::from_fourcc(fourcc::NV12), PixelFormat::Yuv420);
        assert_eq!(PixelFormat::from_fourcc(fourcc::YUYV), PixelFormat::Yuv420);
        let rgb = u32::from_le_bytes(*b"RGB3");
        assert_eq!(PixelFormat::from_fourcc(rgb), PixelFormat::Unsupported(rgb));
        assert_eq!(fourcc_to_string(rgb), "RGB3");
    }

    #[test]
    fn test_prefers_compressed() {
        let c = chars(vec![
            (PixelFormat::Yuv420, vec![Resolution::new(320, 240)]),
            (
                PixelFormat::Jpeg,
                vec![Resolution::new(640, 480), Resolution::new(1920, 1080)],
            ),
        ]);
        let n = negotiate_output(Some(&c));
        assert_eq!(n.format, PixelFormat::Jpeg);
        assert_eq!(n.source, NegotiationSource::Compressed);
        assert_eq!(n.sizes[0], Resolution::new(1920, 1080));
    }

    #[test]
    fn test_planar_when_no_compressed() {
        let c = chars(vec![(
            PixelFormat::Yuv420,
            vec![Resolution::new(320, 240), Resolution::new(640, 480)],
        )]);
        let n = negotiate_output(Some(&c));
        assert_eq!(n.format, PixelFormat::Yuv420);
        assert_eq!(n.sizes, vec![Resolution::new(640, 480), Resolution::new(320, 240)]);
    }

    #[test]
    fn test_fallback_and_placeholder() {
        let n = negotiate_output(Some(&chars(vec![])));
        assert_eq!(n.source, NegotiationSource::Fallback);
        assert_eq!(n.sizes, FALLBACK_SIZES.to_vec());

        let n = negotiate_output(None);
        assert_eq!(n.source, NegotiationSource::Fallback);

        let c = chars(vec![(PixelFormat::Jpeg, vec![Resolution::new(0, 0)])]);
        let n = negotiate_output(Some(&c));
        assert_eq!(n.source, NegotiationSource::Placeholder);
        assert_eq!(n.sizes, vec![PLACEHOLDER_SIZE]);
    }

    #[test]
    fn test_hardware_fixed_fps() {
        let c = SensorCharacteristics {
            fps_ranges: vec![
                FpsRange::new(15, 30),
                FpsRange::fixed(15),
                FpsRange::fixed(30),
                FpsRange::fixed(30),
            ],
            ..Default::default()
        };
        assert_eq!(hardware_fixed_fps(Some(&c)), vec![30, 15]);
        assert_eq!(hardware_fixed_fps(None), vec![DEFAULT_HARDWARE_FPS]);

        let variable_only = SensorCharacteristics {
            fps_ranges: vec![FpsRange::new(7, 30)],
            ..Default::default()
        };
        assert_eq!(hardware_fixed_fps(Some(&variable_only)), vec![30]);
    }
}
