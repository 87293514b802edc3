//! Core types for RemoteCam
//!
//! These types describe camera hardware, negotiated capture parameters and
//! the transient frames moving through the capture pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::formats::PixelFormat;

/// Global handle counter for unique session IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Which way a sensor points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Front => write!(f, "Front"),
            LensFacing::Back => write!(f, "Back"),
            LensFacing::External => write!(f, "External"),
        }
    }
}

/// A camera available on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Opaque backend id (e.g. "0", "/dev/video2")
    pub camera_id: String,
    /// Human-readable name
    pub title: String,
    /// Lens direction
    pub facing: LensFacing,
    /// Clockwise rotation in degrees needed to make the sensor image upright
    pub orientation: u32,
}

impl SensorDescriptor {
    /// Create a new descriptor
    pub fn new(camera_id: impl Into<String>, title: impl Into<String>, facing: LensFacing) -> Self {
        Self {
            camera_id: camera_id.into(),
            title: title.into(),
            facing,
            orientation: 0,
        }
    }

    /// Set the sensor orientation
    pub fn with_orientation(mut self, orientation: u32) -> Self {
        self.orientation = orientation % 360;
        self
    }

    /// Placeholder reported when no camera is present
    pub fn unavailable() -> Self {
        Self::new("", "No camera available", LensFacing::External)
    }
}

/// Output resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Target frame rate range reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub lower: u32,
    pub upper: u32,
}

impl FpsRange {
    pub const fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }

    /// Range with lower == upper
    pub const fn fixed(fps: u32) -> Self {
        Self::new(fps, fps)
    }

    /// A fixed range disables auto-exposure frame rate variation
    pub fn is_fixed(&self) -> bool {
        self.lower == self.upper
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fixed() {
            write!(f, "{}fps", self.upper)
        } else {
            write!(f, "{}-{}fps", self.lower, self.upper)
        }
    }
}

/// Static description of what a sensor can produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorCharacteristics {
    /// Sizes per output format, in hardware order
    pub output_sizes: Vec<(PixelFormat, Vec<Resolution>)>,
    /// Supported target fps ranges
    pub fps_ranges: Vec<FpsRange>,
    /// Clockwise degrees to upright
    pub orientation: u32,
    /// Whether continuous-picture autofocus is available
    pub continuous_autofocus: bool,
}

impl SensorCharacteristics {
    /// Sizes the sensor offers in `format`
    pub fn sizes_for(&self, format: PixelFormat) -> &[Resolution] {
        self.output_sizes
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, sizes)| sizes.as_slice())
            .unwrap_or(&[])
    }
}

/// One plane of a raw frame
///
/// `row_stride` is the distance in bytes between the starts of two rows and
/// `pixel_stride` the distance between two samples of the same row.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// Sample at (`col`, `row`), if inside the buffer
    #[inline]
    pub fn sample(&self, col: usize, row: usize) -> Option<u8> {
        self.data
            .get(row * self.row_stride + col * self.pixel_stride)
            .copied()
    }
}

/// A frame as delivered by the camera
///
/// Compressed frames carry the encoded image in a single plane. Planar
/// 4:2:0 frames carry Y, U and V planes in that order.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    /// Sensor timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl RawFrame {
    /// Wrap an already-compressed image
    pub fn compressed(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len();
        Self {
            width,
            height,
            format: PixelFormat::Jpeg,
            planes: vec![Plane::new(data, len, 1)],
            timestamp_ns: 0,
        }
    }

    /// Build a planar 4:2:0 frame from Y, U and V planes
    pub fn planar(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Yuv420,
            planes: vec![y, u, v],
            timestamp_ns: 0,
        }
    }

    /// Set the sensor timestamp
    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Zero-sized frames are never processed
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.planes.is_empty()
    }
}

/// Notification that the hardware finished one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCompletion {
    /// Hardware sequence number
    pub sequence: u64,
    /// Sensor timestamp in nanoseconds
    pub timestamp_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_unique() {
        let a = Handle::new();
        let b = Handle::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_fps_range_fixed() {
        assert!(FpsRange::fixed(30).is_fixed());
        assert!(!FpsRange::new(15, 30).is_fixed());
        assert_eq!(FpsRange::new(15, 30).to_string(), "15-30fps");
    }

    #[test]
    fn test_plane_sample_honors_strides() {
        // two rows of 3 samples, pixel stride 2, padded rows of 8 bytes
        let data = vec![1, 0, 2, 0, 3, 0, 9, 9, 4, 0, 5, 0, 6, 0, 9, 9];
        let plane = Plane::new(data, 8, 2);
        assert_eq!(plane.sample(0, 0), Some(1));
        assert_eq!(plane.sample(2, 0), Some(3));
        assert_eq!(plane.sample(1, 1), Some(5));
        assert_eq!(plane.sample(4, 1), None);
    }

    #[test]
    fn test_characteristics_sizes_for() {
        let chars = SensorCharacteristics {
            output_sizes: vec![(PixelFormat::Yuv420, vec![Resolution::new(640, 480)])],
            ..Default::default()
        };
        assert_eq!(chars.sizes_for(PixelFormat::Yuv420).len(), 1);
        assert!(chars.sizes_for(PixelFormat::Jpeg).is_empty());
    }
}
