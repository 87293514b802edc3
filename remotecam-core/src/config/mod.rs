//! Configuration types for RemoteCam
//!
//! Provides the shared view state, the fps buckets offered to users and the
//! per-restart capture configuration derived from them.

mod file;
mod state;

pub use file::{
    sample_config, CaptureSettings, ConfigFile, CredentialSettings, ServerSettings, StreamSettings,
    DEFAULT_PORT,
};
pub use state::StateFile;

use serde::{Deserialize, Serialize};

use crate::encode::{RateController, RatePlan};
use crate::error::{RemoteCamError, Result};
use crate::formats::{self, NegotiationSource, PixelFormat};
use crate::types::{FpsRange, Resolution, SensorCharacteristics, SensorDescriptor};

/// Effective frame rates a user can pick, highest first
pub const FPS_BUCKETS: [u32; 6] = [30, 15, 10, 5, 2, 1];

/// Default JPEG quality
pub const DEFAULT_QUALITY: u8 = 80;

/// The fps buckets as fixed ranges, in bucket order
pub fn fps_bucket_ranges() -> Vec<FpsRange> {
    FPS_BUCKETS.iter().map(|&fps| FpsRange::fixed(fps)).collect()
}

/// Clamp an optional index into `0..len`; absent or out of range gives 0
pub fn clamp_index(index: Option<usize>, len: usize) -> usize {
    match index {
        Some(i) if i < len => i,
        _ => 0,
    }
}

/// Display rotation relative to the device's natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> std::result::Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(format!("Invalid rotation {}: must be 0, 90, 180 or 270", other)),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// User-selected capture and output settings
///
/// Written by the control layer, read by the capture worker at the start
/// of every restart and, for `quality`, on every kept frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    /// Render frames to the preview surface
    pub preview: bool,
    /// Publish frames to network clients
    pub stream: bool,
    /// Selected camera
    pub camera_id: String,
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Index into the negotiated resolution list
    pub resolution_index: Option<usize>,
    /// Index into [`FPS_BUCKETS`]
    pub fps_index: Option<usize>,
    /// Current display rotation
    pub rotation: Rotation,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            preview: true,
            stream: false,
            camera_id: "0".to_string(),
            quality: DEFAULT_QUALITY,
            resolution_index: None,
            fps_index: None,
            rotation: Rotation::Deg0,
        }
    }
}

impl ViewState {
    /// Select a camera
    pub fn with_camera(mut self, camera_id: impl Into<String>) -> Self {
        self.camera_id = camera_id.into();
        self
    }

    /// Set JPEG quality
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Enable or disable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Enable or disable preview
    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    /// Pick a resolution index
    pub fn with_resolution_index(mut self, index: usize) -> Self {
        self.resolution_index = Some(index);
        self
    }

    /// Pick an fps bucket index
    pub fn with_fps_index(mut self, index: usize) -> Self {
        self.fps_index = Some(index);
        self
    }

    /// Set display rotation
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Quality clamped to the encoder's 1-100 range
    pub fn effective_quality(&self) -> u8 {
        self.quality.clamp(1, 100)
    }

    /// Whether moving from `self` to `next` needs a capture restart
    ///
    /// Quality only matters when the hardware produces the JPEG itself,
    /// since it is then baked into the repeating request. Preview and
    /// stream toggles only gate the fan-out.
    pub fn restart_required(&self, next: &ViewState, compressed_output: bool) -> bool {
        self.camera_id != next.camera_id
            || self.resolution_index != next.resolution_index
            || self.fps_index != next.fps_index
            || self.rotation != next.rotation
            || (compressed_output && self.effective_quality() != next.effective_quality())
    }

    /// Check the state can drive a capture
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(RemoteCamError::capability("No camera selected"));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(RemoteCamError::config(format!(
                "Quality must be between 1 and 100 (got {})",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Parameters of one capture run, rebuilt on every restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    /// Camera being captured
    pub camera_id: String,
    /// Chosen output size
    pub resolution: Resolution,
    /// Clamped index into `available_resolutions`
    pub resolution_index: usize,
    /// Negotiated sizes, largest first
    pub available_resolutions: Vec<Resolution>,
    /// Output layout requested from the hardware
    pub pixel_format: PixelFormat,
    /// How the format was chosen
    pub negotiation: NegotiationSource,
    /// User-selected rate
    pub effective_fps: u32,
    /// Clamped index into [`FPS_BUCKETS`]
    pub fps_index: usize,
    /// Hardware rate and skip ratio
    pub rate: RatePlan,
    /// Sensor orientation in degrees
    pub sensor_orientation: u32,
    /// Continuous-picture autofocus is available
    pub continuous_autofocus: bool,
}

impl CaptureConfiguration {
    /// Derive a configuration from the view state and sensor capabilities
    ///
    /// Missing characteristics fall back to conservative defaults.
    pub fn resolve(
        view: &ViewState,
        sensor: &SensorDescriptor,
        characteristics: Option<&SensorCharacteristics>,
    ) -> Self {
        let negotiation = formats::negotiate_output(characteristics);
        let hardware_fps = formats::hardware_fixed_fps(characteristics);

        let resolution_index = clamp_index(view.resolution_index, negotiation.sizes.len());
        let fps_index = clamp_index(view.fps_index, FPS_BUCKETS.len());
        let effective_fps = FPS_BUCKETS[fps_index];

        Self {
            camera_id: sensor.camera_id.clone(),
            resolution: negotiation.sizes[resolution_index],
            resolution_index,
            available_resolutions: negotiation.sizes,
            pixel_format: negotiation.format,
            negotiation: negotiation.source,
            effective_fps,
            fps_index,
            rate: RateController::select(effective_fps, &hardware_fps),
            sensor_orientation: characteristics
                .map(|c| c.orientation)
                .unwrap_or(sensor.orientation),
            continuous_autofocus: characteristics
                .map(|c| c.continuous_autofocus)
                .unwrap_or(false),
        }
    }

    /// Whether frames arrive already compressed
    pub fn is_compressed(&self) -> bool {
        self.pixel_format.is_compressed()
    }
}
