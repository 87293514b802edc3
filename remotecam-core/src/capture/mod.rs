//! Camera capture
//!
//! This module handles:
//! - Camera backends (enumeration, characteristics, device/session access)
//! - The latest-only frame reader shared with the hardware
//! - The capture session state machine driving the per-frame pipeline
//!
//! Device open and session creation are asynchronous acquisitions: the
//! backend returns a oneshot receiver immediately and fulfils it later,
//! from whatever thread its driver calls back on.

mod reader;
pub mod session;
pub mod synthetic;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;

pub use reader::{FrameReader, MAX_IMAGES};
pub use session::{CaptureSession, SessionCounters, SessionOptions, SessionState};
pub use synthetic::{SyntheticBackend, SyntheticFeed, SyntheticSensor};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::CaptureConfiguration;
use crate::error::{RemoteCamError, Result};
use crate::formats::PixelFormat;
use crate::types::{
    CaptureCompletion, FpsRange, Resolution, SensorCharacteristics, SensorDescriptor,
};

/// Pending result of an asynchronous acquisition
pub type Acquisition<T> = oneshot::Receiver<Result<T>>;

/// Create the two ends of an acquisition
pub fn acquisition<T>() -> (oneshot::Sender<Result<T>>, Acquisition<T>) {
    oneshot::channel()
}

/// An acquisition that has already resolved
pub fn ready<T>(result: Result<T>) -> Acquisition<T> {
    let (tx, rx) = acquisition();
    let _ = tx.send(result);
    rx
}

/// Repeating capture parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Output size
    pub resolution: Resolution,
    /// Output layout
    pub format: PixelFormat,
    /// JPEG quality for hardware-compressed output
    pub quality: u8,
    /// Rotation tag written into hardware-compressed output
    pub jpeg_orientation: Option<u32>,
    /// Fixed target frame rate
    pub target_fps: FpsRange,
    /// Enable continuous-picture autofocus
    pub continuous_autofocus: bool,
}

impl CaptureRequest {
    /// Build the repeating request for a configuration
    pub fn for_configuration(config: &CaptureConfiguration, quality: u8) -> Self {
        Self {
            resolution: config.resolution,
            format: config.pixel_format,
            quality,
            jpeg_orientation: config.is_compressed().then_some(config.sensor_orientation),
            target_fps: FpsRange::fixed(config.rate.hardware_fps),
            continuous_autofocus: config.continuous_autofocus,
        }
    }
}

/// Source of cameras
pub trait CameraBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// List the cameras currently present
    fn enumerate(&self) -> Result<Vec<SensorDescriptor>>;

    /// Static capabilities of one camera
    fn characteristics(&self, camera_id: &str) -> Result<SensorCharacteristics>;

    /// Start opening a camera for exclusive use
    fn open_device(&self, camera_id: &str) -> Acquisition<Box<dyn CameraDevice>>;
}

/// An opened camera
pub trait CameraDevice: Send {
    /// Id this device was opened with
    fn camera_id(&self) -> &str;

    /// Start creating a capture session that writes into `output`
    fn create_session(&mut self, output: FrameReader) -> Acquisition<Box<dyn DeviceSession>>;

    /// Release the camera
    fn close(&mut self);
}

/// A configured capture session on an opened camera
pub trait DeviceSession: Send {
    /// Start delivering frames into the session's reader
    ///
    /// One completion is sent per delivered frame. Dropping `completions`
    /// signals that the device went away.
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        completions: mpsc::Sender<CaptureCompletion>,
    ) -> Result<()>;

    /// Stop frame delivery; no completions are sent afterwards
    fn stop_repeating(&mut self);

    /// Release the session
    fn close(&mut self);
}

/// Available backend names
pub fn backend_names() -> Vec<&'static str> {
    if cfg!(all(target_os = "linux", feature = "v4l2")) {
        vec!["synthetic", "v4l2"]
    } else {
        vec!["synthetic"]
    }
}

/// Create a backend by name
pub fn create_backend(name: &str) -> Result<Arc<dyn CameraBackend>> {
    match name.to_lowercase().as_str() {
        "synthetic" => Ok(Arc::new(SyntheticBackend::with_default_sensors())),
        #[cfg(all(target_os = "linux", feature = "v4l2"))]
        "v4l2" => Ok(Arc::new(v4l2::V4l2Backend::new())),
        other => Err(RemoteCamError::Unsupported(format!(
            "camera backend '{}' (available: {})",
            other,
            backend_names().join(", ")
        ))),
    }
}

/// A sensor with its negotiated capture options
#[derive(Debug, Clone)]
pub struct SensorInfo {
    pub descriptor: SensorDescriptor,
    pub characteristics: Option<SensorCharacteristics>,
}

/// List cameras with their characteristics
///
/// Cameras whose characteristics cannot be read are still listed.
pub fn list_sensors(backend: &dyn CameraBackend) -> Result<Vec<SensorInfo>> {
    let sensors = backend.enumerate()?;
    Ok(sensors
        .into_iter()
        .map(|descriptor| {
            let characteristics = backend.characteristics(&descriptor.camera_id).ok();
            SensorInfo {
                descriptor,
                characteristics,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend() {
        assert!(create_backend("synthetic").is_ok());
        assert!(create_backend("Synthetic").is_ok());
        assert!(matches!(
            create_backend("nope"),
            Err(RemoteCamError::Unsupported(_))
        ));
    }

    #[test]
    fn test_every_listed_backend_can_be_created() {
        let names = backend_names();
        assert_eq!(names[0], "synthetic");
        assert_eq!(names.contains(&"v4l2"), cfg!(all(target_os = "linux", feature = "v4l2")));
        for name in names {
            assert!(create_backend(name).is_ok(), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_ready_acquisition() {
        let rx = ready(Ok(7u32));
        assert_eq!(rx.await.unwrap().unwrap(), 7);
    }

    #[test]
    fn test_list_sensors() {
        let backend = SyntheticBackend::with_default_sensors();
        let sensors = list_sensors(&backend).unwrap();
        assert_eq!(sensors.len(), 2);
        assert!(sensors.iter().all(|s| s.characteristics.is_some()));
    }
}
