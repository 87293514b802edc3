//! Engine events pushed to the control layer
//!
//! Observers subscribe to a `tokio::sync::broadcast` channel. A lagging
//! observer loses old events rather than slowing the capture worker.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::capture::SessionState;
use crate::performance::QuickStats;
use crate::types::{Resolution, SensorDescriptor};

/// Default event bus depth
pub const EVENT_CAPACITY: usize = 64;

/// Capability and selection snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Session state when the update was built
    pub state: SessionState,
    /// Cameras currently present
    pub sensors: Vec<SensorDescriptor>,
    /// Selected camera, or the "no camera" placeholder
    pub selected: SensorDescriptor,
    /// Orientation of the selected sensor
    pub sensor_orientation: u32,
    /// Negotiated resolutions, largest first
    pub resolutions: Vec<Resolution>,
    /// Selected index into `resolutions`
    pub resolution_index: usize,
    /// Offered effective frame rates
    pub fps_buckets: Vec<u32>,
    /// Selected index into `fps_buckets`
    pub fps_index: usize,
    /// Last fault, if the session is not capturing because of one
    pub error: Option<String>,
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.state, self.selected.title)?;
        if let Some(res) = self.resolutions.get(self.resolution_index) {
            write!(f, " {}", res)?;
        }
        if let Some(fps) = self.fps_buckets.get(self.fps_index) {
            write!(f, " @ {}fps", fps)?;
        }
        if let Some(err) = &self.error {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}

/// Something the engine wants observers to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// Capabilities or selection changed
    Status(StatusUpdate),
    /// Periodic latency and throughput
    Quick(QuickStats),
    /// Session moved to a new state
    StateChanged { state: SessionState },
    /// Non-fatal failure
    Fault { message: String },
}

/// Create the engine event bus
pub fn event_bus() -> broadcast::Sender<EngineEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}
