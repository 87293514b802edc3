//! IPC protocol definitions
//!
//! Newline-delimited JSON, one request and one response per line.

use serde::{Deserialize, Serialize};

use crate::capture::SessionState;
use crate::config::ViewState;
use crate::events::StatusUpdate;
use crate::pipeline::PipelineStats;
use crate::types::Resolution;

/// Messages that can be sent to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Check if daemon is alive
    Ping,
    /// Request current status
    Status,
    /// Request pipeline statistics
    Stats,
    /// Re-enumerate cameras and return the resulting status update
    RequestStatus,
    /// Read the current view state
    GetViewState,
    /// Replace the view state
    SetViewState { state: ViewState },
    /// Change the stream password
    ChangePassword { password: String },
    /// Stop the daemon gracefully
    Stop,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Simple acknowledgment
    Ok,
    /// Pong response to ping
    Pong,
    /// Error response
    Error { message: String },
    /// Status response
    Status(PipelineStatus),
    /// Statistics response
    Stats(PipelineStats),
    /// Capability and selection snapshot
    Capabilities(StatusUpdate),
    /// Current view state
    ViewState { state: ViewState },
    /// Shutdown acknowledgment
    Stopping,
}

/// Current daemon status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Is the pipeline running
    pub running: bool,
    /// Capture session state
    pub state: SessionState,
    /// Selected camera id
    pub camera_id: String,
    /// Selected camera name, if present
    pub camera_title: Option<String>,
    /// Capture resolution
    pub resolution: Option<Resolution>,
    /// Effective frame rate
    pub fps: Option<u32>,
    /// Login page URL
    pub url: String,
    /// Open stream connections
    pub clients: usize,
    /// Last fault
    pub error: Option<String>,
    /// Process ID
    pub pid: u32,
    /// Uptime in seconds
    pub uptime_seconds: f64,
}

impl IpcMessage {
    /// Serialize message to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl IpcResponse {
    /// Serialize response to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize response from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}
