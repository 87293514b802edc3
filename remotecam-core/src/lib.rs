//! RemoteCam Core Library
//!
//! Turns a local camera into an authenticated MJPEG stream over HTTP.
//!
//! This library provides:
//! - Camera enumeration and capability negotiation (V4L2 or synthetic)
//! - A capture session that decimates the hardware rate to a chosen fps
//! - JPEG encoding from strided planar 4:2:0 frames
//! - A single-token password gate and a multipart MJPEG server
//! - An optional local preview surface
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐    ┌───────────────┐    ┌────────────────┐    ┌───────────────┐
//! │ Camera Backend │───▶│ FrameReader   │───▶│ CaptureSession │───▶│ StreamChannel │
//! │ (V4L2/synth)   │    │ (latest-only) │    │ (gate + JPEG)  │    │ (per client)  │
//! └────────────────┘    └───────────────┘    └────────┬───────┘    └───────┬───────┘
//!                                                     │                    │
//!                                                     ▼                    ▼
//!                                              preview surface       HTTP /stream
//! ```

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod events;
pub mod formats;
pub mod ipc;
pub mod output;
pub mod performance;
pub mod pipeline;
pub mod preview;
pub mod types;

pub use capture::{create_backend, CameraBackend, CaptureSession, SessionCounters, SessionState};
pub use config::{CaptureConfiguration, ConfigFile, Rotation, StateFile, ViewState};
pub use error::{RemoteCamError, Result};
pub use events::{EngineEvent, StatusUpdate};
pub use output::{AccessControl, CredentialStore, StreamChannel, StreamServer, TokenPolicy};
pub use pipeline::{Pipeline, PipelineOptions, PipelineStats};
pub use preview::{ImageSurface, PresentationSurface, PreviewTarget};
pub use types::{Handle, LensFacing, RawFrame, Resolution, SensorDescriptor};
