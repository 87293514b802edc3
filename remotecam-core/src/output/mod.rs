//! Frame delivery
//!
//! Provides:
//! - The bounded fan-out channel between capture and network writers
//! - Password and stream-token access control
//! - The MJPEG HTTP server

pub mod auth;
mod channel;
pub mod mjpeg;

pub use auth::{AccessControl, CredentialStore, PasswordHash, TokenPolicy, DEFAULT_PASSWORD};
pub use channel::{ChannelStats, FrameReceiver, StreamChannel, DEFAULT_CAPACITY};
pub use mjpeg::{router, ServerState, StreamServer, BOUNDARY};
