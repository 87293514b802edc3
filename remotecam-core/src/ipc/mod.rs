//! IPC (Inter-Process Communication) for daemon mode
//!
//! Provides Unix socket-based communication between a running
//! `remotecam serve` and CLI commands like `stop`, `status`, `set` and
//! `passwd`. Password changes are only reachable through this socket.

mod client;
mod protocol;
mod server;

pub use client::IpcClient;
pub use protocol::{IpcMessage, IpcResponse, PipelineStatus};
pub use server::IpcServer;

use std::path::{Path, PathBuf};

/// Get the IPC socket path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("remotecam.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/remotecam-{}.sock", uid))
    }
}

/// Check if a daemon is answering on the default socket
pub async fn daemon_running() -> bool {
    daemon_running_at(&socket_path()).await
}

/// Check if a daemon is answering on `path`
pub async fn daemon_running_at(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    match IpcClient::connect_to(path).await {
        Ok(mut client) => matches!(client.ping().await, Ok(true)),
        Err(_) => false,
    }
}
