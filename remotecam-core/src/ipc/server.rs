//! IPC server for daemon mode
//!
//! Listens on a Unix socket and handles commands from CLI clients.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::protocol::{IpcMessage, IpcResponse, PipelineStatus};
use super::socket_path;
use crate::error::{RemoteCamError, Result};
use crate::pipeline::Pipeline;

/// How long `accept_one` waits before returning to the caller
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// IPC server that handles client connections
pub struct IpcServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Listener for incoming connections
    listener: Option<UnixListener>,
    /// Pipeline the commands act on
    pipeline: Arc<Pipeline>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a server on the default socket path
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self::with_path(pipeline, socket_path())
    }

    /// Create a server on a specific socket path
    pub fn with_path(pipeline: Arc<Pipeline>, socket_path: PathBuf) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            socket_path,
            listener: None,
            pipeline,
            shutdown_tx,
        }
    }

    /// Start listening for connections
    pub async fn start(&mut self) -> Result<()> {
        // Remove stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                RemoteCamError::Config(format!("Failed to remove old socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RemoteCamError::Config(format!("Failed to create socket directory: {}", e))
                })?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            RemoteCamError::Config(format!(
                "Failed to bind socket at {:?}: {}",
                self.socket_path, e
            ))
        })?;

        // Owner-only: the socket can change the password
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
            warn!("Failed to set socket permissions: {}", e);
            RemoteCamError::Config(format!("Failed to set socket permissions: {}", e))
        })?;

        info!("IPC server listening on {:?}", self.socket_path);
        self.listener = Some(listener);

        Ok(())
    }

    /// Get a receiver for shutdown signals
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Accept and handle one connection
    ///
    /// Returns true if the server should continue, false if it should shut down
    pub async fn accept_one(&self) -> Result<bool> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| RemoteCamError::Config("Server not started".into()))?;

        let stream = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, _addr))) => stream,
            Ok(Err(e)) => {
                error!("Failed to accept connection: {}", e);
                return Ok(true);
            }
            Err(_) => return Ok(true),
        };

        debug!("IPC client connected");
        Ok(self.handle_connection(stream).await)
    }

    /// Serve connections until a client asks to stop
    pub async fn run(&self) -> Result<()> {
        while self.accept_one().await? {}
        Ok(())
    }

    /// Handle a client connection
    ///
    /// Returns true if server should continue, false if it should shut down
    async fn handle_connection(&self, stream: UnixStream) -> bool {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("IPC client disconnected");
                    return true;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match IpcMessage::from_bytes(trimmed.as_bytes()) {
                        Ok(msg) => {
                            let (response, should_stop) = self.handle_message(msg).await;

                            if let Err(e) = writer.write_all(&response.to_bytes()).await {
                                error!("Failed to send IPC response: {}", e);
                                return true;
                            }

                            if should_stop {
                                let _ = self.shutdown_tx.send(());
                                return false;
                            }
                        }
                        Err(e) => {
                            warn!("Invalid IPC message: {}", e);
                            let response = IpcResponse::error(format!("Invalid message: {}", e));
                            let _ = writer.write_all(&response.to_bytes()).await;
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading from IPC client: {}", e);
                    return true;
                }
            }
        }
    }

    /// Handle an IPC message
    ///
    /// Returns (response, should_stop)
    async fn handle_message(&self, msg: IpcMessage) -> (IpcResponse, bool) {
        match msg {
            IpcMessage::Ping => (IpcResponse::Pong, false),
            IpcMessage::Status => (IpcResponse::Status(self.status()), false),
            IpcMessage::Stats => (IpcResponse::Stats(self.pipeline.stats()), false),
            IpcMessage::RequestStatus => {
                let refreshed = match self.pipeline.request_status() {
                    Ok(()) => self.pipeline.session().sync().await,
                    Err(e) => Err(e),
                };
                let response = match refreshed.map(|_| self.pipeline.last_status()) {
                    Ok(Some(status)) => IpcResponse::Capabilities(status),
                    Ok(None) => IpcResponse::error("No status available yet"),
                    Err(e) => IpcResponse::error(e.to_string()),
                };
                (response, false)
            }
            IpcMessage::GetViewState => (
                IpcResponse::ViewState {
                    state: self.pipeline.view_state(),
                },
                false,
            ),
            IpcMessage::SetViewState { state } => {
                info!("View state update via IPC");
                let applied = match self.pipeline.set_view_state(state) {
                    Ok(()) => self.pipeline.session().sync().await,
                    Err(e) => Err(e),
                };
                match applied {
                    Ok(()) => (IpcResponse::Ok, false),
                    Err(e) => (IpcResponse::error(e.to_string()), false),
                }
            }
            IpcMessage::ChangePassword { password } => {
                match self.pipeline.change_password(&password) {
                    Ok(()) => (IpcResponse::Ok, false),
                    Err(e) => (IpcResponse::error(e.to_string()), false),
                }
            }
            IpcMessage::Stop => {
                info!("Received stop command via IPC");
                (IpcResponse::Stopping, true)
            }
        }
    }

    /// Build the current status
    fn status(&self) -> PipelineStatus {
        let view = self.pipeline.view_state();
        let config = self.pipeline.configuration();
        let last = self.pipeline.last_status();
        let stats = self.pipeline.stats();

        PipelineStatus {
            running: self.pipeline.is_running(),
            state: self.pipeline.state(),
            camera_id: view.camera_id,
            camera_title: last
                .as_ref()
                .map(|s| s.selected.title.clone())
                .filter(|t| !t.is_empty()),
            resolution: config.as_ref().map(|c| c.resolution),
            fps: config.as_ref().map(|c| c.effective_fps),
            url: format!("http://{}/", self.pipeline.local_addr()),
            clients: stats.clients,
            error: last.and_then(|s| s.error),
            pid: std::process::id(),
            uptime_seconds: self.pipeline.uptime().as_secs_f64(),
        }
    }

    /// Clean up the socket file
    pub fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            } else {
                debug!("Removed socket file {:?}", self.socket_path);
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
