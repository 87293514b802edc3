//! IPC client for CLI commands
//!
//! Connects to the running daemon to send commands and receive responses.

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{IpcMessage, IpcResponse, PipelineStatus};
use super::socket_path;
use crate::config::ViewState;
use crate::error::{RemoteCamError, Result};
use crate::events::StatusUpdate;
use crate::pipeline::PipelineStats;

/// Default connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    stream: BufReader<UnixStream>,
}

impl IpcClient {
    /// Connect to the daemon with default timeout
    pub async fn connect() -> Result<Self> {
        Self::connect_with_timeout(&socket_path(), CONNECT_TIMEOUT).await
    }

    /// Connect to a daemon listening on `path`
    pub async fn connect_to(path: &Path) -> Result<Self> {
        Self::connect_with_timeout(path, CONNECT_TIMEOUT).await
    }

    /// Connect with a custom timeout
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(RemoteCamError::NoActiveSession);
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| RemoteCamError::Config("Connection timed out".into()))?
            .map_err(|e| RemoteCamError::Config(format!("Failed to connect to daemon: {}", e)))?;

        debug!("Connected to daemon at {:?}", path);

        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Send a message and receive a response with timeout
    async fn send(&mut self, msg: IpcMessage) -> Result<IpcResponse> {
        self.send_with_timeout(msg, IO_TIMEOUT).await
    }

    /// Send a message and receive a response with custom timeout
    pub async fn send_with_timeout(
        &mut self,
        msg: IpcMessage,
        timeout: Duration,
    ) -> Result<IpcResponse> {
        let msg_bytes = msg.to_bytes();
        tokio::time::timeout(timeout, self.stream.get_mut().write_all(&msg_bytes))
            .await
            .map_err(|_| RemoteCamError::Config("Write timed out".into()))?
            .map_err(|e| RemoteCamError::Config(format!("Failed to send message: {}", e)))?;

        let mut line = String::new();
        let read = tokio::time::timeout(timeout, self.stream.read_line(&mut line))
            .await
            .map_err(|_| RemoteCamError::Config("Read timed out".into()))?
            .map_err(|e| RemoteCamError::Config(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(RemoteCamError::Config("Daemon closed the connection".into()));
        }

        IpcResponse::from_bytes(line.trim().as_bytes())
            .map_err(|e| RemoteCamError::Config(format!("Invalid response: {}", e)))
    }

    /// Ping the daemon to check if it's alive
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send(IpcMessage::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(_) => Ok(false),
        }
    }

    /// Get the current status
    pub async fn status(&mut self) -> Result<PipelineStatus> {
        match self.send(IpcMessage::Status).await? {
            IpcResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Get pipeline statistics
    pub async fn stats(&mut self) -> Result<PipelineStats> {
        match self.send(IpcMessage::Stats).await? {
            IpcResponse::Stats(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    /// Re-enumerate cameras and fetch the resulting status update
    pub async fn request_status(&mut self) -> Result<StatusUpdate> {
        match self.send(IpcMessage::RequestStatus).await? {
            IpcResponse::Capabilities(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Read the daemon's view state
    pub async fn view_state(&mut self) -> Result<ViewState> {
        match self.send(IpcMessage::GetViewState).await? {
            IpcResponse::ViewState { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    /// Replace the daemon's view state
    pub async fn set_view_state(&mut self, state: ViewState) -> Result<()> {
        match self.send(IpcMessage::SetViewState { state }).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Change the stream password
    pub async fn change_password(&mut self, password: &str) -> Result<()> {
        let msg = IpcMessage::ChangePassword {
            password: password.to_string(),
        };
        match self.send(msg).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(RemoteCamError::Auth(message)),
            other => Err(unexpected(other)),
        }
    }

    /// Request the daemon to stop
    pub async fn stop(&mut self) -> Result<()> {
        match self.send(IpcMessage::Stop).await? {
            IpcResponse::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: IpcResponse) -> RemoteCamError {
    match response {
        IpcResponse::Error { message } => RemoteCamError::Config(message),
        other => RemoteCamError::Config(format!("Unexpected response: {:?}", other)),
    }
}
