//! Capture-encode-stream pipeline
//!
//! Owns one capture session, the stream channel, access control and the
//! HTTP server, and exposes the commands the control layer uses.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::info;

use crate::capture::{CameraBackend, CaptureSession, SessionCounters, SessionOptions, SessionState};
use crate::config::{CaptureConfiguration, ConfigFile, StateFile, ViewState, DEFAULT_PORT};
use crate::error::Result;
use crate::events::{event_bus, EngineEvent, StatusUpdate};
use crate::output::{
    AccessControl, CredentialStore, StreamChannel, StreamServer, TokenPolicy, DEFAULT_CAPACITY,
};
use crate::performance::{create_metrics, PerformanceMetrics, QuickStats};
use crate::preview::PreviewTarget;
use crate::types::{Handle, Resolution};

/// Everything needed to start a pipeline
#[derive(Clone)]
pub struct PipelineOptions {
    /// HTTP listen address
    pub listen: SocketAddr,
    /// Initial view state
    pub view: ViewState,
    /// Where the password hash lives
    pub credentials: CredentialStore,
    /// Stream token rules
    pub token_policy: TokenPolicy,
    /// Per-client frame queue depth
    pub channel_capacity: usize,
    /// Quick status period
    pub stats_interval: Duration,
    /// Initial preview surface
    pub preview_target: Option<PreviewTarget>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            view: ViewState::default(),
            credentials: CredentialStore::in_memory(),
            token_policy: TokenPolicy::default(),
            channel_capacity: DEFAULT_CAPACITY,
            stats_interval: Duration::from_secs(1),
            preview_target: None,
        }
    }
}

impl PipelineOptions {
    /// Options from a loaded config file
    pub fn from_config(config: &ConfigFile) -> Self {
        let state_path = config
            .credentials
            .path
            .clone()
            .unwrap_or_else(StateFile::default_path);
        Self {
            listen: config.server.socket_addr(),
            view: config.capture.view_state(),
            credentials: CredentialStore::file(state_path),
            token_policy: TokenPolicy::from_settings(&config.server),
            channel_capacity: config.stream.channel_capacity,
            stats_interval: config.stream.stats_interval(),
            preview_target: None,
        }
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_view(mut self, view: ViewState) -> Self {
        self.view = view;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_token_policy(mut self, policy: TokenPolicy) -> Self {
        self.token_policy = policy;
        self
    }

    pub fn with_preview_target(mut self, target: PreviewTarget) -> Self {
        self.preview_target = Some(target);
        self
    }
}

/// Pipeline statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Pipeline handle
    pub handle: u64,
    /// Capture session state
    pub state: SessionState,
    /// Camera being captured
    pub camera_id: Option<String>,
    /// Capture resolution
    pub resolution: Option<Resolution>,
    /// Rate the hardware runs at
    pub hardware_fps: u32,
    /// Rate frames are kept at
    pub effective_fps: u32,
    /// One frame kept per this many delivered
    pub frame_skip_ratio: u32,
    /// Frame counters
    pub counters: SessionCounters,
    /// Deliveries lost to full client queues
    pub channel_dropped: u64,
    /// Open stream connections
    pub clients: usize,
    /// Average encode time
    pub encode_latency_ms: f64,
    /// Measured kept-frame rate
    pub actual_fps: f64,
    /// Time since start in seconds
    pub elapsed_seconds: f64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pipeline {}: {}", self.handle, self.state)?;
        if let (Some(camera), Some(res)) = (&self.camera_id, self.resolution) {
            write!(
                f,
                " - camera {} {} @ {}fps (hardware {}fps, 1 in {}, actual {:.1}fps)",
                camera,
                res,
                self.effective_fps,
                self.hardware_fps,
                self.frame_skip_ratio,
                self.actual_fps
            )?;
        }
        write!(
            f,
            ", {} captured, {} kept, {} encoded, {} dropped, {} channel drops, {} clients",
            self.counters.captured,
            self.counters.kept,
            self.counters.encoded,
            self.counters.dropped,
            self.channel_dropped,
            self.clients
        )
    }
}

/// Main RemoteCam pipeline
pub struct Pipeline {
    handle: Handle,
    view: Arc<RwLock<ViewState>>,
    session: CaptureSession,
    channel: StreamChannel,
    access: Arc<AccessControl>,
    server: StreamServer,
    events: broadcast::Sender<EngineEvent>,
    metrics: Arc<PerformanceMetrics>,
    started: Instant,
    stopped: AtomicBool,
}

impl Pipeline {
    /// Load credentials, start the HTTP server and open the camera
    ///
    /// Camera failures do not fail startup; they leave the session idle
    /// and are reported through events and status.
    pub async fn start(backend: Arc<dyn CameraBackend>, options: PipelineOptions) -> Result<Self> {
        let handle = Handle::new();
        let access = Arc::new(AccessControl::new(options.credentials, options.token_policy)?);
        let channel = StreamChannel::new(options.channel_capacity);
        let server = StreamServer::bind(options.listen, access.clone(), channel.clone()).await?;

        let view = Arc::new(RwLock::new(options.view));
        let events = event_bus();
        let metrics = create_metrics();
        let session = CaptureSession::spawn(
            SessionOptions::new(backend)
                .with_shared_view(view.clone())
                .with_channel(channel.clone())
                .with_events(events.clone())
                .with_metrics(metrics.clone())
                .with_stats_interval(options.stats_interval),
        );

        match options.preview_target {
            // a new target restarts the session by itself
            Some(target) => session.set_preview_target(Some(target))?,
            None => session.restart()?,
        }

        info!(
            "Pipeline {} started, stream at http://{}/",
            handle,
            server.local_addr()
        );

        Ok(Self {
            handle,
            view,
            session,
            channel,
            access,
            server,
            events,
            metrics,
            started: Instant::now(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Replace the view state
    pub fn set_view_state(&self, view: ViewState) -> Result<()> {
        self.session.set_view_state(view)
    }

    /// Set or clear the preview surface
    pub fn set_preview_target(&self, target: Option<PreviewTarget>) -> Result<()> {
        self.session.set_preview_target(target)
    }

    /// Re-enumerate cameras and push a status update
    pub fn request_status(&self) -> Result<()> {
        self.session.request_status()
    }

    /// Reopen the camera with the current view state
    pub fn restart(&self) -> Result<()> {
        self.session.restart()
    }

    /// Verify a password; returns a fresh stream token on success
    pub fn login(&self, password: &str) -> Option<String> {
        self.access.login(password)
    }

    /// Change the stream password; invalidates the current token
    pub fn change_password(&self, new_password: &str) -> Result<()> {
        self.access.change_password(new_password)
    }

    /// Current view state
    pub fn view_state(&self) -> ViewState {
        self.view.read().clone()
    }

    /// HTTP address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Capture session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The capture session
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Active capture configuration
    pub fn configuration(&self) -> Option<CaptureConfiguration> {
        self.session.configuration()
    }

    /// Most recent status update
    pub fn last_status(&self) -> Option<StatusUpdate> {
        self.session.last_status()
    }

    /// Latest quick status
    pub fn quick_stats(&self) -> QuickStats {
        self.metrics.quick_stats()
    }

    /// Check if the pipeline has not been stopped
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Time since start
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        let config = self.session.configuration();
        let latency = self.metrics.get_stats();
        let channel = self.channel.stats();

        PipelineStats {
            handle: self.handle.as_u64(),
            state: self.session.state(),
            camera_id: config.as_ref().map(|c| c.camera_id.clone()),
            resolution: config.as_ref().map(|c| c.resolution),
            hardware_fps: config.as_ref().map(|c| c.rate.hardware_fps).unwrap_or(0),
            effective_fps: config.as_ref().map(|c| c.effective_fps).unwrap_or(0),
            frame_skip_ratio: config.as_ref().map(|c| c.rate.frame_skip_ratio).unwrap_or(1),
            counters: self.session.counters(),
            channel_dropped: channel.dropped,
            clients: self.server.clients(),
            encode_latency_ms: latency.encode_latency_ms,
            actual_fps: latency.fps,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Stop capture, end open streams and shut the server down
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping pipeline {}", self.handle);

        self.session.destroy().await;
        self.channel.close();
        self.server.shutdown().await;
        self.access.invalidate();

        info!("Pipeline {} stopped: {}", self.handle, self.stats());
    }
}
