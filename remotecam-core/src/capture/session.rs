//! Capture session state machine
//!
//! A [`CaptureSession`] is a handle to one dedicated worker task that owns
//! the camera exclusively. Every command (restart, view state changes,
//! preview target changes, status requests) is queued to that worker, so
//! teardown and setup never race a frame being processed.
//!
//! ```text
//! Idle -> Opening -> Configuring -> Capturing -> Restarting -> Opening ...
//!   ^        |            |             |
//!   +--------+------------+-------------+  (failure or disconnect)
//! any state -> Closed on destroy
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    Acquisition, CameraBackend, CameraDevice, CaptureRequest, DeviceSession, FrameReader,
    MAX_IMAGES,
};
use crate::config::{clamp_index, CaptureConfiguration, ViewState, FPS_BUCKETS};
use crate::encode::{self, FrameGate};
use crate::error::{RemoteCamError, Result};
use crate::events::{event_bus, EngineEvent, StatusUpdate};
use crate::output::StreamChannel;
use crate::performance::{create_metrics, PerformanceMetrics};
use crate::preview::{self, same_target, PreviewTarget};
use crate::types::{CaptureCompletion, Handle, SensorDescriptor};

/// Completions buffered between the hardware and the worker
const COMPLETION_QUEUE: usize = 8;

/// Default period of quick status updates
const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No hardware resources held
    Idle,
    /// Resolving the selected camera
    Opening,
    /// Allocating the reader, opening device and session
    Configuring,
    /// Repeating request active
    Capturing,
    /// Tearing down before the next open
    Restarting,
    /// Destroyed; accepts no further commands
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Configuring => "configuring",
            SessionState::Capturing => "capturing",
            SessionState::Restarting => "restarting",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Frame counters since the session was spawned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Completions received from the hardware
    pub captured: u64,
    /// Completions kept by the rate gate
    pub kept: u64,
    /// Frames successfully encoded
    pub encoded: u64,
    /// Kept frames that produced no output
    pub dropped: u64,
    /// Frames offered to the stream channel
    pub published: u64,
    /// Frames drawn on the preview surface
    pub previewed: u64,
}

#[derive(Default)]
struct SessionShared {
    captured: AtomicU64,
    kept: AtomicU64,
    encoded: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    previewed: AtomicU64,
    configuration: RwLock<Option<CaptureConfiguration>>,
    last_status: RwLock<Option<StatusUpdate>>,
}

impl SessionShared {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> SessionCounters {
        SessionCounters {
            captured: self.captured.load(Ordering::Relaxed),
            kept: self.kept.load(Ordering::Relaxed),
            encoded: self.encoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            previewed: self.previewed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a session needs from its owner
pub struct SessionOptions {
    pub backend: Arc<dyn CameraBackend>,
    pub view: Arc<RwLock<ViewState>>,
    pub channel: StreamChannel,
    pub events: broadcast::Sender<EngineEvent>,
    pub metrics: Arc<PerformanceMetrics>,
    pub stats_interval: Duration,
}

impl SessionOptions {
    /// Options with a default view state, channel and event bus
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            view: Arc::new(RwLock::new(ViewState::default())),
            channel: StreamChannel::default(),
            events: event_bus(),
            metrics: create_metrics(),
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }

    pub fn with_view(mut self, view: ViewState) -> Self {
        self.view = Arc::new(RwLock::new(view));
        self
    }

    pub fn with_shared_view(mut self, view: Arc<RwLock<ViewState>>) -> Self {
        self.view = view;
        self
    }

    pub fn with_channel(mut self, channel: StreamChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<EngineEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PerformanceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }
}

enum SessionCommand {
    Restart,
    SetViewState(ViewState),
    SetPreviewTarget(Option<PreviewTarget>),
    RequestStatus,
    Sync(oneshot::Sender<()>),
}

/// Handle to a running capture worker
pub struct CaptureSession {
    handle: Handle,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<SessionShared>,
    state: watch::Receiver<SessionState>,
}

impl CaptureSession {
    /// Spawn the capture worker; the session starts `Idle`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(options: SessionOptions) -> Self {
        let handle = Handle::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let cancel = CancellationToken::new();
        let shared = Arc::new(SessionShared::default());

        info!(
            "Capture session {} using '{}' backend",
            handle,
            options.backend.name()
        );

        let worker = Worker {
            backend: options.backend,
            view: options.view,
            channel: options.channel,
            events: options.events,
            metrics: options.metrics,
            stats_interval: options.stats_interval.max(Duration::from_millis(10)),
            shared: shared.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            sensors: Vec::new(),
            preview_target: None,
            config: None,
            reader: None,
            gate: None,
            device: None,
            device_session: None,
            completions: None,
            last_error: None,
        };
        let task = tokio::spawn(worker.run(command_rx));

        Self {
            handle,
            commands,
            cancel,
            worker: Mutex::new(Some(task)),
            shared,
            state,
        }
    }

    /// Session handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RemoteCamError::SessionClosed);
        }
        self.commands
            .send(command)
            .map_err(|_| RemoteCamError::SessionClosed)
    }

    /// Tear down and reopen the camera with the current view state
    pub fn restart(&self) -> Result<()> {
        self.send(SessionCommand::Restart)
    }

    /// Replace the view state; restarts if a restart-significant field changed
    pub fn set_view_state(&self, view: ViewState) -> Result<()> {
        view.validate()?;
        self.send(SessionCommand::SetViewState(view))
    }

    /// Set or clear the preview surface; a different surface restarts capture
    pub fn set_preview_target(&self, target: Option<PreviewTarget>) -> Result<()> {
        self.send(SessionCommand::SetPreviewTarget(target))
    }

    /// Re-enumerate cameras and push a status update
    pub fn request_status(&self) -> Result<()> {
        self.send(SessionCommand::RequestStatus)
    }

    /// Wait until every command queued before this call has been handled
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Sync(tx))?;
        rx.await.map_err(|_| RemoteCamError::SessionClosed)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`; false on timeout
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        )
    }

    /// Configuration of the running capture, if any
    pub fn configuration(&self) -> Option<CaptureConfiguration> {
        self.shared.configuration.read().clone()
    }

    /// Most recent status update
    pub fn last_status(&self) -> Option<StatusUpdate> {
        self.shared.last_status.read().clone()
    }

    /// Frame counters
    pub fn counters(&self) -> SessionCounters {
        self.shared.counters()
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.state() != SessionState::Closed
    }

    /// Release all camera resources and stop the worker
    ///
    /// Safe to call from any state and more than once. Any pending device
    /// acquisition is abandoned.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Capture worker ended abnormally: {}", e);
            }
            info!("Capture session {} destroyed", self.handle);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn release_camera(session: Option<Box<dyn DeviceSession>>, device: Option<Box<dyn CameraDevice>>) {
    if let Some(mut session) = session {
        session.stop_repeating();
        session.close();
    }
    if let Some(mut device) = device {
        device.close();
    }
}

/// Wait for an acquisition unless the session is being destroyed
async fn acquire<T>(cancel: &CancellationToken, pending: Acquisition<T>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RemoteCamError::SessionClosed),
        result = pending => result.unwrap_or_else(|_| {
            Err(RemoteCamError::device("camera backend abandoned the request"))
        }),
    }
}

async fn next_completion(
    completions: &mut Option<mpsc::Receiver<CaptureCompletion>>,
) -> Option<CaptureCompletion> {
    match completions {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct Worker {
    backend: Arc<dyn CameraBackend>,
    view: Arc<RwLock<ViewState>>,
    channel: StreamChannel,
    events: broadcast::Sender<EngineEvent>,
    metrics: Arc<PerformanceMetrics>,
    stats_interval: Duration,
    shared: Arc<SessionShared>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,

    sensors: Vec<SensorDescriptor>,
    preview_target: Option<PreviewTarget>,
    /// Last resolved configuration, kept for status after a failed open
    config: Option<CaptureConfiguration>,

    reader: Option<FrameReader>,
    gate: Option<FrameGate>,
    device: Option<Box<dyn CameraDevice>>,
    device_session: Option<Box<dyn DeviceSession>>,
    completions: Option<mpsc::Receiver<CaptureCompletion>>,
    last_error: Option<String>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut ticker = tokio::time::interval(self.stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                completion = next_completion(&mut self.completions) => match completion {
                    Some(completion) => self.on_capture_completed(completion),
                    None => self.on_device_lost().await,
                },
                _ = ticker.tick() => self.push_quick_stats(),
            }
        }

        commands.close();
        self.teardown().await;
        self.set_state(SessionState::Closed);
        debug!("Capture worker stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Restart => self.restart().await,
            SessionCommand::SetViewState(next) => {
                let compressed = self.config.as_ref().is_some_and(|c| c.is_compressed());
                let restart = {
                    let mut view = self.view.write();
                    let restart = view.restart_required(&next, compressed);
                    *view = next;
                    restart
                };
                if restart {
                    self.restart().await;
                } else {
                    debug!("View state updated without restart");
                }
            }
            SessionCommand::SetPreviewTarget(target) => {
                let changed = !same_target(self.preview_target.as_ref(), target.as_ref());
                self.preview_target = target;
                if changed {
                    debug!("Preview target changed");
                    self.restart().await;
                }
            }
            SessionCommand::RequestStatus => {
                if let Err(e) = self.refresh_sensors() {
                    warn!("Camera enumeration failed: {}", e);
                    self.last_error = Some(e.to_string());
                }
                self.push_status();
            }
            SessionCommand::Sync(done) => {
                let _ = done.send(());
            }
        }
    }

    fn holds_resources(&self) -> bool {
        self.device.is_some() || self.device_session.is_some() || self.reader.is_some()
    }

    async fn restart(&mut self) {
        if self.holds_resources() {
            self.set_state(SessionState::Restarting);
        }
        self.teardown().await;
        self.set_state(SessionState::Opening);

        match self.start_capture().await {
            Ok(()) => {
                self.last_error = None;
                self.metrics.reset();
                self.set_state(SessionState::Capturing);
            }
            Err(e) => {
                self.teardown().await;
                if self.cancel.is_cancelled() {
                    return;
                }
                warn!("Capture did not start: {}", e);
                if let Some(hint) = e.user_hint() {
                    debug!("{}", hint);
                }
                self.last_error = Some(e.to_string());
                self.set_state(SessionState::Idle);
                self.emit(EngineEvent::Fault {
                    message: e.to_string(),
                });
            }
        }
        self.push_status();
    }

    fn refresh_sensors(&mut self) -> Result<()> {
        self.sensors = self.backend.enumerate()?;
        Ok(())
    }

    async fn start_capture(&mut self) -> Result<()> {
        let view = self.view.read().clone();
        self.config = None;
        view.validate()?;

        self.refresh_sensors()?;
        if self.sensors.is_empty() {
            return Err(RemoteCamError::capability("No camera available"));
        }
        let sensor = self
            .sensors
            .iter()
            .find(|s| s.camera_id == view.camera_id)
            .cloned()
            .ok_or_else(|| RemoteCamError::SourceNotFound(view.camera_id.clone()))?;

        let characteristics = match self.backend.characteristics(&sensor.camera_id) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(
                    "No characteristics for camera {}, using defaults: {}",
                    sensor.camera_id, e
                );
                None
            }
        };

        self.set_state(SessionState::Configuring);
        let config = CaptureConfiguration::resolve(&view, &sensor, characteristics.as_ref());
        info!(
            "Camera {} ({}): {} {} at {}fps (hardware {}fps, keeping 1 in {})",
            sensor.camera_id,
            sensor.title,
            config.resolution,
            config.pixel_format,
            config.effective_fps,
            config.rate.hardware_fps,
            config.rate.frame_skip_ratio
        );

        let reader = FrameReader::new(config.resolution, config.pixel_format, MAX_IMAGES);
        self.reader = Some(reader.clone());
        self.gate = Some(FrameGate::new(config.rate));
        self.config = Some(config.clone());

        let cancel = self.cancel.clone();
        let device = acquire(&cancel, self.backend.open_device(&sensor.camera_id))
            .await
            .map_err(|e| e.with_context(format!("Failed to open camera {}", sensor.camera_id)))?;
        let pending = self.device.insert(device).create_session(reader);

        let session = acquire(&cancel, pending)
            .await
            .map_err(|e| e.with_context("Failed to create capture session"))?;
        let session = self.device_session.insert(session);

        let (tx, rx) = mpsc::channel(COMPLETION_QUEUE);
        let request = CaptureRequest::for_configuration(&config, view.effective_quality());
        session
            .set_repeating_request(request, tx)
            .map_err(|e| e.with_context("Failed to start repeating capture"))?;

        self.completions = Some(rx);
        *self.shared.configuration.write() = Some(config);
        Ok(())
    }

    /// Release resources in hardware order: stop, session, device, reader
    ///
    /// The completion queue is closed first so no producer is left waiting
    /// on it while the session stops.
    async fn teardown(&mut self) {
        self.completions = None;
        let session = self.device_session.take();
        let device = self.device.take();
        if session.is_some() || device.is_some() {
            // Backends may join their capture threads here
            let release = tokio::task::spawn_blocking(move || release_camera(session, device));
            if let Err(e) = release.await {
                error!("Camera release failed: {}", e);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.gate = None;
        *self.shared.configuration.write() = None;
    }

    async fn on_device_lost(&mut self) {
        warn!("Camera stopped delivering frames");
        self.teardown().await;
        let message = "Camera disconnected".to_string();
        self.last_error = Some(message.clone());
        self.set_state(SessionState::Idle);
        self.emit(EngineEvent::Fault { message });
        self.push_status();
    }

    fn on_capture_completed(&mut self, completion: CaptureCompletion) {
        let started = Instant::now();
        let (Some(reader), Some(gate)) = (self.reader.clone(), self.gate.as_mut()) else {
            return;
        };
        SessionShared::bump(&self.shared.captured);

        if !gate.advance() {
            let discarded = reader.discard_all();
            trace!(
                "Skipped frame {} ({} discarded)",
                completion.sequence,
                discarded
            );
            return;
        }
        SessionShared::bump(&self.shared.kept);

        let Some(raw) = reader.acquire_latest() else {
            trace!("No frame behind completion {}", completion.sequence);
            return;
        };

        let (quality, stream, preview_on, rotation) = {
            let view = self.view.read();
            (view.effective_quality(), view.stream, view.preview, view.rotation)
        };

        let encode_start = Instant::now();
        let encoded = encode::encode(&raw, quality);
        drop(raw);
        self.metrics.record_encode(encode_start.elapsed());

        if encoded.is_empty() {
            SessionShared::bump(&self.shared.dropped);
            self.metrics.record_frame_dropped();
            return;
        }
        SessionShared::bump(&self.shared.encoded);

        if stream {
            self.channel.publish(encoded.clone());
            SessionShared::bump(&self.shared.published);
        }

        if preview_on {
            if let Some(target) = self.preview_target.as_ref().filter(|t| t.is_valid()) {
                let orientation = self
                    .config
                    .as_ref()
                    .map(|c| c.sensor_orientation)
                    .unwrap_or(0);
                let drawn = encode::decode(&encoded)
                    .is_some_and(|frame| {
                        preview::render(&frame, Some(target.as_ref()), orientation, rotation)
                    });
                if drawn {
                    SessionShared::bump(&self.shared.previewed);
                }
            }
        }

        self.metrics.record_frame(started.elapsed(), encoded.len());
    }

    fn push_quick_stats(&self) {
        if *self.state.borrow() == SessionState::Capturing {
            self.emit(EngineEvent::Quick(self.metrics.quick_stats()));
        }
    }

    fn status(&self) -> StatusUpdate {
        let view = self.view.read().clone();
        let selected = self
            .sensors
            .iter()
            .find(|s| s.camera_id == view.camera_id)
            .cloned();

        let (resolutions, resolution_index, fps_index, sensor_orientation) = match &self.config {
            Some(c) => (
                c.available_resolutions.clone(),
                c.resolution_index,
                c.fps_index,
                c.sensor_orientation,
            ),
            None => (
                Vec::new(),
                0,
                clamp_index(view.fps_index, FPS_BUCKETS.len()),
                selected.as_ref().map(|s| s.orientation).unwrap_or(0),
            ),
        };

        let error = if self.sensors.is_empty() {
            Some("No camera available".to_string())
        } else {
            self.last_error.clone()
        };

        StatusUpdate {
            state: *self.state.borrow(),
            sensors: self.sensors.clone(),
            selected: selected.unwrap_or_else(SensorDescriptor::unavailable),
            sensor_orientation,
            resolutions,
            resolution_index,
            fps_buckets: FPS_BUCKETS.to_vec(),
            fps_index,
            error,
        }
    }

    fn push_status(&self) {
        let status = self.status();
        *self.shared.last_status.write() = Some(status.clone());
        self.emit(EngineEvent::Status(status));
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Capture session: {} -> {}", previous, state);
            self.emit(EngineEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: EngineEvent) {
        // no observers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{SyntheticBackend, SyntheticSensor};
    use crate::types::Resolution;

    fn planar_sensor(id: &str) -> SyntheticSensor {
        SyntheticSensor::planar(id, &[Resolution::new(32, 24)], &[30])
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Capturing.to_string(), "capturing");
        assert_eq!(
            serde_json::to_string(&SessionState::Restarting).unwrap(),
            "\"restarting\""
        );
    }

    #[tokio::test]
    async fn test_starts_idle_and_captures_on_restart() {
        let (backend, feed) = SyntheticBackend::manual(vec![planar_sensor("0")]);
        let session = CaptureSession::spawn(SessionOptions::new(Arc::new(backend)));
        assert_eq!(session.state(), SessionState::Idle);

        session.restart().unwrap();
        assert!(
            session
                .wait_for_state(SessionState::Capturing, Duration::from_secs(2))
                .await
        );
        assert!(feed.is_active());
        let config = session.configuration().unwrap();
        assert_eq!(config.resolution, Resolution::new(32, 24));

        session.destroy().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!feed.is_active());
    }

    #[tokio::test]
    async fn test_unknown_camera_goes_idle_with_fault() {
        let (backend, _feed) = SyntheticBackend::manual(vec![planar_sensor("0")]);
        let options = SessionOptions::new(Arc::new(backend)).with_view(ViewState::default().with_camera("9"));
        let mut events = options.events.subscribe();
        let session = CaptureSession::spawn(options);

        session.restart().unwrap();
        session.sync().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let mut saw_fault = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Fault { message } = event {
                assert!(message.contains("9"));
                saw_fault = true;
            }
        }
        assert!(saw_fault);
        assert!(session.last_status().unwrap().error.is_some());
        session.destroy().await;
    }

    /// Camera whose frames come from a plain thread that blocks on a full
    /// completion queue, the way a driver read loop would
    struct ThreadedBackend {
        inner: SyntheticBackend,
    }

    struct ThreadedDevice {
        camera_id: String,
    }

    struct ThreadedSession {
        reader: FrameReader,
        worker: Option<(Arc<std::sync::atomic::AtomicBool>, std::thread::JoinHandle<()>)>,
    }

    impl CameraBackend for ThreadedBackend {
        fn name(&self) -> &str {
            "threaded"
        }

        fn enumerate(&self) -> Result<Vec<SensorDescriptor>> {
            self.inner.enumerate()
        }

        fn characteristics(&self, camera_id: &str) -> Result<crate::types::SensorCharacteristics> {
            self.inner.characteristics(camera_id)
        }

        fn open_device(&self, camera_id: &str) -> Acquisition<Box<dyn CameraDevice>> {
            crate::capture::ready(Ok(Box::new(ThreadedDevice {
                camera_id: camera_id.to_string(),
            }) as Box<dyn CameraDevice>))
        }
    }

    impl CameraDevice for ThreadedDevice {
        fn camera_id(&self) -> &str {
            &self.camera_id
        }

        fn create_session(&mut self, output: FrameReader) -> Acquisition<Box<dyn DeviceSession>> {
            crate::capture::ready(Ok(Box::new(ThreadedSession {
                reader: output,
                worker: None,
            }) as Box<dyn DeviceSession>))
        }

        fn close(&mut self) {}
    }

    impl DeviceSession for ThreadedSession {
        fn set_repeating_request(
            &mut self,
            _request: CaptureRequest,
            completions: mpsc::Sender<CaptureCompletion>,
        ) -> Result<()> {
            let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let thread_stop = stop.clone();
            let reader = self.reader.clone();
            let join = std::thread::spawn(move || {
                let mut sequence = 0u64;
                while !thread_stop.load(Ordering::SeqCst) {
                    let frame = crate::capture::synthetic::planar_pattern(
                        reader.resolution(),
                        sequence,
                        Default::default(),
                    );
                    if !reader.submit(frame) {
                        break;
                    }
                    let completion = CaptureCompletion {
                        sequence,
                        timestamp_ns: sequence,
                    };
                    if completions.blocking_send(completion).is_err() {
                        break;
                    }
                    sequence += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
            self.worker = Some((stop, join));
            Ok(())
        }

        fn stop_repeating(&mut self) {
            if let Some((stop, join)) = self.worker.take() {
                // Give the thread time to fill the queue and park on it
                std::thread::sleep(Duration::from_millis(30));
                stop.store(true, Ordering::SeqCst);
                let _ = join.join();
            }
        }

        fn close(&mut self) {
            self.stop_repeating();
        }
    }

    #[tokio::test]
    async fn test_teardown_releases_thread_blocked_on_full_queue() {
        let (inner, _feed) = SyntheticBackend::manual(vec![planar_sensor("0")]);
        let backend = ThreadedBackend { inner };
        let session = CaptureSession::spawn(SessionOptions::new(Arc::new(backend)));
        let limit = Duration::from_secs(5);

        session.restart().unwrap();
        assert!(session.wait_for_state(SessionState::Capturing, limit).await);

        // Restart twice so one teardown runs while the queue is saturated
        session.restart().unwrap();
        session.restart().unwrap();
        tokio::time::timeout(limit, session.sync())
            .await
            .expect("restart stalled")
            .unwrap();
        assert_eq!(session.state(), SessionState::Capturing);
        assert!(session.counters().captured > 0);

        tokio::time::timeout(limit, session.destroy())
            .await
            .expect("destroy stalled");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_commands_after_destroy_fail() {
        let (backend, _feed) = SyntheticBackend::manual(vec![planar_sensor("0")]);
        let session = CaptureSession::spawn(SessionOptions::new(Arc::new(backend)));
        session.destroy().await;
        session.destroy().await;
        assert!(matches!(session.restart(), Err(RemoteCamError::SessionClosed)));
        assert!(!session.is_running());
    }
}
