//! Synthetic camera backend
//!
//! Generates a moving test pattern without hardware. Sensors can produce
//! planar 4:2:0 frames with padded rows and interleaved chroma, or
//! compressed JPEG frames, and can be told to fail at open or session
//! creation.
//!
//! In timed mode frames are produced at the requested rate. In manual mode
//! a [`SyntheticFeed`] pushes an exact number of frames, which makes frame
//! counting deterministic in tests.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{
    acquisition, ready, Acquisition, CameraBackend, CameraDevice, CaptureRequest, DeviceSession,
    FrameReader,
};
use crate::encode::jpeg;
use crate::error::{RemoteCamError, Result};
use crate::formats::PixelFormat;
use crate::types::{
    CaptureCompletion, FpsRange, LensFacing, Plane, RawFrame, Resolution,
    SensorCharacteristics, SensorDescriptor,
};

/// Byte written into row padding, so ignored strides show up in output
const PADDING_BYTE: u8 = 0xEE;

/// Memory layout of generated planar frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanarLayout {
    /// Extra bytes at the end of every row
    pub row_padding: usize,
    /// 1 for separate U and V planes, 2 for interleaved UV
    pub chroma_pixel_stride: usize,
}

impl Default for PlanarLayout {
    fn default() -> Self {
        Self {
            row_padding: 16,
            chroma_pixel_stride: 2,
        }
    }
}

/// Generate one planar 4:2:0 test frame
pub fn planar_pattern(resolution: Resolution, sequence: u64, layout: PlanarLayout) -> RawFrame {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let shift = (sequence % 256) as usize * 4;

    let y_stride = width + layout.row_padding;
    let mut luma = vec![PADDING_BYTE; y_stride * height];
    for row in 0..height {
        for col in 0..width {
            luma[row * y_stride + col] = ((col + row + shift) % 256) as u8;
        }
    }

    let u_at = |col: usize| (64 + col * 128 / chroma_w.max(1)) as u8;
    let v_at = |row: usize| (64 + row * 128 / chroma_h.max(1)) as u8;

    let (u, v) = if layout.chroma_pixel_stride >= 2 {
        let ps = layout.chroma_pixel_stride;
        let stride = chroma_w * ps + layout.row_padding;
        let mut uv = vec![PADDING_BYTE; stride * chroma_h];
        for row in 0..chroma_h {
            for col in 0..chroma_w {
                uv[row * stride + col * ps] = u_at(col);
                uv[row * stride + col * ps + 1] = v_at(row);
            }
        }
        let uv = Bytes::from(uv);
        (
            Plane::new(uv.clone(), stride, ps),
            Plane::new(uv.slice(1..), stride, ps),
        )
    } else {
        let stride = chroma_w + layout.row_padding;
        let mut u = vec![PADDING_BYTE; stride * chroma_h];
        let mut v = vec![PADDING_BYTE; stride * chroma_h];
        for row in 0..chroma_h {
            for col in 0..chroma_w {
                u[row * stride + col] = u_at(col);
                v[row * stride + col] = v_at(row);
            }
        }
        (Plane::new(u, stride, 1), Plane::new(v, stride, 1))
    };

    RawFrame::planar(
        resolution.width,
        resolution.height,
        Plane::new(luma, y_stride, 1),
        u,
        v,
    )
}

/// Generate one frame in the requested layout
fn generate(request: &CaptureRequest, sequence: u64, layout: PlanarLayout) -> RawFrame {
    let timestamp_ns = sequence * 1_000_000_000 / u64::from(request.target_fps.upper.max(1));
    let planar = planar_pattern(request.resolution, sequence, layout);
    let frame = match request.format {
        PixelFormat::Jpeg => RawFrame::compressed(
            request.resolution.width,
            request.resolution.height,
            jpeg::encode(&planar, request.quality),
        ),
        _ => planar,
    };
    frame.with_timestamp(timestamp_ns)
}

/// One synthetic camera
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    pub descriptor: SensorDescriptor,
    pub characteristics: SensorCharacteristics,
    open_delay: Duration,
    fail_open: bool,
    fail_session: bool,
    hide_characteristics: bool,
}

impl SyntheticSensor {
    fn build(camera_id: &str, format: PixelFormat, sizes: &[Resolution], fps: &[u32]) -> Self {
        Self {
            descriptor: SensorDescriptor::new(
                camera_id,
                format!("Synthetic camera {}", camera_id),
                LensFacing::External,
            ),
            characteristics: SensorCharacteristics {
                output_sizes: vec![(format, sizes.to_vec())],
                fps_ranges: fps.iter().map(|&f| FpsRange::fixed(f)).collect(),
                orientation: 0,
                continuous_autofocus: false,
            },
            open_delay: Duration::ZERO,
            fail_open: false,
            fail_session: false,
            hide_characteristics: false,
        }
    }

    /// Sensor producing planar 4:2:0 frames
    pub fn planar(camera_id: &str, sizes: &[Resolution], fps: &[u32]) -> Self {
        Self::build(camera_id, PixelFormat::Yuv420, sizes, fps)
    }

    /// Sensor producing JPEG frames
    pub fn compressed(camera_id: &str, sizes: &[Resolution], fps: &[u32]) -> Self {
        Self::build(camera_id, PixelFormat::Jpeg, sizes, fps)
    }

    /// Set title and facing
    pub fn with_title(mut self, title: impl Into<String>, facing: LensFacing) -> Self {
        self.descriptor.title = title.into();
        self.descriptor.facing = facing;
        self
    }

    /// Set sensor orientation
    pub fn with_orientation(mut self, degrees: u32) -> Self {
        self.descriptor.orientation = degrees % 360;
        self.characteristics.orientation = degrees % 360;
        self
    }

    /// Advertise continuous autofocus
    pub fn with_autofocus(mut self) -> Self {
        self.characteristics.continuous_autofocus = true;
        self
    }

    /// Delay device open by `delay`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fail every device open
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail every session creation
    pub fn failing_session(mut self) -> Self {
        self.fail_session = true;
        self
    }

    /// Fail characteristics queries
    pub fn without_characteristics(mut self) -> Self {
        self.hide_characteristics = true;
        self
    }
}

struct ActiveFeed {
    reader: FrameReader,
    completions: mpsc::Sender<CaptureCompletion>,
    request: CaptureRequest,
    layout: PlanarLayout,
}

#[derive(Default)]
struct FeedInner {
    active: Mutex<Option<ActiveFeed>>,
    requests: Mutex<Vec<CaptureRequest>>,
    sequence: AtomicU64,
    ready: Notify,
}

/// Manual frame driver for a [`SyntheticBackend`]
#[derive(Clone, Default)]
pub struct SyntheticFeed {
    inner: Arc<FeedInner>,
}

impl SyntheticFeed {
    fn activate(&self, feed: ActiveFeed) {
        self.inner.requests.lock().push(feed.request.clone());
        *self.inner.active.lock() = Some(feed);
        self.inner.ready.notify_waiters();
    }

    fn deactivate(&self) {
        self.inner.active.lock().take();
    }

    /// Whether a repeating request is currently active
    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Wait until a repeating request is active
    pub async fn wait_active(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.ready.notified();
            if self.is_active() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_active();
            }
        }
    }

    /// Deliver `count` frames, one completion each
    ///
    /// Waits for the worker to accept every completion. Returns how many
    /// were delivered before the session stopped.
    pub async fn push(&self, count: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..count {
            let (reader, completions, frame, sequence) = {
                let active = self.inner.active.lock();
                let Some(feed) = active.as_ref() else {
                    break;
                };
                let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
                (
                    feed.reader.clone(),
                    feed.completions.clone(),
                    generate(&feed.request, sequence, feed.layout),
                    sequence,
                )
            };

            let timestamp_ns = frame.timestamp_ns;
            if !reader.submit(frame) {
                break;
            }
            let completion = CaptureCompletion {
                sequence,
                timestamp_ns,
            };
            if completions.send(completion).await.is_err() {
                break;
            }
            delivered += 1;
        }
        delivered
    }

    /// Simulate the camera disappearing mid-stream
    pub fn disconnect(&self) {
        if self.inner.active.lock().take().is_some() {
            info!("Synthetic camera disconnected");
        }
    }

    /// Most recent repeating request
    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.inner.requests.lock().last().cloned()
    }

    /// Number of repeating requests issued so far
    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().len()
    }
}

/// Camera backend producing generated frames
pub struct SyntheticBackend {
    sensors: Vec<SyntheticSensor>,
    feed: Option<SyntheticFeed>,
    layout: PlanarLayout,
}

impl SyntheticBackend {
    /// Timed backend with the given sensors
    pub fn new(sensors: Vec<SyntheticSensor>) -> Self {
        Self {
            sensors,
            feed: None,
            layout: PlanarLayout::default(),
        }
    }

    /// Manually driven backend and its feed
    pub fn manual(sensors: Vec<SyntheticSensor>) -> (Self, SyntheticFeed) {
        let feed = SyntheticFeed::default();
        let backend = Self {
            sensors,
            feed: Some(feed.clone()),
            layout: PlanarLayout::default(),
        };
        (backend, feed)
    }

    /// Timed backend with a planar back camera and a JPEG front camera
    pub fn with_default_sensors() -> Self {
        let sizes = [
            Resolution::new(320, 240),
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
        ];
        Self::new(vec![
            SyntheticSensor::planar("0", &sizes, &[15, 30])
                .with_title("Synthetic back camera", LensFacing::Back)
                .with_orientation(90)
                .with_autofocus(),
            SyntheticSensor::compressed("1", &sizes[..2], &[30])
                .with_title("Synthetic front camera", LensFacing::Front)
                .with_orientation(270),
        ])
    }

    /// Use a different planar memory layout
    pub fn with_layout(mut self, layout: PlanarLayout) -> Self {
        self.layout = layout;
        self
    }

    fn sensor(&self, camera_id: &str) -> Result<&SyntheticSensor> {
        self.sensors
            .iter()
            .find(|s| s.descriptor.camera_id == camera_id)
            .ok_or_else(|| RemoteCamError::SourceNotFound(camera_id.to_string()))
    }
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<SensorDescriptor>> {
        Ok(self.sensors.iter().map(|s| s.descriptor.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> Result<SensorCharacteristics> {
        let sensor = self.sensor(camera_id)?;
        if sensor.hide_characteristics {
            return Err(RemoteCamError::capability(format!(
                "characteristics unavailable for camera {}",
                camera_id
            )));
        }
        Ok(sensor.characteristics.clone())
    }

    fn open_device(&self, camera_id: &str) -> Acquisition<Box<dyn CameraDevice>> {
        let sensor = match self.sensor(camera_id) {
            Ok(sensor) => sensor.clone(),
            Err(e) => return ready(Err(e)),
        };
        if sensor.fail_open {
            return ready(Err(RemoteCamError::device(format!(
                "camera {} is in use by another client",
                camera_id
            ))));
        }

        let delay = sensor.open_delay;
        let device: Box<dyn CameraDevice> = Box::new(SyntheticDevice {
            sensor,
            feed: self.feed.clone(),
            layout: self.layout,
            closed: false,
        });

        if delay.is_zero() {
            return ready(Ok(device));
        }
        let (tx, rx) = acquisition();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Ok(device));
        });
        rx
    }
}

struct SyntheticDevice {
    sensor: SyntheticSensor,
    feed: Option<SyntheticFeed>,
    layout: PlanarLayout,
    closed: bool,
}

impl CameraDevice for SyntheticDevice {
    fn camera_id(&self) -> &str {
        &self.sensor.descriptor.camera_id
    }

    fn create_session(&mut self, output: FrameReader) -> Acquisition<Box<dyn DeviceSession>> {
        if self.closed {
            return ready(Err(RemoteCamError::device("camera already closed")));
        }
        if self.sensor.fail_session {
            return ready(Err(RemoteCamError::device(format!(
                "camera {} rejected the session configuration",
                self.camera_id()
            ))));
        }
        ready(Ok(Box::new(SyntheticSession {
            reader: output,
            feed: self.feed.clone(),
            layout: self.layout,
            stop: None,
            closed: false,
        })))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("Closed synthetic camera {}", self.camera_id());
        }
    }
}

struct SyntheticSession {
    reader: FrameReader,
    feed: Option<SyntheticFeed>,
    layout: PlanarLayout,
    stop: Option<CancellationToken>,
    closed: bool,
}

impl DeviceSession for SyntheticSession {
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        completions: mpsc::Sender<CaptureCompletion>,
    ) -> Result<()> {
        if self.closed {
            return Err(RemoteCamError::device("session already closed"));
        }
        self.stop_repeating();

        if let Some(feed) = &self.feed {
            feed.activate(ActiveFeed {
                reader: self.reader.clone(),
                completions,
                request,
                layout: self.layout,
            });
            return Ok(());
        }

        let token = CancellationToken::new();
        self.stop = Some(token.clone());
        let reader = self.reader.clone();
        let layout = self.layout;
        let period = Duration::from_secs_f64(1.0 / f64::from(request.target_fps.upper.max(1)));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut sequence = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = generate(&request, sequence, layout);
                        let timestamp_ns = frame.timestamp_ns;
                        if !reader.submit(frame) {
                            break;
                        }
                        match completions.try_send(CaptureCompletion { sequence, timestamp_ns }) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                trace!("Completion queue full, frame {} left in reader", sequence);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                        sequence += 1;
                    }
                }
            }
            debug!("Synthetic frame generator stopped after {} frames", sequence);
        });
        Ok(())
    }

    fn stop_repeating(&mut self) {
        if let Some(token) = self.stop.take() {
            token.cancel();
        }
        if let Some(feed) = &self.feed {
            feed.deactivate();
        }
    }

    fn close(&mut self) {
        self.stop_repeating();
        self.closed = true;
    }
}
