//! Video4Linux2 camera backend
//!
//! Cameras are `/dev/video*` nodes with the video-capture capability. The
//! node path is the camera id. Frames are read from memory-mapped buffers
//! on a dedicated thread, converted into [`RawFrame`]s without copying the
//! planes apart, and handed to the session's [`FrameReader`].

use bytes::Bytes;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC, Format};

use super::{
    ready, Acquisition, CameraBackend, CameraDevice, CaptureRequest, DeviceSession, FrameReader,
};
use crate::error::{RemoteCamError, Result};
use crate::formats::{fourcc, PixelFormat};
use crate::types::{
    CaptureCompletion, FpsRange, LensFacing, Plane, RawFrame, Resolution, SensorCharacteristics,
    SensorDescriptor,
};

/// Driver buffers queued for capture
const BUFFER_COUNT: u32 = 4;

/// Longest wait for one buffer before checking for stop
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Fourccs tried for each pipeline layout, most preferred first
fn candidate_fourccs(format: PixelFormat) -> &'static [u32] {
    match format {
        PixelFormat::Jpeg => &[fourcc::MJPG, fourcc::JPEG],
        PixelFormat::Yuv420 => &[fourcc::NV12, fourcc::YU12, fourcc::NV21, fourcc::YUYV],
        PixelFormat::Unsupported(_) => &[],
    }
}

fn fourcc_code(fourcc: &FourCC) -> u32 {
    u32::from_le_bytes(fourcc.repr)
}

fn device_error(path: &Path, e: io::Error) -> RemoteCamError {
    RemoteCamError::device(format!("{}: {}", path.display(), e))
}

/// V4L2 backend
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn enumerate(&self) -> Result<Vec<SensorDescriptor>> {
        let mut sensors = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_path_buf();
            let device = match Device::with_path(&path) {
                Ok(device) => device,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let caps = match device.query_caps() {
                Ok(caps) => caps,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            // Metadata nodes share the card name but cannot capture
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }

            sensors.push(SensorDescriptor::new(
                path.display().to_string(),
                caps.card,
                LensFacing::External,
            ));
        }
        sensors.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        Ok(sensors)
    }

    fn characteristics(&self, camera_id: &str) -> Result<SensorCharacteristics> {
        let path = Path::new(camera_id);
        let device = Device::with_path(path).map_err(|e| device_error(path, e))?;
        let formats = device.enum_formats().map_err(|e| {
            RemoteCamError::capability(format!("{}: cannot list formats: {}", camera_id, e))
        })?;

        let mut output_sizes: Vec<(PixelFormat, Vec<Resolution>)> = Vec::new();
        let mut rates = BTreeSet::new();

        for desc in formats {
            let layout = PixelFormat::from_fourcc(fourcc_code(&desc.fourcc));
            if matches!(layout, PixelFormat::Unsupported(_)) {
                trace!("{}: ignoring format {}", camera_id, desc.fourcc);
                continue;
            }

            let sizes = frame_sizes(&device, desc.fourcc);
            for size in &sizes {
                rates.extend(fixed_rates(&device, desc.fourcc, *size));
            }

            match output_sizes.iter_mut().find(|(f, _)| *f == layout) {
                Some((_, existing)) => {
                    for size in sizes {
                        if !existing.contains(&size) {
                            existing.push(size);
                        }
                    }
                }
                None => output_sizes.push((layout, sizes)),
            }
        }

        for (_, sizes) in output_sizes.iter_mut() {
            sizes.sort_by_key(Resolution::area);
        }

        Ok(SensorCharacteristics {
            output_sizes,
            fps_ranges: rates.into_iter().map(FpsRange::fixed).collect(),
            orientation: 0,
            continuous_autofocus: false,
        })
    }

    fn open_device(&self, camera_id: &str) -> Acquisition<Box<dyn CameraDevice>> {
        let path = PathBuf::from(camera_id);
        ready(
            Device::with_path(&path)
                .map(|handle| {
                    info!("Opened camera {}", path.display());
                    Box::new(V4l2Device {
                        camera_id: camera_id.to_string(),
                        path: path.clone(),
                        handle: Some(handle),
                    }) as Box<dyn CameraDevice>
                })
                .map_err(|e| device_error(&path, e)),
        )
    }
}

/// Discrete sizes; stepwise ranges contribute their two ends
fn frame_sizes(device: &Device, fourcc: FourCC) -> Vec<Resolution> {
    let mut sizes = Vec::new();
    for size in device.enum_framesizes(fourcc).unwrap_or_default() {
        match size.size {
            FrameSizeEnum::Discrete(d) => sizes.push(Resolution::new(d.width, d.height)),
            FrameSizeEnum::Stepwise(s) => {
                sizes.push(Resolution::new(s.min_width, s.min_height));
                sizes.push(Resolution::new(s.max_width, s.max_height));
            }
        }
    }
    sizes.dedup();
    sizes
}

/// Whole frame rates the device offers at one size
fn fixed_rates(device: &Device, fourcc: FourCC, size: Resolution) -> Vec<u32> {
    device
        .enum_frameintervals(fourcc, size.width, size.height)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|interval| match interval.interval {
            FrameIntervalEnum::Discrete(f) if f.numerator > 0 && f.denominator % f.numerator == 0 => {
                Some(f.denominator / f.numerator)
            }
            _ => None,
        })
        .filter(|fps| *fps > 0)
        .collect()
}

struct V4l2Device {
    camera_id: String,
    path: PathBuf,
    handle: Option<Device>,
}

impl CameraDevice for V4l2Device {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn create_session(&mut self, output: FrameReader) -> Acquisition<Box<dyn DeviceSession>> {
        if self.handle.is_none() {
            return ready(Err(RemoteCamError::device("camera already closed")));
        }
        ready(Ok(Box::new(V4l2Session {
            path: self.path.clone(),
            reader: output,
            worker: None,
            closed: false,
        })))
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed camera {}", self.path.display());
        }
    }
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

struct V4l2Session {
    path: PathBuf,
    reader: FrameReader,
    worker: Option<CaptureThread>,
    closed: bool,
}

impl DeviceSession for V4l2Session {
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        completions: mpsc::Sender<CaptureCompletion>,
    ) -> Result<()> {
        if self.closed {
            return Err(RemoteCamError::device("session already closed"));
        }
        self.stop_repeating();

        let device = Device::with_path(&self.path).map_err(|e| device_error(&self.path, e))?;
        let format = apply_format(&device, &request)?;
        if let Err(e) = device.set_params(&Parameters::with_fps(request.target_fps.upper)) {
            warn!("{}: cannot set frame rate: {}", self.path.display(), e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let reader = self.reader.clone();
        let path = self.path.clone();
        let join = std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || capture_loop(device, format, reader, completions, thread_stop, &path))
            .map_err(|e| RemoteCamError::device(format!("cannot start capture thread: {}", e)))?;

        self.worker = Some(CaptureThread { stop, join });
        Ok(())
    }

    /// Stop the capture thread and wait for it to release the device
    ///
    /// Blocks for up to one dequeue timeout; callers on an async runtime
    /// run this on the blocking pool.
    fn stop_repeating(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            if worker.join.join().is_err() {
                warn!("Capture thread for {} panicked", self.path.display());
            }
        }
    }

    fn close(&mut self) {
        self.stop_repeating();
        self.closed = true;
    }
}

impl Drop for V4l2Session {
    fn drop(&mut self) {
        // Signal only; the thread exits on its own within a dequeue timeout
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Set the first fourcc the device accepts at the requested size
fn apply_format(device: &Device, request: &CaptureRequest) -> Result<Format> {
    let offered: Vec<u32> = device
        .enum_formats()
        .map_err(|e| RemoteCamError::capability(format!("cannot list formats: {}", e)))?
        .iter()
        .map(|d| fourcc_code(&d.fourcc))
        .collect();

    let size = request.resolution;
    for code in candidate_fourccs(request.format) {
        if !offered.contains(code) {
            continue;
        }
        let wanted = Format::new(size.width, size.height, FourCC::new(&code.to_le_bytes()));
        match device.set_format(&wanted) {
            Ok(actual)
                if fourcc_code(&actual.fourcc) == *code
                    && actual.width == size.width
                    && actual.height == size.height =>
            {
                debug!("Negotiated {} {}x{}", actual.fourcc, actual.width, actual.height);
                return Ok(actual);
            }
            Ok(actual) => trace!(
                "Driver answered {} {}x{} for {}",
                actual.fourcc,
                actual.width,
                actual.height,
                wanted.fourcc
            ),
            Err(e) => trace!("set_format {} failed: {}", wanted.fourcc, e),
        }
    }

    Err(RemoteCamError::capability(format!(
        "no {} format at {}",
        request.format, size
    )))
}

fn capture_loop(
    device: Device,
    format: Format,
    reader: FrameReader,
    completions: mpsc::Sender<CaptureCompletion>,
    stop: Arc<AtomicBool>,
    path: &Path,
) {
    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{}: cannot map buffers: {}", path.display(), e);
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);

    let code = fourcc_code(&format.fourcc);
    let mut sequence = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                // Dropping `completions` reports the device as lost
                warn!("{}: capture failed: {}", path.display(), e);
                return;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let timestamp_ns =
            meta.timestamp.sec as u64 * 1_000_000_000 + meta.timestamp.usec as u64 * 1_000;
        let Some(frame) = to_raw_frame(code, &format, Bytes::copy_from_slice(&buf[..used])) else {
            trace!("{}: short buffer ({} bytes)", path.display(), used);
            continue;
        };

        if !reader.submit(frame.with_timestamp(timestamp_ns)) {
            break;
        }
        // Never block here: the session may be tearing down and waiting on us
        match completions.try_send(CaptureCompletion {
            sequence,
            timestamp_ns,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("{}: completion queue full, frame {} left in reader", path.display(), sequence);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
        sequence += 1;
    }
    debug!("{}: capture thread stopped after {} frames", path.display(), sequence);
}

/// View a driver buffer as a pipeline frame
///
/// Planar layouts keep sharing one allocation; each plane is a slice of it.
/// YUYV becomes a 4:2:0 view by reading chroma from every other row.
fn to_raw_frame(code: u32, format: &Format, data: Bytes) -> Option<RawFrame> {
    let width = format.width;
    let height = format.height;
    let w = width as usize;
    let h = height as usize;
    let stride = (format.stride as usize).max(w);
    let chroma_h = h.div_ceil(2);

    match code {
        fourcc::MJPG | fourcc::JPEG => {
            (!data.is_empty()).then(|| RawFrame::compressed(width, height, data))
        }
        fourcc::YU12 => {
            let chroma_stride = stride / 2;
            let y_len = stride * h;
            let c_len = chroma_stride * chroma_h;
            if data.len() < y_len + 2 * c_len {
                return None;
            }
            Some(RawFrame::planar(
                width,
                height,
                Plane::new(data.slice(..y_len), stride, 1),
                Plane::new(data.slice(y_len..y_len + c_len), chroma_stride, 1),
                Plane::new(data.slice(y_len + c_len..y_len + 2 * c_len), chroma_stride, 1),
            ))
        }
        fourcc::NV12 | fourcc::NV21 => {
            let y_len = stride * h;
            if data.len() < y_len + stride * chroma_h {
                return None;
            }
            let first = data.slice(y_len..);
            let second = data.slice(y_len + 1..);
            let (u, v) = if code == fourcc::NV12 {
                (first, second)
            } else {
                (second, first)
            };
            Some(RawFrame::planar(
                width,
                height,
                Plane::new(data.slice(..y_len), stride, 1),
                Plane::new(u, stride, 2),
                Plane::new(v, stride, 2),
            ))
        }
        fourcc::YUYV => {
            let stride = (format.stride as usize).max(w * 2);
            if data.len() < stride * h || data.len() < 4 {
                return None;
            }
            Some(RawFrame::planar(
                width,
                height,
                Plane::new(data.clone(), stride, 2),
                Plane::new(data.slice(1..), stride * 2, 4),
                Plane::new(data.slice(3..), stride * 2, 4),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(code: u32, width: u32, height: u32, stride: u32) -> Format {
        let mut format = Format::new(width, height, FourCC::new(&code.to_le_bytes()));
        format.stride = stride;
        format
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(candidate_fourccs(PixelFormat::Jpeg)[0], fourcc::MJPG);
        assert!(candidate_fourccs(PixelFormat::Yuv420).contains(&fourcc::YUYV));
        assert!(candidate_fourccs(PixelFormat::Unsupported(0)).is_empty());
    }

    #[test]
    fn test_nv21_swaps_chroma() {
        let fmt = format(fourcc::NV21, 4, 2, 4);
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&[10, 20, 11, 21]);
        let frame = to_raw_frame(fourcc::NV21, &fmt, Bytes::from(data)).unwrap();
        // NV21 stores V first
        assert_eq!(frame.planes[1].sample(0, 0), Some(20));
        assert_eq!(frame.planes[2].sample(0, 0), Some(10));
        assert_eq!(frame.planes[1].sample(1, 0), Some(21));
    }

    #[test]
    fn test_yuyv_view() {
        // 2x2 pixels: Y0 U Y1 V per row
        let fmt = format(fourcc::YUYV, 2, 2, 4);
        let data = Bytes::from_static(&[1, 50, 2, 60, 3, 51, 4, 61]);
        let frame = to_raw_frame(fourcc::YUYV, &fmt, data).unwrap();
        assert_eq!(frame.planes[0].sample(1, 1), Some(4));
        assert_eq!(frame.planes[1].sample(0, 0), Some(50));
        assert_eq!(frame.planes[2].sample(0, 0), Some(60));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let fmt = format(fourcc::YU12, 4, 4, 4);
        assert!(to_raw_frame(fourcc::YU12, &fmt, Bytes::from(vec![0u8; 10])).is_none());
        assert!(to_raw_frame(fourcc::MJPG, &fmt, Bytes::new()).is_none());
    }
}
