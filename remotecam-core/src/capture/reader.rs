//! Latest-only frame reader
//!
//! The hardware side submits frames, the capture worker acquires only the
//! newest one. Older frames are discarded: a stale-but-current frame is
//! preferred over a growing backlog.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::formats::PixelFormat;
use crate::types::{RawFrame, Resolution};

/// Frames the reader holds before dropping the oldest
pub const MAX_IMAGES: usize = 4;

struct ReaderInner {
    resolution: Resolution,
    format: PixelFormat,
    max_images: usize,
    queue: Mutex<VecDeque<RawFrame>>,
    closed: AtomicBool,
    overflowed: AtomicU64,
}

/// Bounded frame buffer shared between a device session and the worker
#[derive(Clone)]
pub struct FrameReader {
    inner: Arc<ReaderInner>,
}

impl FrameReader {
    /// Create a reader for frames of the given size and layout
    pub fn new(resolution: Resolution, format: PixelFormat, max_images: usize) -> Self {
        let max_images = max_images.max(1);
        Self {
            inner: Arc::new(ReaderInner {
                resolution,
                format,
                max_images,
                queue: Mutex::new(VecDeque::with_capacity(max_images)),
                closed: AtomicBool::new(false),
                overflowed: AtomicU64::new(0),
            }),
        }
    }

    /// Size the reader was allocated for
    pub fn resolution(&self) -> Resolution {
        self.inner.resolution
    }

    /// Layout the reader was allocated for
    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    /// Hand a frame to the reader; false once the reader is closed
    pub fn submit(&self, frame: RawFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.max_images {
            queue.pop_front();
            self.inner.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(frame);
        true
    }

    /// Take the newest frame and discard everything older
    pub fn acquire_latest(&self) -> Option<RawFrame> {
        let mut queue = self.inner.queue.lock();
        let latest = queue.pop_back();
        if !queue.is_empty() {
            trace!("Discarding {} stale frame(s)", queue.len());
            queue.clear();
        }
        latest
    }

    /// Drop all pending frames, returning how many there were
    pub fn discard_all(&self) -> usize {
        let mut queue = self.inner.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    /// Frames waiting to be acquired
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Frames dropped because the reader was full
    pub fn overflowed(&self) -> u64 {
        self.inner.overflowed.load(Ordering::Relaxed)
    }

    /// Release buffered frames and refuse new ones
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.queue.lock().clear();
    }

    /// Whether the reader has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("resolution", &self.inner.resolution)
            .field("format", &self.inner.format)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
