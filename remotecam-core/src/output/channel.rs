//! Bounded fan-out channel for encoded frames
//!
//! The capture worker publishes each encoded frame once; every subscriber
//! owns a bounded queue of its own. Publishing never waits: a subscriber
//! whose queue is full loses the new frame, everyone else still gets it.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Default per-subscriber queue depth
pub const DEFAULT_CAPACITY: usize = 10;

struct ChannelInner {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames handed to `publish`
    pub published: u64,
    /// Per-subscriber deliveries lost to a full queue
    pub dropped: u64,
    /// Live subscribers
    pub subscribers: usize,
}

/// Producer side of the encoded frame channel
#[derive(Clone)]
pub struct StreamChannel {
    inner: Arc<ChannelInner>,
}

impl StreamChannel {
    /// Create a channel with the given per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                capacity: capacity.max(1),
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Per-subscriber capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Offer a frame to every subscriber without blocking
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, frame: Bytes) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Subscriber queue full, dropping newest frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Stream subscriber went away");
                false
            }
        });
        delivered
    }

    /// Attach a new consumer
    ///
    /// A subscriber of a closed channel sees end-of-stream immediately.
    pub fn subscribe(&self) -> FrameReceiver {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let mut subscribers = self.inner.subscribers.lock();
        // `closed` only flips under this lock
        if !self.is_closed() {
            subscribers.push(tx);
        }
        FrameReceiver { rx }
    }

    /// End the stream for every subscriber
    ///
    /// Queued frames stay readable; once drained, receivers return `None`.
    pub fn close(&self) {
        let mut subscribers = self.inner.subscribers.lock();
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            subscribers.clear();
            debug!("Stream channel closed");
        }
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for StreamChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Consumer side, one per connected client
pub struct FrameReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl FrameReceiver {
    /// Wait for the next frame; `None` once the channel is closed and drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a queued frame without waiting
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Frames currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
