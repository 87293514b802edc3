//! Performance metrics for the capture pipeline
//!
//! Provides:
//! - Rolling averages of encode and per-frame processing latency
//! - Encoded byte counters for throughput
//! - The periodic quick status pushed to observers

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// Minimum window over which throughput is recomputed
const THROUGHPUT_WINDOW: Duration = Duration::from_millis(500);

/// Lightweight periodic status
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickStats {
    /// Processing time of the most recent kept frame
    pub last_frame_latency_ms: u32,
    /// Encoded output rate over the last window, in kB/s
    pub throughput_kbps: u32,
}

impl std::fmt::Display for QuickStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms {}kB/sec", self.last_frame_latency_ms, self.throughput_kbps)
    }
}

/// Latency statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Average encode latency in milliseconds
    pub encode_latency_ms: f64,
    /// Average completion-to-fan-out latency in milliseconds
    pub frame_latency_ms: f64,
    /// Kept frames per second
    pub fps: f64,
    /// Frames encoded
    pub frames_processed: u64,
    /// Frames dropped by the encoder
    pub frames_dropped: u64,
}

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug)]
struct ThroughputWindow {
    started: Instant,
    kbps: u32,
}

/// Performance metrics collector
///
/// Written by the capture worker, read by the status ticker and stats
/// queries.
#[derive(Debug)]
pub struct PerformanceMetrics {
    encode_latency: RwLock<RollingAverage>,
    frame_latency: RwLock<RollingAverage>,
    /// Intervals between kept frames
    frame_intervals: RwLock<RollingAverage>,
    last_frame_at: RwLock<Option<Instant>>,
    last_frame_latency_us: AtomicU64,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
    /// Bytes since the throughput window started
    window_bytes: AtomicU64,
    window: RwLock<ThroughputWindow>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            encode_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            frame_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            frame_intervals: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            last_frame_at: RwLock::new(None),
            last_frame_latency_us: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            window_bytes: AtomicU64::new(0),
            window: RwLock::new(ThroughputWindow {
                started: Instant::now(),
                kbps: 0,
            }),
        }
    }

    /// Record encode stage timing
    pub fn record_encode(&self, duration: Duration) {
        self.encode_latency.write().add(duration);
    }

    /// Record a fully processed frame and its encoded size
    pub fn record_frame(&self, latency: Duration, encoded_bytes: usize) {
        let now = Instant::now();
        self.frame_latency.write().add(latency);
        self.last_frame_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.window_bytes
            .fetch_add(encoded_bytes as u64, Ordering::Relaxed);

        let mut last = self.last_frame_at.write();
        if let Some(prev) = *last {
            self.frame_intervals.write().add(now.duration_since(prev));
        }
        *last = Some(now);
    }

    /// Record a frame the encoder could not produce
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames encoded so far
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Frames dropped so far
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Current encoded throughput in kB/s
    fn throughput_kbps(&self) -> u32 {
        let now = Instant::now();
        let mut window = self.window.write();
        let elapsed = now.duration_since(window.started);

        if elapsed >= THROUGHPUT_WINDOW {
            let bytes = self.window_bytes.swap(0, Ordering::Relaxed);
            window.kbps = (bytes as f64 / 1024.0 / elapsed.as_secs_f64()) as u32;
            window.started = now;
        }
        window.kbps
    }

    /// Snapshot for the periodic quick status
    pub fn quick_stats(&self) -> QuickStats {
        QuickStats {
            last_frame_latency_ms: (self.last_frame_latency_us.load(Ordering::Relaxed) / 1000)
                as u32,
            throughput_kbps: self.throughput_kbps(),
        }
    }

    /// Get current latency statistics
    pub fn get_stats(&self) -> LatencyStats {
        let interval = self.frame_intervals.read().average();
        let fps = if interval.is_zero() {
            0.0
        } else {
            1.0 / interval.as_secs_f64()
        };

        LatencyStats {
            encode_latency_ms: self.encode_latency.read().average_ms(),
            frame_latency_ms: self.frame_latency.read().average_ms(),
            fps,
            frames_processed: self.frames_processed(),
            frames_dropped: self.frames_dropped(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.encode_latency.write().clear();
        self.frame_latency.write().clear();
        self.frame_intervals.write().clear();
        *self.last_frame_at.write() = None;
        self.last_frame_latency_us.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.window_bytes.store(0, Ordering::Relaxed);
        let mut window = self.window.write();
        window.started = Instant::now();
        window.kbps = 0;
    }
}

/// Create a shared performance metrics instance
pub fn create_metrics() -> Arc<PerformanceMetrics> {
    Arc::new(PerformanceMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average() {
        let mut avg = RollingAverage::new(3);
        avg.add(Duration::from_millis(10));
        avg.add(Duration::from_millis(20));
        avg.add(Duration::from_millis(30));
        assert!((avg.average_ms() - 20.0).abs() < 0.1);

        // oldest falls out
        avg.add(Duration::from_millis(40));
        assert!((avg.average_ms() - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_record_frame() {
        let metrics = PerformanceMetrics::new();
        metrics.record_encode(Duration::from_millis(4));
        metrics.record_frame(Duration::from_millis(7), 2048);
        metrics.record_frame_dropped();

        let stats = metrics.get_stats();
        assert!(stats.encode_latency_ms > 0.0);
        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(metrics.quick_stats().last_frame_latency_ms, 7);
    }

    #[test]
    fn test_throughput_window() {
        let metrics = PerformanceMetrics::new();
        metrics.record_frame(Duration::from_millis(1), 100 * 1024);
        // window not elapsed yet
        assert_eq!(metrics.quick_stats().throughput_kbps, 0);

        metrics.window.write().started = Instant::now() - Duration::from_secs(1);
        let kbps = metrics.quick_stats().throughput_kbps;
        assert!((90..=100).contains(&kbps), "got {}", kbps);
    }

    #[test]
    fn test_reset() {
        let metrics = PerformanceMetrics::new();
        metrics.record_frame(Duration::from_millis(1), 10);
        metrics.record_frame_dropped();
        metrics.reset();
        assert_eq!(metrics.frames_processed(), 0);
        assert_eq!(metrics.frames_dropped(), 0);
        assert_eq!(metrics.quick_stats(), QuickStats::default());
    }

    #[test]
    fn test_quick_stats_display() {
        let quick = QuickStats {
            last_frame_latency_ms: 12,
            throughput_kbps: 340,
        };
        assert_eq!(quick.to_string(), "12ms 340kB/sec");
    }
}
