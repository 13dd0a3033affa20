//! Rolling latency window.
//!
//! The `HealthMonitor` keeps the last N latency observations in a fixed-capacity
//! ring and aggregates only the samples younger than a caller-supplied window,
//! so old spikes age out even while the ring still holds them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_WINDOW_CAPACITY;
use crate::hlog_trace;

/// One latency observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub timestamp: Instant,
    pub latency_ms: f64,
}

/// Clamp a raw latency reading to a finite, non-negative value.
pub fn sanitize_latency(latency_ms: f64) -> f64 {
    if latency_ms.is_finite() && latency_ms > 0.0 {
        latency_ms
    } else {
        0.0
    }
}

/// Bounded, thread-safe latency window.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hush::governance::HealthMonitor;
///
/// let monitor = HealthMonitor::new(3);
/// monitor.record(120.0);
/// monitor.record(-5.0);
/// assert_eq!(monitor.max(Duration::from_secs(60), 0.0), 120.0);
/// assert_eq!(monitor.average(Duration::from_secs(60), 0.0), 60.0);
/// ```
#[derive(Debug)]
pub struct HealthMonitor {
    capacity: usize,
    samples: Mutex<VecDeque<LatencySample>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl HealthMonitor {
    /// Create a monitor holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a latency observed now. Returns the stored (clamped) value.
    pub fn record(&self, latency_ms: f64) -> f64 {
        self.record_at(latency_ms, Instant::now())
    }

    /// Record a latency observed at `timestamp`.
    pub fn record_at(&self, latency_ms: f64, timestamp: Instant) -> f64 {
        let value = sanitize_latency(latency_ms);
        let mut samples = self.lock();
        samples.push_back(LatencySample {
            timestamp,
            latency_ms: value,
        });
        while samples.len() > self.capacity {
            samples.pop_front();
        }
        hlog_trace!("HealthMonitor::record {}ms (window={})", value, samples.len());
        value
    }

    /// Mean latency of samples younger than `window`, or `fallback` when none.
    pub fn average(&self, window: Duration, fallback: f64) -> f64 {
        self.average_at(window, fallback, Instant::now())
    }

    pub fn average_at(&self, window: Duration, fallback: f64, now: Instant) -> f64 {
        let samples = self.lock();
        let (sum, count) = in_window(&samples, window, now)
            .fold((0.0, 0usize), |(sum, count), s| (sum + s.latency_ms, count + 1));
        if count == 0 {
            fallback
        } else {
            sum / count as f64
        }
    }

    /// Largest latency among samples younger than `window`, or `fallback` when none.
    pub fn max(&self, window: Duration, fallback: f64) -> f64 {
        self.max_at(window, fallback, Instant::now())
    }

    pub fn max_at(&self, window: Duration, fallback: f64, now: Instant) -> f64 {
        let samples = self.lock();
        in_window(&samples, window, now)
            .map(|s| s.latency_ms)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
            .unwrap_or(fallback)
    }

    pub fn sample_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<LatencySample> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LatencySample>> {
        // Samples are plain data; a panic mid-push cannot leave them inconsistent.
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn in_window<'a>(
    samples: &'a VecDeque<LatencySample>,
    window: Duration,
    now: Instant,
) -> impl Iterator<Item = &'a LatencySample> + 'a {
    samples
        .iter()
        .filter(move |s| now.saturating_duration_since(s.timestamp) < window)
}
