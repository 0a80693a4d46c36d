//! Per-session diagnostics counters and helpers.
//!
//! A [`SessionStats`] instance is created for every engine session and
//! shared (via `Arc`) between the capture callback, the analysis thread and
//! the control surface. All fields are atomics, so updates from the capture
//! thread never block. Throttled log lines are driven from these counters
//! instead of process-wide statics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub windows_captured: u64,
    pub windows_dropped: u64,
    pub windows_superseded: u64,
    pub windows_processed: u64,
    pub coughs_detected: u64,
    pub model_fallbacks: u64,
    pub processing_errors: u64,
    pub silent_windows: u64,
    pub clipped_windows: u64,
    pub last_confidence: f32,
    pub first_cough_at_ms: Option<u64>,
    pub last_cough_at_ms: Option<u64>,
    pub inference_avg_us: f32,
    pub inference_max_us: f32,
}

/// Lock-free counters for one capture/analysis session
#[derive(Debug, Default)]
pub struct SessionStats {
    windows_captured: AtomicU64,
    windows_dropped: AtomicU64,
    windows_superseded: AtomicU64,
    windows_processed: AtomicU64,
    coughs_detected: AtomicU64,
    model_fallbacks: AtomicU64,
    processing_errors: AtomicU64,
    silent_windows: AtomicU64,
    clipped_windows: AtomicU64,
    non_cough_windows: AtomicU64,
    last_confidence_bits: AtomicU32,
    // 0 means "no cough yet"
    first_cough_at_ms: AtomicU64,
    last_cough_at_ms: AtomicU64,
    inference_avg_bits: AtomicU32,
    inference_max_bits: AtomicU32,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) -> u64 {
        self.windows_captured.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.windows_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self, count: u64) {
        if count > 0 {
            self.windows_superseded.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_processed(&self, confidence: f32) -> u64 {
        self.last_confidence_bits
            .store(confidence.to_bits(), Ordering::Relaxed);
        self.windows_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_cough(&self, timestamp_ms: u64) -> u64 {
        let _ = self.first_cough_at_ms.compare_exchange(
            0,
            timestamp_ms,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.last_cough_at_ms.store(timestamp_ms, Ordering::Relaxed);
        self.coughs_detected.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the running non-cough count, used for throttled logging
    pub fn record_non_cough(&self) -> u64 {
        self.non_cough_windows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_model_fallback(&self) {
        self.model_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running silent-window count, used for throttled logging
    pub fn record_silent(&self) -> u64 {
        self.silent_windows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_clipped(&self) -> u64 {
        self.clipped_windows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_inference_latency(&self, avg_us: f32, max_us: f32) {
        self.inference_avg_bits
            .store(avg_us.to_bits(), Ordering::Relaxed);
        self.inference_max_bits
            .store(max_us.to_bits(), Ordering::Relaxed);
    }

    pub fn windows_captured(&self) -> u64 {
        self.windows_captured.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let first = self.first_cough_at_ms.load(Ordering::Relaxed);
        let last = self.last_cough_at_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            windows_captured: self.windows_captured.load(Ordering::Relaxed),
            windows_dropped: self.windows_dropped.load(Ordering::Relaxed),
            windows_superseded: self.windows_superseded.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            coughs_detected: self.coughs_detected.load(Ordering::Relaxed),
            model_fallbacks: self.model_fallbacks.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            silent_windows: self.silent_windows.load(Ordering::Relaxed),
            clipped_windows: self.clipped_windows.load(Ordering::Relaxed),
            last_confidence: f32::from_bits(self.last_confidence_bits.load(Ordering::Relaxed)),
            first_cough_at_ms: (first != 0).then_some(first),
            last_cough_at_ms: (last != 0).then_some(last),
            inference_avg_us: f32::from_bits(self.inference_avg_bits.load(Ordering::Relaxed)),
            inference_max_us: f32::from_bits(self.inference_max_bits.load(Ordering::Relaxed)),
        }
    }
}

/// Latency tracker maintains a rolling window to compute avg/max latency.
#[derive(Debug)]
pub struct LatencyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.max(1)),
            max_samples: max_samples.max(1),
        }
    }

    /// Add one observation and return `(avg, max, count)` over the window
    pub fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f32 };
        (avg, max, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = SessionStats::new();
        assert_eq!(stats.record_captured(), 1);
        assert_eq!(stats.record_captured(), 2);
        stats.record_dropped();
        stats.record_superseded(3);
        stats.record_superseded(0);
        stats.record_processed(0.42);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.windows_captured, 2);
        assert_eq!(snapshot.windows_dropped, 1);
        assert_eq!(snapshot.windows_superseded, 3);
        assert_eq!(snapshot.windows_processed, 1);
        assert!((snapshot.last_confidence - 0.42).abs() < 1e-6);
        assert_eq!(snapshot.first_cough_at_ms, None);
    }

    #[test]
    fn test_first_cough_is_kept() {
        let stats = SessionStats::new();
        stats.record_cough(1_000);
        stats.record_cough(2_000);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.coughs_detected, 2);
        assert_eq!(snapshot.first_cough_at_ms, Some(1_000));
        assert_eq!(snapshot.last_cough_at_ms, Some(2_000));
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = SessionStats::new();
        let b = SessionStats::new();
        a.record_silent();
        a.record_silent();
        assert_eq!(a.snapshot().silent_windows, 2);
        assert_eq!(b.snapshot().silent_windows, 0);
    }

    #[test]
    fn test_latency_tracker_window() {
        let mut tracker = LatencyTracker::new(2);
        assert_eq!(tracker.observe(10.0), (10.0, 10.0, 1));
        assert_eq!(tracker.observe(20.0), (15.0, 20.0, 2));
        let (avg, max, count) = tracker.observe(40.0);
        assert_eq!(count, 2);
        assert!((avg - 30.0).abs() < 1e-6);
        assert_eq!(max, 40.0);
    }
}
