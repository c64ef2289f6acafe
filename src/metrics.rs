//! Write Latency Metrics
//!
//! Times every call through the write path and flags slow ones.
//!
//! Percentiles are computed over a sliding window of recent successful
//! writes; counters cover the engine's lifetime.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{info, warn};

/// Slow writes kept for inspection
const MAX_SLOW_WRITES: usize = 64;

/// Summary of write latencies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteLatencyStats {
    /// Successful writes since open
    pub writes: u64,
    /// Writes that returned an error (validation and conflicts included)
    pub failed_writes: u64,
    /// Successful writes slower than the configured threshold
    pub slow_writes: u64,
    /// Samples the percentiles below are computed over
    pub window: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// A write that exceeded the slow-write threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowWrite {
    pub kind: &'static str,
    pub lsn: u64,
    pub duration: Duration,
}

/// Sliding-window latency tracker for the write path
#[derive(Debug)]
pub struct WriteLatencyTracker {
    window_size: usize,
    threshold: Duration,
    samples: VecDeque<Duration>,
    writes: u64,
    failed: u64,
    slow: u64,
    recent_slow: VecDeque<SlowWrite>,
}

impl WriteLatencyTracker {
    pub fn new(window_size: usize, threshold: Duration) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            threshold,
            samples: VecDeque::with_capacity(window_size),
            writes: 0,
            failed: 0,
            slow: 0,
            recent_slow: VecDeque::new(),
        }
    }

    /// Record a committed write
    pub fn record_write(&mut self, kind: &'static str, lsn: u64, duration: Duration) {
        self.writes += 1;
        if self.samples.len() == self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);

        if duration > self.threshold {
            self.slow += 1;
            warn!(
                kind,
                lsn,
                duration_us = duration.as_micros() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "slow write"
            );
            if self.recent_slow.len() == MAX_SLOW_WRITES {
                self.recent_slow.pop_front();
            }
            self.recent_slow.push_back(SlowWrite { kind, lsn, duration });
        }
    }

    /// Record a write that returned an error
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn stats(&self) -> WriteLatencyStats {
        let mut stats = WriteLatencyStats {
            writes: self.writes,
            failed_writes: self.failed,
            slow_writes: self.slow,
            window: self.samples.len(),
            ..WriteLatencyStats::default()
        };
        if self.samples.is_empty() {
            return stats;
        }

        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        stats.min = sorted[0];
        stats.max = sorted[sorted.len() - 1];
        stats.mean = total / sorted.len() as u32;
        stats.p50 = nearest_rank(&sorted, 0.50);
        stats.p95 = nearest_rank(&sorted, 0.95);
        stats.p99 = nearest_rank(&sorted, 0.99);
        stats
    }

    /// Most recent slow writes, oldest first
    pub fn slow_writes(&self) -> Vec<SlowWrite> {
        self.recent_slow.iter().cloned().collect()
    }

    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            writes = stats.writes,
            failed = stats.failed_writes,
            mean_us = stats.mean.as_micros() as u64,
            p50_us = stats.p50.as_micros() as u64,
            p95_us = stats.p95.as_micros() as u64,
            p99_us = stats.p99.as_micros() as u64,
            max_us = stats.max.as_micros() as u64,
            slow = stats.slow_writes,
            "write latency summary"
        );
        if stats.slow_writes > 0 {
            let percent = stats.slow_writes as f64 / stats.writes.max(1) as f64 * 100.0;
            let percent = format!("{:.2}", percent);
            warn!(
                slow = stats.slow_writes,
                percent = %percent,
                threshold_ms = self.threshold.as_millis() as u64,
                "writes exceeded the slow-write threshold"
            );
        }
    }
}

/// `sorted` must be non-empty
fn nearest_rank(sorted: &[Duration], quantile: f64) -> Duration {
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
