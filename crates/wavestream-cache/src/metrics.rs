//! Cache efficiency and stall counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated by the cache and its resources.
#[derive(Default)]
pub struct CacheMetrics {
    /// Bytes requested from storage (aligned)
    bytes_requested: AtomicU64,
    /// Reads issued
    read_ops: AtomicU64,
    /// Lookups served by an existing resource
    cache_hits: AtomicU64,
    /// Lookups that created a resource
    cache_misses: AtomicU64,
    /// Blocking accessors that had to wait for I/O
    stalls: AtomicU64,
    /// Total time spent in those waits
    stall_micros: AtomicU64,
    /// Missing-file reports sent
    missing_reports: AtomicU64,
    /// Size mismatches reported
    size_mismatches: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_read(&self, bytes: u64) {
        self.bytes_requested.fetch_add(bytes, Ordering::Relaxed);
        self.read_ops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stall(&self, waited: Duration) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
        self.stall_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_missing(&self) {
        self.missing_reports.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_size_mismatch(&self) {
        self.size_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            bytes_requested: self.bytes_requested.load(Ordering::Relaxed),
            read_ops: self.read_ops.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            stall_micros: self.stall_micros.load(Ordering::Relaxed),
            missing_reports: self.missing_reports.load(Ordering::Relaxed),
            size_mismatches: self.size_mismatches.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_requested,
            &self.read_ops,
            &self.cache_hits,
            &self.cache_misses,
            &self.stalls,
            &self.stall_micros,
            &self.missing_reports,
            &self.size_mismatches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub bytes_requested: u64,
    pub read_ops: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stalls: u64,
    pub stall_micros: u64,
    pub missing_reports: u64,
    pub size_mismatches: u64,
}

impl CacheMetricsSnapshot {
    /// Calculate cache hit rate (0.0 - 1.0).
    ///
    /// Returns 1.0 if no lookups have occurred.
    pub fn cache_hit_rate(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            1.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }

    /// Average blocking wait.
    pub fn avg_stall(&self) -> Duration {
        if self.stalls == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.stall_micros / self.stalls)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = CacheMetrics::new();

        metrics.record_read(4096);
        metrics.record_read(2048);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_missing();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_requested, 6144);
        assert_eq!(snapshot.read_ops, 2);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.missing_reports, 1);
        assert_eq!(snapshot.size_mismatches, 0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let snapshot = CacheMetricsSnapshot {
            cache_hits: 75,
            cache_misses: 25,
            ..Default::default()
        };
        assert!((snapshot.cache_hit_rate() - 0.75).abs() < 0.001);

        let empty = CacheMetricsSnapshot::default();
        assert!((empty.cache_hit_rate() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_avg_stall() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.snapshot().avg_stall(), Duration::ZERO);

        metrics.record_stall(Duration::from_micros(300));
        metrics.record_stall(Duration::from_micros(100));
        assert_eq!(metrics.snapshot().avg_stall(), Duration::from_micros(200));
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_read(1024);
        metrics.record_stall(Duration::from_millis(1));

        metrics.reset();
        assert_eq!(metrics.snapshot(), CacheMetricsSnapshot::default());
    }
}
