//! Cache and streaming configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the wave cache and its I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget for cached resources (default: 64MB)
    pub max_bytes: u64,
    /// Storage sector size; reads and stream windows align to it (default: 2048)
    pub sector_size: u64,
    /// Worker threads for the threaded backend (default: 2)
    pub io_threads: usize,
    /// Blocking waits longer than this log at warn level (default: 5ms)
    pub stall_warn_ms: u64,
    /// Streaming window sizing
    pub stream: StreamConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            sector_size: 2048,
            io_threads: 2,
            stall_warn_ms: 5,
            stream: StreamConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create config with a custom byte budget.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ..Default::default()
        }
    }

    /// Set the sector size (minimum 1).
    pub fn sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = sector_size.max(1);
        self
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_warn_ms)
    }
}

/// How [`crate::WaveReader`] sizes stream windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Worst-case time for one window read to land (default: 100ms)
    pub worst_case_latency_ms: u64,
    /// Windows per session on this platform (default: 2)
    pub buffer_count: usize,
    /// Smallest window in bytes (default: 16KB)
    pub min_buffer_bytes: u64,
    /// Largest window in bytes (default: 512KB)
    pub max_buffer_bytes: u64,
    /// Window growth for compressed sources (default: 2.0)
    pub compressed_widening: f64,
    /// Window growth for looping sources (default: 1.5)
    pub loop_widening: f64,
    /// Sources up to this size load whole instead of streaming (default: 256KB)
    pub monolithic_max_bytes: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            worst_case_latency_ms: 100,
            buffer_count: 2,
            min_buffer_bytes: 16 * 1024,
            max_buffer_bytes: 512 * 1024,
            compressed_widening: 2.0,
            loop_widening: 1.5,
            monolithic_max_bytes: 256 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn worst_case_latency(&self) -> Duration {
        Duration::from_millis(self.worst_case_latency_ms)
    }
}
