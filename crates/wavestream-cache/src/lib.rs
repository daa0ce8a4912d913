//! Asynchronous, memory-budgeted cache for streaming audio sample data.
//!
//! Serves "bytes `[offset, offset + len)` of file F" to a real-time mixer,
//! either as a whole-file load or as a rolling multi-buffer window over a
//! large file. Disk reads overlap playback, identical windows are shared
//! between concurrent streams, and every copy is clamped to what actually
//! arrived.
//!
//! # Features
//!
//! - **Wave resources**: one in-flight or completed byte-range read, completed on an I/O thread
//! - **Whole-file loads**: find-or-create by file, copy or borrow with forced completion
//! - **Stream sessions**: ring of N windows, rotated and prefetched as the reader drains them
//! - **Shared windows**: identical `(file, offset)` windows resolve to one cached read
//! - **Reader adapter**: sample-indexed pull contract on top of either mode
//!
//! # Example
//!
//! ```ignore
//! use wavestream_cache::{CacheConfig, SessionFlags, SessionParams, WaveCache};
//!
//! let mut cache = WaveCache::threaded(CacheConfig::default())?;
//! let session = cache.open_session(SessionParams {
//!     file: "music.raw".into(),
//!     data_size: 1 << 20,
//!     data_start: 0,
//!     start_pos: 0,
//!     loop_pos: None,
//!     buffer_size: 64 * 1024,
//!     buffer_count: 2,
//!     flags: SessionFlags::SHARED,
//! })?;
//!
//! let mut out = vec![0u8; 4096];
//! let copied = cache.read_streaming(session, &mut out, 0, 4096)?;
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

mod config;
pub use config::{CacheConfig, StreamConfig};

mod metrics;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};

mod report;
pub use report::{IssueReporter, LoadIssue};

mod key;
pub use key::BufferKey;

mod resource;
pub use resource::{AsyncWaveResource, ResourceState};

mod orchestrator;
pub use orchestrator::{
    CopyOutcome, LoadProgress, LoadSpec, MemoryReport, MemoryRow, PointerOutcome, SessionFlags,
    SessionId, SessionInfo, SessionParams, SessionWindow, SharedWaveCache, WaveCache,
    MAX_BUFFER_COUNT,
};

pub mod reader;
pub use reader::{BufferPlan, Passthrough, PcmEndian, PostProcess, WaveFormat, WaveReader, WaveSource};

// Collaborator types callers need at the boundary
pub use wavestream_io::{AsyncIo, CacheHandle, CacheStatus, FileId, LruCache, ManualIo, Priority, ResourceCache};

#[cfg(feature = "threaded")]
pub use wavestream_io::ThreadedIo;
