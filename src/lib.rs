//! # wavestream - Streaming Audio Cache
//!
//! Asynchronous, memory-budgeted cache that feeds audio sample data from
//! storage to a real-time mixer without blocking it.
//!
//! ## Architecture
//!
//! wavestream is an umbrella crate that coordinates:
//! - **wavestream-io** - Async read primitive (threaded and manual backends) and the handle-based LRU cache
//! - **wavestream-cache** - Wave resources, the monolithic/streaming orchestrator, and the sample reader
//!
//! ## Quick Start
//!
//! ```ignore
//! use wavestream::prelude::*;
//!
//! let cache = WaveCache::threaded(CacheConfig::default())?.into_shared();
//!
//! let source = WaveSource::new("music.raw", 44, 8 << 20, WaveFormat::pcm(48_000, 2, 16));
//! let mut reader = WaveReader::open(cache.clone(), source)?;
//!
//! while !reader.is_ready() {}
//! let frames = reader.read_samples(0, 512)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Threaded I/O backend
//! - `threaded` - Worker-thread reads (`ThreadedIo`, `WaveCache::threaded`)

/// Re-export of wavestream-io for direct access
pub use wavestream_io as io;

/// Re-export of wavestream-cache for direct access
pub use wavestream_cache as cache;

// Cache core
pub use wavestream_cache::{
    AsyncWaveResource, BufferKey, CacheConfig, CacheMetricsSnapshot, CopyOutcome, LoadIssue,
    LoadProgress, LoadSpec, MemoryReport, MemoryRow, PointerOutcome, ResourceState, SessionFlags,
    SessionId, SessionInfo, SessionParams, SessionWindow, SharedWaveCache, StreamConfig,
    WaveCache,
};

// Reader adapter
pub use wavestream_cache::{
    BufferPlan, Passthrough, PcmEndian, PostProcess, WaveFormat, WaveReader, WaveSource,
};

// I/O and cache collaborators
pub use wavestream_io::{
    AsyncIo, CacheHandle, CacheStatus, Cost, FileId, IoStatus, IoTicket, LruCache, ManualIo,
    Priority, ResourceCache,
};

#[cfg(feature = "threaded")]
pub use wavestream_io::ThreadedIo;

mod error;
pub use error::{Error, Result};

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{Error, Result};

    pub use crate::{
        CacheConfig, FileId, LoadSpec, Priority, SessionFlags, SessionParams, SharedWaveCache,
        StreamConfig, WaveCache,
    };

    pub use crate::{PcmEndian, PostProcess, WaveFormat, WaveReader, WaveSource};

    pub use crate::{AsyncIo, ManualIo};

    #[cfg(feature = "threaded")]
    pub use crate::ThreadedIo;
}
