//! File reads that complete on a foreign thread, and the handle-based LRU
//! resource cache the wavestream core is built on.
//!
//! # Overview
//!
//! - [`AsyncIo`]: issue a read, poll or block on its [`IoTicket`], abort, re-prioritise
//! - [`ThreadedIo`]: worker-thread backend (feature `threaded`, on by default)
//! - [`ManualIo`]: backend that only completes reads when told to, for deterministic tests
//! - [`ResourceCache`] / [`LruCache`]: budgeted, lockable, generation-checked handle cache
//!
//! # Example
//!
//! ```ignore
//! use wavestream_io::{AsyncIo, FileId, Priority, ReadRequest, ThreadedIo};
//!
//! let io = ThreadedIo::new(2)?;
//! let ticket = io.issue_read(
//!     ReadRequest::new(FileId::new("music.raw"), 0, vec![0; 4096], Priority::Normal),
//!     Box::new(|done| println!("{} bytes", done.bytes_read)),
//! );
//! io.finish(&ticket, true);
//! ```

pub mod error;
pub use error::{Error, Result};

mod file;
pub use file::FileId;

mod request;
pub use request::{CompletionFn, Priority, ReadCompletion, ReadRequest, ReadStatus};

mod ticket;
pub use ticket::{AsyncIo, IoStatus, IoTicket};

mod manual;
pub use manual::ManualIo;

#[cfg(feature = "threaded")]
mod threaded;
#[cfg(feature = "threaded")]
pub use threaded::ThreadedIo;

pub mod lru;
pub use lru::{CacheHandle, CacheStatus, Cost, LruCache, ResourceCache};
