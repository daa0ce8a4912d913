//! Error types.

use thiserror::Error;
use wavestream_io::FileId;

use crate::orchestrator::SessionId;

/// Error type.
///
/// Missing files, short reads and evicted handles are not errors; they come
/// back as `false`/empty outcomes and, where noted, a [`crate::LoadIssue`].
#[derive(Error, Debug)]
pub enum Error {
    /// I/O backend error.
    #[error("I/O backend error: {0}")]
    Io(#[from] wavestream_io::Error),

    /// Session handle is not open.
    #[error("Unknown stream session: {0}")]
    UnknownSession(SessionId),

    /// Session geometry rejected.
    #[error("Invalid stream session: {0}")]
    InvalidSession(String),

    /// A load was issued on a resource that is still loading.
    #[error("Load already in progress for {0}")]
    LoadInProgress(FileId),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
