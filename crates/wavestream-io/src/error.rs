//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A worker thread could not be started.
    #[error("Failed to spawn I/O worker {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// Backend was configured with no worker threads.
    #[error("I/O backend needs at least one worker thread")]
    NoWorkers,
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
