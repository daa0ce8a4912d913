//! Centralized error type for the wavestream umbrella crate.
//!
//! Wraps both subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cache: {0}")]
    Cache(#[from] wavestream_cache::Error),

    #[error("I/O backend: {0}")]
    Backend(#[from] wavestream_io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
