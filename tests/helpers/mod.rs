//! Test helpers and fixtures for wavestream integration tests
//!
//! Fixture files hold a repeating byte pattern, so any byte range can be
//! checked with [`pattern`] without keeping the source around. Caches are
//! built on [`ManualIo`] unless a test needs real worker threads, which
//! makes "the read has not landed yet" reproducible.

#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use wavestream::prelude::*;
use wavestream::SessionId;

/// Period of the fixture byte pattern (prime, so it never lines up with sectors).
pub const PATTERN_PERIOD: usize = 251;

/// Upper bound on waiting for worker-thread reads.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub fn pattern_byte(index: usize) -> u8 {
    (index % PATTERN_PERIOD) as u8
}

/// Expected fixture bytes for a file range.
pub fn pattern(range: std::ops::Range<usize>) -> Vec<u8> {
    range.map(pattern_byte).collect()
}

/// Temp file of `len` pattern bytes.
pub fn fixture(len: usize) -> NamedTempFile {
    write_fixture(&pattern(0..len))
}

/// Temp file of `len` seeded random bytes, with its contents.
pub fn random_fixture(len: usize, seed: u64) -> (NamedTempFile, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    (write_fixture(&data), data)
}

fn write_fixture(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create fixture file");
    file.write_all(data).expect("Failed to write fixture file");
    file.flush().expect("Failed to flush fixture file");
    file
}

pub fn file_id(file: &NamedTempFile) -> FileId {
    FileId::new(file.path())
}

/// Byte-granular config, so window offsets are exactly what tests pass in.
pub fn test_config() -> CacheConfig {
    CacheConfig::default().sector_size(1)
}

/// Cache whose reads only complete when the test says so.
pub fn manual_cache(config: CacheConfig) -> (WaveCache, Arc<ManualIo>) {
    let io = Arc::new(ManualIo::new());
    (WaveCache::new(config, io.clone()), io)
}

pub fn session_params(
    file: &NamedTempFile,
    data_start: u64,
    data_size: u64,
    buffer_size: usize,
) -> SessionParams {
    SessionParams {
        file: file_id(file),
        data_size,
        data_start,
        start_pos: 0,
        loop_pos: None,
        buffer_size,
        buffer_count: 2,
        flags: SessionFlags::SHARED,
    }
}

/// Read `len` bytes from `offset` through a session, completing manual
/// reads whenever the front window is still pending.
pub fn drain_manual(
    cache: &mut WaveCache,
    io: &ManualIo,
    session: SessionId,
    offset: u64,
    len: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    let mut stalls = 0;
    while filled < len {
        let copied = cache
            .read_streaming(session, &mut out[filled..], offset + filled as u64, len - filled)
            .expect("session open");
        if copied == 0 {
            stalls += 1;
            assert!(stalls < 16, "stream made no progress at {}", offset + filled as u64);
            io.complete_all();
        } else {
            stalls = 0;
        }
        filled += copied;
    }
    out
}

/// Read `len` bytes through a session on real worker threads, blocking on
/// the front window whenever it has not landed.
pub fn drain_blocking(cache: &mut WaveCache, session: SessionId, offset: u64, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + IO_TIMEOUT;
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        assert!(Instant::now() < deadline, "timed out streaming");
        let copied = cache
            .read_streaming(session, &mut out[filled..], offset + filled as u64, len - filled)
            .expect("session open");
        if copied == 0 {
            cache
                .get_session_pointer(session)
                .expect("session open")
                .expect("front window has data");
        }
        filled += copied;
    }
    out
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}
