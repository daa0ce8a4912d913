//! Stream session integration tests
//!
//! Tests window rings, sharing between sessions, single-play isolation,
//! registry cleanup under memory pressure and loop wrap-around.
//!
//! Run with:
//! ```bash
//! cargo test -p wavestream --test streaming_integration
//! ```

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::{
    drain_manual, file_id, fixture, manual_cache, pattern, session_params, test_config,
};
use wavestream::prelude::*;
use wavestream::{AsyncWaveResource, BufferKey, LoadIssue};

const WINDOW: usize = 8192;

// =============================================================================
// Ring behaviour
// =============================================================================

#[test]
fn test_read_before_and_after_completion() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 1000, 99_000, WINDOW))
        .unwrap();
    assert_eq!(io.reads_issued(), 2);

    let mut dest = vec![0u8; WINDOW];
    assert_eq!(cache.read_streaming(session, &mut dest, 1000, WINDOW).unwrap(), 0);
    assert!(!cache.is_session_ready(session).unwrap());

    io.complete_all();
    assert!(cache.is_session_ready(session).unwrap());
    assert_eq!(cache.read_streaming(session, &mut dest, 1000, WINDOW).unwrap(), WINDOW);
    assert_eq!(dest, pattern(1000..9192));

    // Draining the front issued the window after the ring.
    assert_eq!(io.reads_issued(), 3);
    let info = cache.session_info(session).unwrap();
    assert_eq!(info.front_offset, Some(9192));
    assert_eq!(info.front_index, 1);
}

#[test]
fn test_read_at_end_of_data_issues_nothing() {
    let file = fixture(20_000);
    let (mut cache, io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 0, 20_000, WINDOW))
        .unwrap();
    let issued = io.reads_issued();

    let mut dest = vec![0u8; 256];
    assert_eq!(cache.read_streaming(session, &mut dest, 20_000, 256).unwrap(), 0);
    assert_eq!(io.reads_issued(), issued);
    assert!(cache.session_info(session).unwrap().ended);
}

#[test]
fn test_sequential_drain_matches_file() {
    let file = fixture(50_000);
    let (mut cache, io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 44, 49_956, WINDOW))
        .unwrap();

    let bytes = drain_manual(&mut cache, &io, session, 44, 49_956);
    assert_eq!(bytes, pattern(44..50_000));

    let mut dest = [0u8; 16];
    assert_eq!(cache.read_streaming(session, &mut dest, 50_000, 16).unwrap(), 0);
}

#[test]
fn test_loop_wraps_to_loop_point() {
    let file = fixture(30_000);
    let (mut cache, io) = manual_cache(test_config());
    let mut params = session_params(&file, 0, 30_000, WINDOW);
    params.loop_pos = Some(5000);
    let session = cache.open_session(params).unwrap();

    let first = drain_manual(&mut cache, &io, session, 0, 30_000);
    assert_eq!(first, pattern(0..30_000));

    let info = cache.session_info(session).unwrap();
    assert_eq!(info.front_offset, Some(5000));
    assert!(!info.ended);

    let again = drain_manual(&mut cache, &io, session, 5000, 10_000);
    assert_eq!(again, pattern(5000..15_000));
}

#[test]
fn test_seek_restarts_ring() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 0, 100_000, WINDOW))
        .unwrap();

    cache.seek_session(session, 60_000).unwrap();
    assert_eq!(
        cache.session_info(session).unwrap().front_offset,
        Some(60_000)
    );
    let bytes = drain_manual(&mut cache, &io, session, 60_000, 1000);
    assert_eq!(bytes, pattern(60_000..61_000));
}

// =============================================================================
// Sharing
// =============================================================================

#[test]
fn test_shared_sessions_use_same_windows() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let a = cache
        .open_session(session_params(&file, 1000, 99_000, WINDOW))
        .unwrap();
    let b = cache
        .open_session(session_params(&file, 1000, 99_000, WINDOW))
        .unwrap();

    assert_eq!(io.reads_issued(), 2);
    let handle = cache
        .registered_buffer(&BufferKey::new(file_id(&file), 1000, true))
        .unwrap();
    assert_eq!(cache.lock_count(handle), 2);
    assert_eq!(cache.metrics().cache_hits, 2);

    io.complete_all();
    let mut left = vec![0u8; 512];
    let mut right = vec![0u8; 512];
    cache.read_streaming(a, &mut left, 1000, 512).unwrap();
    cache.read_streaming(b, &mut right, 1000, 512).unwrap();
    assert_eq!(left, right);
}

#[test]
fn test_shared_sessions_with_different_window_sizes() {
    let file = fixture(20_000);
    let (mut cache, io) = manual_cache(test_config());
    let short = cache
        .open_session(session_params(&file, 0, 20_000, 1024))
        .unwrap();
    let long = cache
        .open_session(session_params(&file, 0, 20_000, 2048))
        .unwrap();

    // The short window at offset 0 cannot serve the longer session.
    assert_eq!(io.reads_issued(), 4);
    let handle = cache
        .registered_buffer(&BufferKey::new(file_id(&file), 0, true))
        .unwrap();
    assert_eq!(
        cache.resource(handle).map(AsyncWaveResource::requested_len),
        Some(2048)
    );

    let bytes = drain_manual(&mut cache, &io, long, 0, 20_000);
    assert_eq!(bytes, pattern(0..20_000));
    let bytes = drain_manual(&mut cache, &io, short, 0, 20_000);
    assert_eq!(bytes, pattern(0..20_000));
}

#[test]
fn test_closed_shared_windows_are_reused() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let params = session_params(&file, 0, 100_000, WINDOW);

    let first = cache.open_session(params.clone()).unwrap();
    io.complete_all();
    cache.close_session(first).unwrap();
    assert_eq!(cache.status().entries, 2);
    assert_eq!(cache.status().locked, 0);

    let second = cache.open_session(params).unwrap();
    assert_eq!(io.reads_issued(), 2);
    assert!(cache.is_session_ready(second).unwrap());

    let mut dest = vec![0u8; 100];
    assert_eq!(cache.read_streaming(second, &mut dest, 0, 100).unwrap(), 100);
    assert_eq!(dest, pattern(0..100));
}

#[test]
fn test_single_play_sessions_are_private() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let mut params = session_params(&file, 0, 100_000, WINDOW);
    params.flags = SessionFlags::SINGLE_PLAY;

    let a = cache.open_session(params.clone()).unwrap();
    let b = cache.open_session(params).unwrap();
    assert_eq!(io.reads_issued(), 4);
    assert_eq!(cache.status().entries, 4);
    assert!(cache
        .registered_buffer(&BufferKey::new(file_id(&file), 0, true))
        .is_none());

    cache.close_session(a).unwrap();
    assert_eq!(cache.status().entries, 2);
    cache.close_session(b).unwrap();
    assert_eq!(cache.status().entries, 0);
}

#[test]
fn test_single_play_recycles_windows() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let mut params = session_params(&file, 0, 100_000, WINDOW);
    params.flags = SessionFlags::SINGLE_PLAY;
    let session = cache.open_session(params).unwrap();

    let bytes = drain_manual(&mut cache, &io, session, 0, 40_000);
    assert_eq!(bytes, pattern(0..40_000));
    assert_eq!(cache.status().entries, 2);
    assert_eq!(cache.memory_report().rows.iter().filter(|row| row.shared).count(), 0);
}

// =============================================================================
// Memory pressure and failure
// =============================================================================

#[test]
fn test_evicted_windows_leave_registry() {
    let first = fixture(40_000);
    let second = fixture(40_000);
    let entry = std::mem::size_of::<AsyncWaveResource>() as u64 + WINDOW as u64;
    let (mut cache, io) = manual_cache(CacheConfig {
        max_bytes: 2 * entry + 100,
        ..test_config()
    });

    let a = cache
        .open_session(session_params(&first, 0, 40_000, WINDOW))
        .unwrap();
    io.complete_all();
    cache.close_session(a).unwrap();
    let key = BufferKey::new(file_id(&first), 0, true);
    assert!(cache.registered_buffer(&key).is_some());

    let b = cache
        .open_session(session_params(&second, 0, 40_000, WINDOW))
        .unwrap();
    assert!(cache.registered_buffer(&key).is_none());
    assert!(cache
        .registered_buffer(&BufferKey::new(file_id(&first), WINDOW as u64, true))
        .is_none());
    assert_eq!(cache.status().entries, 2);

    cache.close_session(b).unwrap();
    cache
        .open_session(session_params(&first, 0, 40_000, WINDOW))
        .unwrap();
    assert_eq!(io.reads_issued(), 6);
}

#[test]
fn test_missing_file_fails_session_once() {
    let (mut cache, io) = manual_cache(test_config());
    let params = SessionParams {
        file: FileId::new("/nonexistent/wavestream/stream.raw"),
        data_size: 50_000,
        data_start: 0,
        start_pos: 0,
        loop_pos: None,
        buffer_size: WINDOW,
        buffer_count: 2,
        flags: SessionFlags::SHARED,
    };
    let session = cache.open_session(params).unwrap();
    io.complete_all();

    let mut dest = vec![0u8; 64];
    for offset in [0, 64, 128, 8192] {
        assert_eq!(cache.read_streaming(session, &mut dest, offset, 64).unwrap(), 0);
    }
    assert!(cache.get_session_pointer(session).unwrap().is_none());

    let issues: Vec<LoadIssue> = cache.issues().try_iter().collect();
    assert_eq!(issues.len(), 1);
    assert!(cache.session_info(session).unwrap().failed);
    assert!(cache.is_session_ready(session).unwrap());
}

#[test]
fn test_flush_refills_open_session() {
    let file = fixture(100_000);
    let (mut cache, io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 0, 100_000, WINDOW))
        .unwrap();
    let head = drain_manual(&mut cache, &io, session, 0, 4096);
    assert_eq!(head, pattern(0..4096));

    cache.flush();
    assert_eq!(cache.status().entries, 0);
    assert_eq!(cache.session_count(), 1);

    let mut dest = vec![0u8; 1024];
    assert_eq!(cache.read_streaming(session, &mut dest, 4096, 1024).unwrap(), 0);
    assert_eq!(io.reads_issued(), 4);

    let rest = drain_manual(&mut cache, &io, session, 4096, 1024);
    assert_eq!(rest, pattern(4096..5120));
}

#[test]
fn test_closed_session_is_unknown() {
    let file = fixture(20_000);
    let (mut cache, _io) = manual_cache(test_config());
    let session = cache
        .open_session(session_params(&file, 0, 20_000, WINDOW))
        .unwrap();
    cache.close_session(session).unwrap();

    let mut dest = [0u8; 4];
    let err = cache.read_streaming(session, &mut dest, 0, 4).unwrap_err();
    assert!(matches!(err, wavestream::cache::Error::UnknownSession(id) if id == session));
    assert!(cache.close_session(session).is_err());
}

#[test]
fn test_invalid_geometry_rejected() {
    let file = fixture(1000);
    let (mut cache, io) = manual_cache(test_config());

    let mut params = session_params(&file, 0, 1000, WINDOW);
    params.buffer_count = 0;
    assert!(cache.open_session(params).is_err());

    let mut params = session_params(&file, 0, 1000, WINDOW);
    params.start_pos = 1000;
    assert!(cache.open_session(params).is_err());

    assert_eq!(io.reads_issued(), 0);
    assert_eq!(cache.session_count(), 0);
}

#[cfg(feature = "threaded")]
#[test]
fn test_threaded_stream_matches_source() {
    helpers::init_tracing();
    let (file, data) = helpers::random_fixture(300_000, 42);
    let mut cache = WaveCache::threaded(test_config()).unwrap();
    let mut params = session_params(&file, 44, 299_956, 16_384);
    params.buffer_count = 3;
    let session = cache.open_session(params).unwrap();

    let bytes = helpers::drain_blocking(&mut cache, session, 44, 299_956);
    assert_eq!(bytes, &data[44..]);
    cache.close_session(session).unwrap();
}
