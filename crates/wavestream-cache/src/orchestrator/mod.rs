//! Wave cache orchestrator.
//!
//! Owns the whole-file index, the stream window registry and the open
//! sessions. All of them are mutated on the producer thread only; I/O
//! threads touch nothing but the arrival cell of the resource they complete.

mod monolithic;
mod session;
mod streaming;

pub use monolithic::{CopyOutcome, LoadProgress, LoadSpec, PointerOutcome};
pub use session::{
    SessionFlags, SessionId, SessionInfo, SessionParams, SessionWindow, MAX_BUFFER_COUNT,
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use wavestream_io::{
    AsyncIo, CacheHandle, CacheStatus, FileId, LruCache, Priority, ResourceCache,
};

use crate::config::CacheConfig;
use crate::key::BufferKey;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::report::{IssueReporter, LoadIssue};
use crate::resource::{AsyncWaveResource, ResourceState};
use session::StreamSession;

#[cfg(feature = "threaded")]
use crate::error::Result;

/// A wave cache shared between the mixer and its readers.
pub type SharedWaveCache<C = LruCache<AsyncWaveResource>> = Arc<Mutex<WaveCache<C>>>;

/// What a cache entry is indexed under, so eviction can clean it up.
enum Owner {
    Whole(FileId),
    Window(BufferKey),
}

/// Monolithic and streaming access to wave data through one resource cache.
pub struct WaveCache<C = LruCache<AsyncWaveResource>> {
    cache: C,
    io: Arc<dyn AsyncIo>,
    config: CacheConfig,
    /// Whole-file loads, one per file.
    index: HashMap<FileId, CacheHandle>,
    /// Shareable stream windows.
    buffers: BTreeMap<BufferKey, CacheHandle>,
    owners: HashMap<CacheHandle, Owner>,
    sessions: HashMap<SessionId, StreamSession>,
    in_batch: bool,
    deferred: Vec<CacheHandle>,
    reporter: IssueReporter,
    issues: Receiver<LoadIssue>,
    metrics: Arc<CacheMetrics>,
}

impl WaveCache<LruCache<AsyncWaveResource>> {
    /// Create a cache over the in-memory LRU, bounded by `config.max_bytes`.
    pub fn new(config: CacheConfig, io: Arc<dyn AsyncIo>) -> Self {
        let cache = LruCache::new(config.max_bytes);
        Self::with_cache(config, io, cache)
    }

    /// Create a cache reading on `config.io_threads` worker threads.
    #[cfg(feature = "threaded")]
    pub fn threaded(config: CacheConfig) -> Result<Self> {
        let io = wavestream_io::ThreadedIo::new(config.io_threads)?;
        Ok(Self::new(config, Arc::new(io)))
    }
}

impl<C: ResourceCache<AsyncWaveResource>> WaveCache<C> {
    pub fn with_cache(config: CacheConfig, io: Arc<dyn AsyncIo>, cache: C) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        let (reporter, issues) = IssueReporter::new(Arc::clone(&metrics), config.stall_threshold());
        Self {
            cache,
            io,
            config,
            index: HashMap::new(),
            buffers: BTreeMap::new(),
            owners: HashMap::new(),
            sessions: HashMap::new(),
            in_batch: false,
            deferred: Vec::new(),
            reporter,
            issues,
            metrics,
        }
    }

    pub fn into_shared(self) -> SharedWaveCache<C> {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn io(&self) -> &Arc<dyn AsyncIo> {
        &self.io
    }

    /// Missing-file and size-mismatch reports.
    pub fn issues(&self) -> &Receiver<LoadIssue> {
        &self.issues
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    /// Direct access to a cached resource.
    pub fn resource(&self, handle: CacheHandle) -> Option<&AsyncWaveResource> {
        self.cache.peek(handle)
    }

    pub fn lock_count(&self, handle: CacheHandle) -> u32 {
        self.cache.lock_count(handle)
    }

    /// Registry entry for a shareable window, if one is live.
    pub fn registered_buffer(&self, key: &BufferKey) -> Option<CacheHandle> {
        self.buffers.get(key).copied()
    }

    fn alignment(&self) -> u64 {
        self.config.sector_size.max(1)
    }

    fn create_resource(
        &mut self,
        file: FileId,
        offset: u64,
        length: usize,
        priority: Priority,
    ) -> CacheHandle {
        if length > 0 {
            self.metrics.record_read(length as u64);
        }
        let resource = AsyncWaveResource::start(
            file,
            Arc::clone(&self.io),
            offset,
            length,
            self.alignment(),
            priority,
        );
        let handle = self.cache.create(resource);
        self.sweep_evicted();
        handle
    }

    fn sweep_evicted(&mut self) {
        for handle in self.cache.take_evicted() {
            self.mark_discarded(handle);
        }
    }

    /// Find a window by key, or create, lock and register it.
    ///
    /// A hit is locked and its timestamps reset as an instant arrival.
    /// A registered window shorter than `length` is unregistered and
    /// replaced; sessions already holding it keep their lock.
    /// Single-play keys are never looked up or registered.
    pub fn find_or_create_buffer(
        &mut self,
        key: BufferKey,
        length: usize,
        priority: Priority,
    ) -> CacheHandle {
        if key.shareable {
            if let Some(&handle) = self.buffers.get(&key) {
                let covers = self
                    .cache
                    .peek(handle)
                    .map(|resource| resource.requested_len() >= length);
                if covers == Some(true) {
                    if let Some(resource) = self.cache.lock(handle) {
                        resource.mark_instant_arrival();
                        self.metrics.record_cache_hit();
                        debug!(file = %key.file, offset = key.offset, "stream window shared");
                        return handle;
                    }
                }
                if covers == Some(false) {
                    debug!(
                        file = %key.file,
                        offset = key.offset,
                        length,
                        "registered stream window too short, replacing"
                    );
                    if let Some(resource) = self.cache.get(handle) {
                        resource.set_registry_key(None);
                    }
                }
                self.mark_discarded(handle);
            }
        }

        self.metrics.record_cache_miss();
        let handle = self.create_resource(key.file.clone(), key.offset, length, priority);
        if let Some(resource) = self.cache.lock(handle) {
            if key.shareable {
                resource.set_registry_key(Some(key.clone()));
            }
        }
        if key.shareable {
            self.buffers.insert(key.clone(), handle);
            self.owners.insert(handle, Owner::Window(key));
        }
        handle
    }

    /// Drop index and registry entries for a handle the cache destroyed.
    pub fn mark_discarded(&mut self, handle: CacheHandle) {
        match self.owners.remove(&handle) {
            Some(Owner::Whole(file)) => {
                if self.index.get(&file) == Some(&handle) {
                    self.index.remove(&file);
                }
                debug!(%file, "whole-file entry discarded");
            }
            Some(Owner::Window(key)) => {
                if self.buffers.get(&key) == Some(&handle) {
                    self.buffers.remove(&key);
                }
                debug!(file = %key.file, offset = key.offset, "stream window discarded");
            }
            None => {}
        }
    }

    /// Soft-invalidate: the entry becomes the next eviction candidate.
    pub fn unload(&mut self, handle: CacheHandle) {
        self.cache.age(handle);
    }

    /// Destroy every cached resource, locked or not.
    ///
    /// Open sessions survive with empty rings and refill on next use.
    /// Outstanding handles go stale.
    pub fn flush(&mut self) {
        for session in self.sessions.values_mut() {
            let resume = session
                .front_handle()
                .and_then(|handle| self.cache.peek(handle))
                .map(|resource| resource.request_offset());
            session.resume_at = resume.or(session.next_offset).or(Some(session.data_start));
            session.ring.iter_mut().for_each(|slot| *slot = None);
        }

        let status = self.cache.status();
        self.deferred.clear();
        self.cache.flush();
        self.index.clear();
        self.buffers.clear();
        self.owners.clear();
        info!(
            entries = status.entries,
            bytes = status.bytes,
            "wave cache flushed"
        );
    }

    /// Open a pull cycle. Pointer releases are deferred until it ends.
    pub fn on_batch_begin(&mut self) {
        self.in_batch = true;
    }

    pub fn on_batch_end(&mut self) {
        self.in_batch = false;
        for handle in std::mem::take(&mut self.deferred) {
            self.cache.unlock(handle);
        }
    }

    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    /// Per-resource memory usage.
    pub fn memory_report(&self) -> MemoryReport {
        let mut rows = Vec::new();
        self.cache.for_each(&mut |handle, resource, locks| {
            rows.push(MemoryRow {
                handle,
                file: resource.file().clone(),
                offset: resource.request_offset(),
                bytes: wavestream_io::Cost::cost(resource),
                locks,
                state: resource.state(),
                shared: resource.registry_key().is_some(),
            });
        });
        rows.sort_by(|a, b| (&a.file, a.offset).cmp(&(&b.file, b.offset)));
        MemoryReport {
            rows,
            status: self.cache.status(),
        }
    }

    /// Log the memory report.
    pub fn dump_memory(&self) {
        let report = self.memory_report();
        info!(
            entries = report.status.entries,
            locked = report.status.locked,
            bytes = report.status.bytes,
            max_bytes = report.status.max_bytes,
            "wave cache memory"
        );
        for row in &report.rows {
            info!(
                file = %row.file,
                offset = row.offset,
                bytes = row.bytes,
                locks = row.locks,
                state = ?row.state,
                shared = row.shared,
                "wave resource"
            );
        }
    }
}

/// One cached resource in a [`MemoryReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub handle: CacheHandle,
    pub file: FileId,
    pub offset: u64,
    /// Accounted cost.
    pub bytes: usize,
    pub locks: u32,
    pub state: ResourceState,
    /// Registered as a shareable stream window.
    pub shared: bool,
}

/// Memory usage of every cached resource.
#[derive(Debug, Clone)]
pub struct MemoryReport {
    pub rows: Vec<MemoryRow>,
    pub status: CacheStatus,
}

impl MemoryReport {
    pub fn total_bytes(&self) -> usize {
        self.rows.iter().map(|row| row.bytes).sum()
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} entries, {} locked, {} / {} bytes ({:.1}%)",
            self.status.entries,
            self.status.locked,
            self.status.bytes,
            self.status.max_bytes,
            self.status.byte_fill() * 100.0
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "  {:>10} B  locks={} {:?}{} {} @ {}",
                row.bytes,
                row.locks,
                row.state,
                if row.shared { " shared" } else { "" },
                row.file,
                row.offset
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wavestream_io::ManualIo;

    fn fixture(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file
    }

    fn cache(max_bytes: u64) -> (WaveCache, Arc<ManualIo>) {
        let io = Arc::new(ManualIo::new());
        let config = CacheConfig::with_max_bytes(max_bytes).sector_size(1);
        (WaveCache::new(config, io.clone()), io)
    }

    #[test]
    fn test_shareable_key_resolves_to_one_resource() {
        let file = fixture(4096);
        let (mut cache, io) = cache(1 << 20);
        let key = BufferKey::new(FileId::new(file.path()), 0, true);

        let a = cache.find_or_create_buffer(key.clone(), 1024, Priority::Normal);
        let b = cache.find_or_create_buffer(key.clone(), 1024, Priority::Normal);

        assert_eq!(a, b);
        assert_eq!(io.reads_issued(), 1);
        assert_eq!(cache.lock_count(a), 2);
        assert_eq!(cache.registered_buffer(&key), Some(a));
        assert_eq!(cache.metrics().cache_hits, 1);
    }

    #[test]
    fn test_single_play_key_never_shared() {
        let file = fixture(4096);
        let (mut cache, io) = cache(1 << 20);
        let key = BufferKey::new(FileId::new(file.path()), 0, false);

        let a = cache.find_or_create_buffer(key.clone(), 1024, Priority::Normal);
        let b = cache.find_or_create_buffer(key.clone(), 1024, Priority::Normal);

        assert_ne!(a, b);
        assert_eq!(io.reads_issued(), 2);
        assert!(cache.registered_buffer(&key).is_none());
    }

    #[test]
    fn test_eviction_cleans_registry() {
        let file = fixture(8192);
        let (mut cache, _io) = cache(1);
        let path = FileId::new(file.path());

        let first = BufferKey::new(path.clone(), 0, true);
        let a = cache.find_or_create_buffer(first.clone(), 1024, Priority::Normal);
        cache.cache.unlock(a);

        let second = BufferKey::new(path, 1024, true);
        cache.find_or_create_buffer(second.clone(), 1024, Priority::Normal);

        assert!(cache.resource(a).is_none());
        assert!(cache.registered_buffer(&first).is_none());
        assert!(cache.registered_buffer(&second).is_some());
    }

    #[test]
    fn test_stale_registry_entry_recreated() {
        let file = fixture(4096);
        let (mut cache, io) = cache(1 << 20);
        let key = BufferKey::new(FileId::new(file.path()), 0, true);

        let a = cache.find_or_create_buffer(key.clone(), 512, Priority::Normal);
        cache.cache.break_lock(a);
        assert!(cache.cache.remove(a));

        let b = cache.find_or_create_buffer(key.clone(), 512, Priority::Normal);
        assert_ne!(a, b);
        assert_eq!(io.reads_issued(), 2);
        assert_eq!(cache.registered_buffer(&key), Some(b));
    }

    #[test]
    fn test_memory_report_lists_resources() {
        let file = fixture(4096);
        let (mut cache, io) = cache(1 << 20);
        let key = BufferKey::new(FileId::new(file.path()), 0, true);
        let handle = cache.find_or_create_buffer(key, 2048, Priority::Normal);
        io.complete_all();

        let report = cache.memory_report();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].handle, handle);
        assert_eq!(report.rows[0].locks, 1);
        assert_eq!(report.rows[0].state, ResourceState::Loaded);
        assert!(report.rows[0].shared);
        assert_eq!(report.total_bytes() as u64, report.status.bytes);
        assert!(report.to_string().contains("1 entries, 1 locked"));

        cache.dump_memory();
    }

    #[test]
    fn test_flush_clears_everything() {
        let file = fixture(4096);
        let (mut cache, io) = cache(1 << 20);
        let key = BufferKey::new(FileId::new(file.path()), 0, true);
        let handle = cache.find_or_create_buffer(key.clone(), 2048, Priority::Normal);

        cache.flush();
        assert_eq!(io.pending(), 0);
        assert!(cache.resource(handle).is_none());
        assert!(cache.registered_buffer(&key).is_none());
        assert_eq!(cache.status().entries, 0);
    }
}
