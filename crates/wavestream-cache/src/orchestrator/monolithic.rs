//! Whole-file loads.

use tracing::debug;
use wavestream_io::{CacheHandle, FileId, Priority, ResourceCache};

use super::{Owner, WaveCache};
use crate::error::Result;
use crate::resource::AsyncWaveResource;

/// What a whole-file load reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    pub file: FileId,
    /// Bytes to read. Zero marks the file as absent.
    pub length: usize,
    /// File offset of the first byte.
    pub offset: u64,
}

impl LoadSpec {
    pub fn new(file: impl Into<FileId>, length: usize, offset: u64) -> Self {
        Self {
            file: file.into(),
            length,
            offset,
        }
    }
}

/// Result of [`WaveCache::copy_into`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    pub ok: bool,
    pub copied: usize,
    /// The cached bytes were already post-processed in place.
    pub post_processed: bool,
}

/// Result of [`WaveCache::get_pointer`].
///
/// When `data` is present the entry stays locked until
/// [`WaveCache::release_pointer`].
#[derive(Debug)]
pub struct PointerOutcome<'a> {
    pub handle: CacheHandle,
    pub data: Option<&'a [u8]>,
    pub post_processed: bool,
}

/// Result of [`WaveCache::is_load_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    /// The handle still resolves.
    pub valid: bool,
    pub loaded: bool,
}

impl<C: ResourceCache<AsyncWaveResource>> WaveCache<C> {
    /// Find or start the whole-file load for `spec.file`.
    ///
    /// Returns at once; the data may still be loading.
    pub fn load_whole(&mut self, spec: &LoadSpec, prefetch: bool) -> CacheHandle {
        if let Some(&handle) = self.index.get(&spec.file) {
            if self.cache.get(handle).is_some() {
                self.metrics.record_cache_hit();
                return handle;
            }
            self.mark_discarded(handle);
        }

        self.metrics.record_cache_miss();
        let priority = if prefetch {
            Priority::Prefetch
        } else {
            Priority::Normal
        };
        let handle = self.create_resource(spec.file.clone(), spec.offset, spec.length, priority);
        self.index.insert(spec.file.clone(), handle);
        self.owners.insert(handle, Owner::Whole(spec.file.clone()));
        handle
    }

    /// Warm the cache at prefetch priority.
    pub fn prefetch(&mut self, spec: &LoadSpec) -> CacheHandle {
        self.load_whole(spec, true)
    }

    /// Resolve `handle`, recreating the load if it was evicted.
    fn resolve(&mut self, handle: &mut CacheHandle, spec: &LoadSpec) -> CacheHandle {
        if !self.cache.contains(*handle) {
            debug!(file = %spec.file, "whole-file handle evicted, reloading");
            *handle = self.load_whole(spec, false);
        }
        *handle
    }

    /// Copy `min(count, delivered - copy_offset, dest.len())` bytes of the
    /// file's data into `dest`, blocking if the load has not landed.
    pub fn copy_into(
        &mut self,
        handle: &mut CacheHandle,
        spec: &LoadSpec,
        dest: &mut [u8],
        copy_offset: usize,
        count: usize,
    ) -> CopyOutcome {
        let handle = self.resolve(handle, spec);
        let Some(resource) = self.cache.get(handle) else {
            return CopyOutcome::default();
        };

        let post_processed = resource.is_post_processed();
        match resource.blocking_copy(dest, copy_offset, count, &self.reporter) {
            Some(copied) => CopyOutcome {
                ok: true,
                copied,
                post_processed,
            },
            None => CopyOutcome {
                ok: false,
                copied: 0,
                post_processed,
            },
        }
    }

    /// Borrow the file's data in place, blocking if the load has not landed.
    ///
    /// A successful borrow locks the entry; give it back with
    /// [`Self::release_pointer`].
    pub fn get_pointer(&mut self, handle: &mut CacheHandle, spec: &LoadSpec) -> PointerOutcome<'_> {
        let handle = self.resolve(handle, spec);
        let Some(resource) = self.cache.lock(handle) else {
            return PointerOutcome {
                handle,
                data: None,
                post_processed: false,
            };
        };

        let post_processed = resource.is_post_processed();
        if resource.blocking_get_pointer(&self.reporter).is_none() {
            self.cache.unlock(handle);
            return PointerOutcome {
                handle,
                data: None,
                post_processed,
            };
        }

        PointerOutcome {
            handle,
            data: self.cache.peek(handle).and_then(AsyncWaveResource::data),
            post_processed,
        }
    }

    /// Drop the lock taken by [`Self::get_pointer`]. Deferred inside a batch.
    pub fn release_pointer(&mut self, handle: CacheHandle) {
        if self.in_batch {
            self.deferred.push(handle);
        } else {
            self.cache.unlock(handle);
        }
    }

    pub fn is_load_complete(&mut self, handle: CacheHandle) -> LoadProgress {
        match self.cache.get(handle) {
            Some(resource) => LoadProgress {
                valid: true,
                loaded: resource.poll(),
            },
            None => LoadProgress {
                valid: false,
                loaded: false,
            },
        }
    }

    pub fn is_load_in_progress(&mut self, handle: CacheHandle) -> bool {
        self.cache
            .get(handle)
            .is_some_and(|resource| resource.is_loading())
    }

    /// Reissue the load into the same resource, or recreate it if evicted.
    pub fn restart_load(&mut self, handle: &mut CacheHandle, spec: &LoadSpec) -> Result<()> {
        let alignment = self.alignment();
        match self.cache.get(*handle) {
            Some(resource) => {
                resource.restart(spec.offset, spec.length, alignment, Priority::Normal)?;
                if spec.length > 0 {
                    self.metrics.record_read(spec.length as u64);
                }
                self.cache.refresh_cost(*handle);
                self.sweep_evicted();
            }
            None => {
                *handle = self.load_whole(spec, false);
            }
        }
        Ok(())
    }

    pub fn is_post_processed(&self, handle: CacheHandle) -> bool {
        self.cache
            .peek(handle)
            .is_some_and(AsyncWaveResource::is_post_processed)
    }

    pub fn set_post_processed(&mut self, handle: CacheHandle) {
        if let Some(resource) = self.cache.get(handle) {
            resource.set_post_processed();
        }
    }

    /// Delivered bytes for in-place post-processing. Blocks until loaded.
    pub fn blocking_data_mut(&mut self, handle: CacheHandle) -> Option<&mut [u8]> {
        let resource = self.cache.get(handle)?;
        resource.block_until_loaded(&self.reporter);
        if resource.take_missing_report(&self.reporter) {
            return None;
        }
        resource.data_mut()
    }
}
