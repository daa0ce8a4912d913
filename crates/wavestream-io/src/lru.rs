//! Handle-based LRU resource cache.
//!
//! Bounded by total cost with least-recently-used eviction. Locked entries
//! are never evicted; aged entries go first.

use tracing::warn;

/// Bytes a cached resource accounts against the budget.
pub trait Cost {
    fn cost(&self) -> usize;
}

/// Generation-checked reference to a cache slot.
///
/// A handle goes stale when its entry is evicted or removed; every accessor
/// then returns `None` instead of touching the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheHandle {
    slot: u32,
    generation: u32,
}

/// Generic resource cache consumed by the wavestream core.
pub trait ResourceCache<R: Cost> {
    /// Insert a resource, evicting unlocked entries to stay within budget.
    fn create(&mut self, resource: R) -> CacheHandle;

    /// Resolve a handle and mark it most recently used.
    fn get(&mut self, handle: CacheHandle) -> Option<&mut R>;

    /// Resolve a handle without touching recency.
    fn peek(&self, handle: CacheHandle) -> Option<&R>;

    /// Resolve and pin a handle against eviction.
    fn lock(&mut self, handle: CacheHandle) -> Option<&mut R>;

    /// Drop one lock. Returns the remaining lock count.
    fn unlock(&mut self, handle: CacheHandle) -> u32;

    /// Destroy an unlocked entry. Returns false for stale or locked handles.
    fn remove(&mut self, handle: CacheHandle) -> bool;

    /// Soft-invalidate: make the entry the next eviction candidate.
    fn age(&mut self, handle: CacheHandle);

    fn lock_count(&self, handle: CacheHandle) -> u32;

    /// Clear every lock on an entry.
    fn break_lock(&mut self, handle: CacheHandle);

    /// Destroy every entry, locked or not.
    fn flush(&mut self);

    fn status(&self) -> CacheStatus;

    /// Handles destroyed by budget eviction since the last call.
    fn take_evicted(&mut self) -> Vec<CacheHandle>;

    /// Re-read an entry's cost after it changed in place.
    fn refresh_cost(&mut self, handle: CacheHandle);

    /// Visit every live entry with its lock count.
    fn for_each(&self, f: &mut dyn FnMut(CacheHandle, &R, u32));

    fn contains(&self, handle: CacheHandle) -> bool {
        self.peek(handle).is_some()
    }
}

struct Entry<R> {
    resource: R,
    last_access: u64,
    locks: u32,
    cost: u64,
}

struct Slot<R> {
    generation: u32,
    entry: Option<Entry<R>>,
}

/// In-memory [`ResourceCache`] with a byte budget.
pub struct LruCache<R> {
    slots: Vec<Slot<R>>,
    free: Vec<u32>,
    max_bytes: u64,
    current_bytes: u64,
    entries: usize,
    clock: u64,
    evicted: Vec<CacheHandle>,
}

impl<R: Cost> LruCache<R> {
    /// Create a new LRU cache bounded by `max_bytes` of accounted cost.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            max_bytes,
            current_bytes: 0,
            entries: 0,
            clock: 0,
            evicted: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn entry(&self, handle: CacheHandle) -> Option<&Entry<R>> {
        let slot = self.slots.get(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, handle: CacheHandle) -> Option<&mut Entry<R>> {
        let slot = self.slots.get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Vacate a slot and bump its generation so old handles go stale.
    fn take_slot(&mut self, index: u32) -> Option<Entry<R>> {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.entries -= 1;
        self.current_bytes -= entry.cost;
        Some(entry)
    }

    /// Evict the least-recently-used unlocked entry.
    ///
    /// Returns true if an entry was evicted, false if everything is locked.
    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let entry = slot.entry.as_ref()?;
                (entry.locks == 0).then_some((entry.last_access, idx as u32, slot.generation))
            })
            .min_by_key(|(last_access, _, _)| *last_access);

        let Some((_, index, generation)) = oldest else {
            return false;
        };

        // Resource drop runs here; it may block on outstanding I/O.
        if self.take_slot(index).is_some() {
            self.evicted.push(CacheHandle {
                slot: index,
                generation,
            });
        }
        true
    }

    fn make_room(&mut self, incoming: u64) {
        while self.current_bytes + incoming > self.max_bytes && self.entries > 0 {
            if !self.evict_lru() {
                warn!(
                    bytes = self.current_bytes + incoming,
                    budget = self.max_bytes,
                    "cache over budget, every entry is locked"
                );
                break;
            }
        }
    }
}

impl<R: Cost> ResourceCache<R> for LruCache<R> {
    fn create(&mut self, resource: R) -> CacheHandle {
        let cost = resource.cost() as u64;
        self.make_room(cost);

        let last_access = self.tick();
        let entry = Entry {
            resource,
            last_access,
            locks: 0,
            cost,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        let handle = CacheHandle {
            slot: index,
            generation: slot.generation,
        };

        self.entries += 1;
        self.current_bytes += cost;
        handle
    }

    fn get(&mut self, handle: CacheHandle) -> Option<&mut R> {
        let now = self.tick();
        let entry = self.entry_mut(handle)?;
        entry.last_access = now;
        Some(&mut entry.resource)
    }

    fn peek(&self, handle: CacheHandle) -> Option<&R> {
        self.entry(handle).map(|entry| &entry.resource)
    }

    fn lock(&mut self, handle: CacheHandle) -> Option<&mut R> {
        let now = self.tick();
        let entry = self.entry_mut(handle)?;
        entry.last_access = now;
        entry.locks += 1;
        Some(&mut entry.resource)
    }

    fn unlock(&mut self, handle: CacheHandle) -> u32 {
        match self.entry_mut(handle) {
            Some(entry) => {
                entry.locks = entry.locks.saturating_sub(1);
                entry.locks
            }
            None => 0,
        }
    }

    fn remove(&mut self, handle: CacheHandle) -> bool {
        let removable = self.entry(handle).is_some_and(|entry| entry.locks == 0);
        removable && self.take_slot(handle.slot).is_some()
    }

    fn age(&mut self, handle: CacheHandle) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.last_access = 0;
        }
    }

    fn lock_count(&self, handle: CacheHandle) -> u32 {
        self.entry(handle).map_or(0, |entry| entry.locks)
    }

    fn break_lock(&mut self, handle: CacheHandle) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.locks = 0;
        }
    }

    fn flush(&mut self) {
        for index in 0..self.slots.len() as u32 {
            self.take_slot(index);
        }
        self.evicted.clear();
    }

    fn status(&self) -> CacheStatus {
        let locked = self
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.locks > 0)
            .count();
        CacheStatus {
            entries: self.entries,
            locked,
            bytes: self.current_bytes,
            max_bytes: self.max_bytes,
        }
    }

    fn take_evicted(&mut self) -> Vec<CacheHandle> {
        std::mem::take(&mut self.evicted)
    }

    fn refresh_cost(&mut self, handle: CacheHandle) {
        let Some(entry) = self.entry_mut(handle) else {
            return;
        };
        let old = entry.cost;
        let new = entry.resource.cost() as u64;
        entry.cost = new;
        self.current_bytes = self.current_bytes - old + new;
        if new > old {
            self.make_room(0);
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(CacheHandle, &R, u32)) {
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                let handle = CacheHandle {
                    slot: idx as u32,
                    generation: slot.generation,
                };
                f(handle, &entry.resource, entry.locks);
            }
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// Current number of cached entries
    pub entries: usize,
    /// Entries pinned by at least one lock
    pub locked: usize,
    /// Current total accounted bytes
    pub bytes: u64,
    /// Byte budget
    pub max_bytes: u64,
}

impl CacheStatus {
    /// Get fill percentage (0.0 - 1.0) based on bytes.
    pub fn byte_fill(&self) -> f32 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.bytes as f32 / self.max_bytes as f32
        }
    }
}
