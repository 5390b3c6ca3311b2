//! Payload cache
//!
//! A least-recently-used map of raw key -> payload bytes. Entries written by
//! `SectorDatabase::write` are *reserved* until the background flusher has
//! persisted them, and reserved entries are never chosen for eviction: the
//! cache is the only place a buffered value is readable from.

use hashbrown::HashMap;
use lru::LruCache;
use tracing::trace;

/// Cache interface the sector database reads through.
pub trait PayloadCache: Send + 'static {
    /// Look up a payload, promoting it to most recently used.
    fn get(&mut self, key: &[u8]) -> Option<Vec<u8>>;

    /// Insert or replace a payload. `reserved` pins it against eviction.
    fn put(&mut self, key: &[u8], value: &[u8], reserved: bool);

    /// Pin (`true`) or release (`false`) an entry.
    fn set_reserved(&mut self, key: &[u8], reserved: bool);

    /// Drop an entry regardless of reservation. Returns whether it existed.
    fn remove(&mut self, key: &[u8]) -> bool;

    fn contains(&self, key: &[u8]) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU payload cache with reservation counts.
///
/// Each `put(.., true)` / `set_reserved(.., true)` adds one reservation and
/// each `set_reserved(.., false)` releases one, so a key rewritten while an
/// older write is still in flight stays pinned until both have flushed.
/// The cache may exceed its capacity while every entry is reserved.
pub struct BinaryLru {
    entries: LruCache<Vec<u8>, Vec<u8>>,
    reserved: HashMap<Vec<u8>, u32>,
    capacity: usize,
}

impl BinaryLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            reserved: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently pinned.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    pub fn is_reserved(&self, key: &[u8]) -> bool {
        self.reserved.contains_key(key)
    }

    /// Evict from the least-recently-used end, skipping reserved entries.
    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let lru_free = match self.entries.peek_lru() {
                Some((key, _)) => !self.reserved.contains_key(key.as_slice()),
                None => return,
            };
            if lru_free {
                if let Some((key, _)) = self.entries.pop_lru() {
                    trace!(key_len = key.len(), "evicted cache entry");
                }
                continue;
            }

            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(key, _)| !self.reserved.contains_key(key.as_slice()))
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    self.entries.pop(&key);
                    trace!(key_len = key.len(), "evicted cache entry");
                }
                // Everything left is reserved: stay over capacity until the flusher releases some.
                None => return,
            }
        }
    }
}

impl PayloadCache for BinaryLru {
    fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8], reserved: bool) {
        self.entries.put(key.to_vec(), value.to_vec());
        if reserved {
            *self.reserved.entry(key.to_vec()).or_insert(0) += 1;
        }
        self.evict();
    }

    fn set_reserved(&mut self, key: &[u8], reserved: bool) {
        if reserved {
            if self.entries.contains(key) {
                *self.reserved.entry(key.to_vec()).or_insert(0) += 1;
            }
            return;
        }

        let released = match self.reserved.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if released {
            self.reserved.remove(key);
            self.evict();
        }
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.reserved.remove(key);
        self.entries.pop(key).is_some()
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
