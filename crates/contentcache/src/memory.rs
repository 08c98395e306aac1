//! Memory Tier (§4.6): a bounded, insertion/access-order LRU mapping
//! canonical path to entry, tracking byte-size usage (I4).

use crate::types::CacheEntry;
use lru::LruCache;
use parking_lot::Mutex;
#[cfg(test)]
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

struct Inner {
    entries: LruCache<PathBuf, CacheEntry>,
    size_bytes: u64,
}

pub struct MemoryTier {
    inner: Mutex<Inner>,
    budget_bytes: u64,
}

impl MemoryTier {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                // Unbounded by count; eviction is driven purely by the byte
                // budget in `admit`.
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            budget_bytes,
        }
    }

    /// Returns a clone of the entry and promotes it to most-recently-used.
    pub fn lookup(&self, path: &Path) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        inner.entries.get(path).cloned()
    }

    /// Insert at most-recently-used, evicting least-recently-used entries
    /// until total size is back within budget. Evicted entries are dropped
    /// without being written back — the metadata store already holds them.
    pub fn admit(&self, entry: CacheEntry) {
        let size = entry.memory_size() as u64;
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.put(entry.path.clone(), entry) {
            inner.size_bytes = inner.size_bytes.saturating_sub(old.memory_size() as u64);
        }
        inner.size_bytes += size;

        while inner.size_bytes > self.budget_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.size_bytes = inner.size_bytes.saturating_sub(evicted.memory_size() as u64);
                }
                None => break,
            }
        }
    }

    pub fn evict(&self, path: &Path) {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.entries.pop(path) {
            inner.size_bytes = inner.size_bytes.saturating_sub(removed.memory_size() as u64);
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    #[cfg(test)]
    fn capacity_unbounded_by_count(&self) -> bool {
        self.inner.lock().entries.cap() == NonZeroUsize::new(usize::MAX).unwrap()
    }
}
