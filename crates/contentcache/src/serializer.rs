//! Per-Key Serializer (§4.7): a registry of keyed mutexes guaranteeing at
//! most one in-flight processor invocation per canonical path (I5).
//!
//! Mirrors the "self-contained, reference-counted by waiter count" design:
//! a `KeySlot` is created on first contention, reference-counted while any
//! task holds a guard or is waiting to acquire one, and removed from the
//! registry once the last waiter releases it.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

struct KeySlot {
    mutex: Arc<Mutex<()>>,
    waiters: AtomicUsize,
}

/// Holds the path's mutex for the lifetime of the guard; dropping it
/// releases the mutex and, if no other task is waiting, removes the slot
/// from the registry so the map does not grow unboundedly.
pub struct KeyGuard<'a> {
    registry: &'a KeySerializer,
    path: PathBuf,
    slot: Arc<KeySlot>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if self.slot.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.registry.slots.remove_if(&self.path, |_, s| Arc::ptr_eq(s, &self.slot));
        }
    }
}

#[derive(Default)]
pub struct KeySerializer {
    slots: DashMap<PathBuf, Arc<KeySlot>>,
}

impl KeySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive claim on `path`, blocking until any other in-flight
    /// claim for the same path releases it.
    pub async fn acquire(&self, path: &Path) -> KeyGuard<'_> {
        let slot = self
            .slots
            .entry(path.to_path_buf())
            .and_modify(|s| {
                s.waiters.fetch_add(1, Ordering::AcqRel);
            })
            .or_insert_with(|| {
                Arc::new(KeySlot {
                    mutex: Arc::new(Mutex::new(())),
                    waiters: AtomicUsize::new(1),
                })
            })
            .clone();

        let guard = slot.mutex.clone().lock_owned().await;

        KeyGuard {
            registry: self,
            path: path.to_path_buf(),
            slot,
            _guard: guard,
        }
    }

    #[cfg(test)]
    pub fn registry_len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_concurrent_acquires_for_same_path() {
        let serializer = Arc::new(KeySerializer::new());
        let path = PathBuf::from("/a");
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let serializer = serializer.clone();
            let path = path.to_path_buf();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = serializer.acquire(&path).await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_serialize_each_other() {
        let serializer = Arc::new(KeySerializer::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let s1 = serializer.clone();
        let b1 = barrier.clone();
        let t1 = tokio::spawn(async move {
            let _guard = s1.acquire(&PathBuf::from("/a")).await;
            b1.wait().await;
        });
        let s2 = serializer.clone();
        let b2 = barrier.clone();
        let t2 = tokio::spawn(async move {
            let _guard = s2.acquire(&PathBuf::from("/b")).await;
            b2.wait().await;
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            t1.await.unwrap();
            t2.await.unwrap();
        })
        .await
        .expect("distinct paths deadlocked each other");
    }

    #[tokio::test]
    async fn registry_is_garbage_collected_when_idle() {
        let serializer = KeySerializer::new();
        {
            let _guard = serializer.acquire(&PathBuf::from("/a")).await;
            assert_eq!(serializer.registry_len(), 1);
        }
        assert_eq!(serializer.registry_len(), 0);
    }
}
