//! Metadata Store (§4.5): durable path → `CacheEntry` mapping with
//! secondary lookup by content hash, behind one trait with two reference
//! backends. The coordinator is generic over `Arc<dyn MetadataStore>` and
//! never matches on backend identity.

#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

#[cfg(feature = "redis-backend")]
pub mod redis;

use crate::error::Result;
use crate::types::CacheEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// Aggregate counts backing `Cache::statistics()`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub entry_count: u64,
    pub total_bytes: u64,
}

/// Durable backing store for `CacheEntry` records (spec §4.5). Implementors
/// must be safe under concurrent access from multiple coordinator workers
/// within one process; cross-process sharing is permitted but not required.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_by_path(&self, path: &Path) -> Result<Option<CacheEntry>>;

    /// All entries sharing `hash`, for dedupe/statistics.
    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>>;

    /// Upsert by path; last writer wins.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Returns whether a record existed and was removed.
    async fn delete_by_path(&self, path: &Path) -> Result<bool>;

    /// Cheap update of access metadata without rewriting the whole record.
    async fn touch(&self, path: &Path, last_accessed: f64, access_count: u64) -> Result<()>;

    /// Entries whose `last_accessed` is strictly older than `cutoff`.
    async fn iter_older_than(&self, cutoff: f64) -> Result<Vec<CacheEntry>>;

    /// Number of entries sharing each content hash, for blob GC and dedupe
    /// statistics.
    async fn count_by_hash(&self) -> Result<HashMap<String, u64>>;

    async fn totals(&self) -> Result<Totals>;
}
