//! Data model: `CacheEntry`, `CachedContent`, and the config record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// One record describing a cached file. Stored in the metadata store and
/// mirrored (when hot) in the memory tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Canonical, symlink-resolved absolute path. Primary key.
    pub path: PathBuf,
    /// 64-hex-char SHA-256 of file bytes at extraction time.
    pub content_hash: String,
    /// File modification time, seconds since epoch with sub-second precision.
    pub mtime: f64,
    /// Byte length of the source file at extraction.
    pub file_size: u64,
    /// Extracted content, stored inline when small.
    pub content: Option<String>,
    /// Reference to a blob in the blob store, set when content is large.
    pub blob_ref: Option<String>,
    /// Wall-clock timestamp of the extraction.
    pub extracted_at: f64,
    /// Monotonic hit counter.
    pub access_count: u64,
    /// Wall-clock timestamp, updated on every hit.
    pub last_accessed: f64,
    /// Wall-clock timestamp, set once.
    pub created_at: f64,
}

impl CacheEntry {
    /// Size counted against the memory-tier budget (I4): the inline content
    /// length, or just the record overhead when content lives in a blob.
    pub fn memory_size(&self) -> usize {
        match &self.content {
            Some(content) => content.len(),
            None => std::mem::size_of::<CacheEntry>() + self.path.as_os_str().len(),
        }
    }

    pub fn bump_access(&mut self) {
        self.access_count += 1;
        self.last_accessed = now_secs();
    }
}

/// Current wall-clock time, seconds since epoch as an `f64` so sub-second
/// precision survives round trips through serialization.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The value surfaced to callers of `Cache::get`. Purely derivative; never
/// persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedContent {
    pub content: String,
    pub from_cache: bool,
    pub content_hash: String,
    pub extracted_at: f64,
    pub file_size: u64,
}

/// Error-kind breakdown for `Statistics::errors`.
pub type ErrorCounts = std::collections::HashMap<String, u64>;

/// Snapshot returned by `Cache::statistics()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bloom_filter_hits: u64,
    pub hit_rate: f64,
    pub memory_usage_mb: f64,
    pub disk_usage_bytes: u64,
    pub entry_count: u64,
    pub unique_hashes: u64,
    pub duplicate_groups: u64,
    pub errors: ErrorCounts,
}

/// Outcome of the §4.9 integrity check, classifying a stored entry against
/// the current state of its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Valid,
    FileMissing,
    FileModified,
    ContentChanged,
}
