//! Cache Coordinator (§4.8): the state machine combining the validator,
//! fingerprinter, negative-existence filter, blob store, metadata store,
//! memory tier and per-key serializer into `get`/`get_batch`/`invalidate`/
//! `invalidate_batch`/`sweep_old`/`statistics`.

use crate::blob::BlobStore;
use crate::config::{Config, INLINE_THRESHOLD_BYTES};
use crate::error::{CacheError, Result};
use crate::filter::NegativeExistenceFilter;
use crate::integrity;
use crate::memory::MemoryTier;
use crate::metadata::MetadataStore;
use crate::metrics::MetricsRecorder;
use crate::serializer::KeySerializer;
use crate::types::{now_secs, CacheEntry, CachedContent, ErrorCounts, Integrity, Statistics};
use crate::validator;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    bloom_filter_hits: AtomicU64,
    dedupe_hits: AtomicU64,
    errors: parking_lot::Mutex<ErrorCounts>,
}

impl Counters {
    fn record_error(&self, kind: &str) {
        *self.errors.lock().entry(kind.to_string()).or_insert(0) += 1;
    }
}

/// The public entry point of this crate: wires together the validator,
/// fingerprinter, blob store, metadata store, memory tier and per-key
/// serializer behind the `get`/`invalidate`/`statistics` surface described
/// in spec §6.
pub struct Cache {
    config: Config,
    memory: MemoryTier,
    metadata: Arc<dyn MetadataStore>,
    blob: BlobStore,
    filter: NegativeExistenceFilter,
    serializer: KeySerializer,
    counters: Counters,
    metrics: MetricsRecorder,
}

impl Cache {
    pub fn new(config: Config, metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.cache_dir)?;
        let memory = MemoryTier::new(config.memory_budget_bytes);
        let blob = BlobStore::new(&config.cache_dir, config.compression_level);
        let filter = NegativeExistenceFilter::new(config.filter_capacity);
        Ok(Self {
            config,
            memory,
            metadata,
            blob,
            filter,
            serializer: KeySerializer::new(),
            counters: Counters::default(),
            metrics: MetricsRecorder::install(),
        })
    }

    /// Open (or create) the on-disk backends. A no-op beyond what `new`
    /// already does for the embedded backend; kept as an explicit lifecycle
    /// hook so pooled remote backends can be warmed up before first use.
    pub async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Release any pooled backend connections. Dropping the `Cache` value
    /// has the same effect; this exists for callers that want an explicit,
    /// awaitable shutdown point.
    pub async fn close(&self) -> Result<()> {
        Ok(())
    }

    pub async fn get<F, Fut>(&self, raw_path: &Path, processor: F) -> Result<CachedContent>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync,
        Fut: Future<Output = Result<String>> + Send,
    {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::metrics::CACHE_REQUESTS_TOTAL).increment(1);

        let started = std::time::Instant::now();
        let outcome = self.get_inner(raw_path, &processor).await;
        metrics::histogram!(crate::metrics::GET_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(content) if content.from_cache => metrics::counter!(crate::metrics::CACHE_HITS_TOTAL).increment(1),
            Ok(_) => metrics::counter!(crate::metrics::CACHE_MISSES_TOTAL).increment(1),
            Err(e) => {
                self.counters.record_error(e.kind());
                metrics::counter!(crate::metrics::ERRORS_TOTAL, "kind" => e.kind()).increment(1);
            }
        }
        outcome
    }

    /// Render current metrics as standard Prometheus text exposition.
    /// Records only; exposing this over HTTP is the caller's responsibility.
    pub fn metrics_prometheus(&self) -> String {
        self.metrics.render()
    }

    async fn get_inner<F, Fut>(&self, raw_path: &Path, processor: &F) -> Result<CachedContent>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync,
        Fut: Future<Output = Result<String>> + Send,
    {
        let path = validator::validate(raw_path, &self.config.allowed_paths)?;

        if self.filter.probably_missing(&path) && tokio::fs::metadata(&path).await.is_err() {
            self.counters.bloom_filter_hits.fetch_add(1, Ordering::Relaxed);
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::source_missing(format!("{} does not exist", path.display())));
        }

        if let Some(hit) = self.try_serve_from_tiers(&path).await? {
            return Ok(hit);
        }

        let guard = self.serializer.acquire(&path).await;
        let result = self.process_under_lock(&path, processor).await;
        drop(guard);
        result
    }

    /// Steps 3–4 of §4.8: memory lookup, then metadata lookup, each gated by
    /// an integrity check. Returns `Ok(None)` on a clean miss; invalidates
    /// and returns `SourceMissing` if the source file has disappeared.
    async fn try_serve_from_tiers(&self, path: &Path) -> Result<Option<CachedContent>> {
        if let Some(entry) = self.memory.lookup(path) {
            match integrity::check(&entry, path, self.config.verify_hash).await {
                Integrity::Valid => return Ok(Some(self.record_hit(path, entry).await?)),
                Integrity::FileMissing => {
                    self.invalidate(path).await?;
                    return Err(CacheError::source_missing(format!("{} no longer exists", path.display())));
                }
                _ => {}
            }
        }

        if let Some(entry) = self.metadata.get_by_path(path).await? {
            match integrity::check(&entry, path, self.config.verify_hash).await {
                Integrity::Valid => {
                    let content = self.materialize(&entry).await?;
                    self.memory.admit(entry.clone());
                    self.metadata.touch(path, now_secs(), entry.access_count + 1).await?;
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(CachedContent {
                        content,
                        from_cache: true,
                        content_hash: entry.content_hash,
                        extracted_at: entry.extracted_at,
                        file_size: entry.file_size,
                    }));
                }
                Integrity::FileMissing => {
                    self.invalidate(path).await?;
                    return Err(CacheError::source_missing(format!("{} no longer exists", path.display())));
                }
                Integrity::FileModified | Integrity::ContentChanged => {}
            }
        }

        Ok(None)
    }

    async fn record_hit(&self, path: &Path, mut entry: CacheEntry) -> Result<CachedContent> {
        entry.bump_access();
        let content = self.materialize(&entry).await?;
        self.memory.admit(entry.clone());
        self.metadata.touch(path, entry.last_accessed, entry.access_count).await?;
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        Ok(CachedContent {
            content,
            from_cache: true,
            content_hash: entry.content_hash,
            extracted_at: entry.extracted_at,
            file_size: entry.file_size,
        })
    }

    async fn materialize(&self, entry: &CacheEntry) -> Result<String> {
        if let Some(content) = &entry.content {
            return Ok(content.clone());
        }
        let blob_ref = entry.blob_ref.as_deref().ok_or_else(|| {
            CacheError::integrity_fault(format!("entry for {} has neither inline content nor a blob_ref", entry.path.display()))
        })?;
        self.blob
            .get(blob_ref)?
            .ok_or_else(|| CacheError::integrity_fault(format!("blob {blob_ref} referenced by {} is missing", entry.path.display())))
    }

    /// Step 5 of §4.8, run while holding the per-key mutex: re-check all
    /// tiers (double-checked admission), then fingerprint, dedupe-by-hash,
    /// or invoke the processor.
    async fn process_under_lock<F, Fut>(&self, path: &Path, processor: &F) -> Result<CachedContent>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync,
        Fut: Future<Output = Result<String>> + Send,
    {
        if let Some(hit) = self.try_serve_from_tiers(path).await? {
            return Ok(hit);
        }

        let hash = crate::fingerprint::fingerprint(path).await?;
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            self.filter.record_missing(path);
            CacheError::source_missing_with_source(format!("{} disappeared mid-process", path.display()), e)
        })?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or_else(now_secs);
        let file_size = metadata.len();

        let (content, is_dedupe_hit) = match self.metadata.get_by_hash(&hash).await?.into_iter().find(|e| e.path != path) {
            Some(existing) => {
                self.counters.dedupe_hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::DEDUPE_HITS_TOTAL).increment(1);
                (self.materialize(&existing).await?, true)
            }
            None => (
                processor(path.to_path_buf())
                    .await
                    .map_err(|e| CacheError::processing_error(format!("processor failed for {}: {e}", path.display())))?,
                false,
            ),
        };

        let now = now_secs();
        let mut entry = CacheEntry {
            path: path.to_path_buf(),
            content_hash: hash.clone(),
            mtime,
            file_size,
            content: None,
            blob_ref: None,
            extracted_at: now,
            access_count: 1,
            last_accessed: now,
            created_at: now,
        };

        if content.len() > INLINE_THRESHOLD_BYTES {
            self.blob.put(&hash, &content)?;
            entry.blob_ref = Some(hash.clone());
        } else {
            entry.content = Some(content.clone());
        }

        self.metadata.put(&entry).await?;
        self.memory.admit(entry.clone());
        if !is_dedupe_hit {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        Ok(CachedContent {
            content,
            from_cache: is_dedupe_hit,
            content_hash: hash,
            extracted_at: now,
            file_size,
        })
    }

    /// Run up to `max_concurrent` `get` calls in parallel, preserving input
    /// order in the result list (spec §4.8 "Batch operations"), mirroring
    /// the teacher's `Semaphore` + `JoinSet` batch-extraction pattern.
    /// Requires `self` behind an `Arc` so spawned tasks can outlive the
    /// calling frame.
    pub async fn get_batch<F, Fut>(
        self: &Arc<Self>,
        paths: &[PathBuf],
        processor: F,
        max_concurrent: usize,
    ) -> Vec<Result<CachedContent>>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut set = JoinSet::new();

        for (idx, path) in paths.iter().cloned().enumerate() {
            let cache = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let processor = processor.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                (idx, cache.get(&path, processor).await)
            });
        }

        let mut results: Vec<Option<Result<CachedContent>>> = (0..paths.len()).map(|_| None).collect();
        while let Some(outcome) = set.join_next().await {
            let (idx, result) = outcome.expect("get_batch task does not panic");
            results[idx] = Some(result);
        }

        results.into_iter().map(|r| r.expect("every index is filled exactly once")).collect()
    }

    /// Deletes the path's metadata record and evicts it from memory. If the
    /// deleted entry's `content_hash` is no longer referenced by any other
    /// path, the blob is collected too (spec §4.4: GC runs "after
    /// `invalidate`" as well as at the end of `sweep_old`).
    pub async fn invalidate(&self, path: &Path) -> Result<bool> {
        let existing = self.metadata.get_by_path(path).await?;
        self.memory.evict(path);
        self.filter.record_missing(path);
        let removed = self.metadata.delete_by_path(path).await?;

        if let Some(entry) = existing
            && self.metadata.get_by_hash(&entry.content_hash).await?.is_empty()
        {
            self.blob.remove(&entry.content_hash)?;
        }

        Ok(removed)
    }

    /// Invalidates in parallel with no ordering guarantee (spec §4.8).
    pub async fn invalidate_batch(self: &Arc<Self>, paths: &[PathBuf]) -> Result<u64> {
        let mut set = JoinSet::new();
        for path in paths {
            let cache = Arc::clone(self);
            let path = path.clone();
            set.spawn(async move { cache.invalidate(&path).await });
        }
        let mut removed = 0u64;
        while let Some(outcome) = set.join_next().await {
            if outcome.expect("invalidate task does not panic")? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Streams entries older than `now - age_secs` from the metadata store,
    /// deletes each, evicts any matching memory-tier entry, then GCs any
    /// blob no remaining entry references (orphaned by a crash between
    /// blob-write and metadata-put, or by this sweep itself).
    pub async fn sweep_old(&self, age_secs: f64) -> Result<u64> {
        let cutoff = now_secs() - age_secs;
        let stale = self.metadata.iter_older_than(cutoff).await?;
        let mut removed = 0u64;
        for entry in stale {
            if self.metadata.delete_by_path(&entry.path).await? {
                self.memory.evict(&entry.path);
                removed += 1;
            }
        }

        let referenced = self.metadata.count_by_hash().await?;
        for hash in self.blob.list_all_hashes()? {
            if !referenced.contains_key(&hash) {
                self.blob.remove(&hash)?;
            }
        }

        Ok(removed)
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let totals = self.metadata.totals().await?;
        let by_hash = self.metadata.count_by_hash().await?;
        let duplicate_groups = by_hash.values().filter(|&&count| count > 1).count() as u64;

        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let hit_rate = if total_requests == 0 { 0.0 } else { cache_hits as f64 / total_requests as f64 };

        Ok(Statistics {
            total_requests,
            cache_hits,
            cache_misses,
            bloom_filter_hits: self.counters.bloom_filter_hits.load(Ordering::Relaxed),
            hit_rate,
            memory_usage_mb: self.memory.size_bytes() as f64 / (1024.0 * 1024.0),
            disk_usage_bytes: totals.total_bytes,
            entry_count: totals.entry_count,
            unique_hashes: by_hash.len() as u64,
            duplicate_groups,
            errors: self.counters.errors.lock().clone(),
        })
    }
}
