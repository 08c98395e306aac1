//! Quantified invariants (idempotence, single-flight, dedupe, memory budget,
//! invalidation completeness, path security, crash-safe ordering).

use contentcache::metadata::sqlite::SqliteMetadataStore;
use contentcache::{Cache, Config};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn cache_with(cache_dir: &std::path::Path, mutate: impl FnOnce(&mut Config)) -> Arc<Cache> {
    let mut config = Config {
        cache_dir: cache_dir.to_path_buf(),
        ..Config::default()
    };
    mutate(&mut config);
    let metadata = Arc::new(SqliteMetadataStore::open(&config.cache_dir, config.backend_pool_size).unwrap());
    Arc::new(Cache::new(config, metadata).unwrap())
}

fn cache_at(cache_dir: &std::path::Path) -> Arc<Cache> {
    cache_with(cache_dir, |_| {})
}

/// P1: repeated `get` on an unchanged file is idempotent — same hash, same
/// content, and every call after the first reports `from_cache`.
#[tokio::test]
async fn p1_repeated_get_on_unchanged_file_is_idempotent() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file = data_dir.path().join("doc.txt");
    tokio::fs::write(&file, b"idempotent content").await.unwrap();

    let cache = cache_at(store_dir.path());
    let first = cache.get(&file, |_p| async { Ok("extracted".to_string()) }).await.unwrap();

    for _ in 0..10 {
        let again = cache.get(&file, |_p| async { Ok("extracted".to_string()) }).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.content_hash, first.content_hash);
        assert_eq!(again.content, first.content);
    }
}

/// P2: under N concurrent callers for the same path, the processor runs
/// exactly once and every caller sees the same result.
#[tokio::test]
async fn p2_concurrent_callers_for_same_path_single_flight() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file = data_dir.path().join("doc.txt");
    tokio::fs::write(&file, b"shared content").await.unwrap();

    let cache = cache_at(store_dir.path());
    let calls = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = Arc::clone(&cache);
        let file = file.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get(&file, move |_p| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok("once".to_string())
                    }
                })
                .await
        }));
    }

    let mut contents = Vec::new();
    for handle in handles {
        contents.push(handle.await.unwrap().unwrap().content);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(contents.iter().all(|c| c == "once"));
}

/// P3: a byte-for-byte modification changes the hash and triggers
/// reprocessing, regardless of whether the file shrinks, grows, or stays the
/// same size.
#[tokio::test]
async fn p3_any_content_change_triggers_reprocessing() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file = data_dir.path().join("doc.txt");
    let cache = cache_at(store_dir.path());

    for (version, body) in [("v1", "aaaa"), ("v2", "bbbb"), ("v3", "cccccccc"), ("v4", "z")] {
        tokio::fs::write(&file, body.as_bytes()).await.unwrap();
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        filetime::set_file_mtime(&file, filetime::FileTime::from_system_time(future)).unwrap();

        let result = cache.get(&file, move |_p| async move { Ok(version.to_string()) }).await.unwrap();
        assert_eq!(result.content, version);
        assert!(!result.from_cache, "version {version} should have reprocessed");
    }
}

/// P4: two distinct paths with byte-identical content share one processor
/// invocation and one stored blob/inline record.
#[tokio::test]
async fn p4_identical_content_across_paths_dedupes() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let cache = cache_at(store_dir.path());
    let calls = Arc::new(AtomicU64::new(0));

    let mut last_hash = None;
    for name in ["one.txt", "two.txt", "three.txt"] {
        let file = data_dir.path().join(name);
        tokio::fs::write(&file, b"duplicate payload").await.unwrap();
        let calls = calls.clone();
        let result = cache
            .get(&file, move |_p| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("derived".to_string())
                }
            })
            .await
            .unwrap();
        if let Some(expected) = &last_hash {
            assert_eq!(&result.content_hash, expected);
            assert_eq!(result.content, "derived");
        }
        last_hash = Some(result.content_hash);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = cache.statistics().await.unwrap();
    assert_eq!(stats.unique_hashes, 1);
    assert_eq!(stats.duplicate_groups, 1);
    assert_eq!(stats.entry_count, 3);
}

/// P5: the in-memory tier's tracked size never exceeds its configured
/// budget, no matter how many entries are admitted.
#[tokio::test]
async fn p5_memory_tier_never_exceeds_budget() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let cache = cache_with(store_dir.path(), |c| c.memory_budget_bytes = 64 * 1024);

    for i in 0..50 {
        let file = data_dir.path().join(format!("f{i}.txt"));
        tokio::fs::write(&file, format!("payload-{i}").repeat(100)).await.unwrap();
        cache.get(&file, |_p| async { Ok("x".repeat(4096)) }).await.unwrap();

        let stats = cache.statistics().await.unwrap();
        assert!(stats.memory_usage_mb * 1024.0 * 1024.0 <= 64.0 * 1024.0 + 1.0);
    }
}

/// P6: invalidating a path removes it from every tier — a subsequent `get`
/// must reprocess rather than serve stale content.
#[tokio::test]
async fn p6_invalidate_forces_full_reprocessing() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file = data_dir.path().join("doc.txt");
    tokio::fs::write(&file, b"original").await.unwrap();

    let cache = cache_at(store_dir.path());
    cache.get(&file, |_p| async { Ok("first".to_string()) }).await.unwrap();

    let removed = cache.invalidate(&file).await.unwrap();
    assert!(removed);

    let result = cache.get(&file, |_p| async { Ok("second".to_string()) }).await.unwrap();
    assert_eq!(result.content, "second");
    assert!(!result.from_cache);

    let again_removed = cache.invalidate(&PathBuf::from("/never/cached")).await.unwrap();
    assert!(!again_removed);
}

/// P6 (blob GC): invalidating a blob-backed entry (content above the inline
/// threshold) removes its blob from disk immediately, without waiting for a
/// `sweep_old` call — spec §4.4 requires GC "after `invalidate`" too.
#[tokio::test]
async fn p6_invalidate_collects_the_entrys_blob_when_unreferenced() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file = data_dir.path().join("big.txt");
    tokio::fs::write(&file, b"big file").await.unwrap();

    let cache = cache_at(store_dir.path());
    let result = cache
        .get(&file, |_p| async { Ok("x".repeat(200 * 1024)) })
        .await
        .unwrap();

    let blob = contentcache::blob::BlobStore::new(store_dir.path(), 6);
    assert!(blob.exists(&result.content_hash), "blob-backed entry must have a blob on disk");

    let removed = cache.invalidate(&file).await.unwrap();
    assert!(removed);
    assert!(
        !blob.exists(&result.content_hash),
        "invalidate must collect a blob no longer referenced by any entry"
    );
}

/// P6 (blob GC, shared hash): invalidating one of two paths that dedupe to
/// the same content must not collect the blob while the other path still
/// references it.
#[tokio::test]
async fn p6_invalidate_keeps_the_blob_while_another_path_still_references_it() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let file_a = data_dir.path().join("a.txt");
    let file_b = data_dir.path().join("b.txt");
    tokio::fs::write(&file_a, b"byte-identical source").await.unwrap();
    tokio::fs::write(&file_b, b"byte-identical source").await.unwrap();

    let cache = cache_at(store_dir.path());
    let big = "y".repeat(200 * 1024);
    let processor = move |_p: PathBuf| {
        let big = big.clone();
        async move { Ok(big) }
    };
    let result_a = cache.get(&file_a, processor.clone()).await.unwrap();
    let result_b = cache.get(&file_b, processor).await.unwrap();
    assert_eq!(result_a.content_hash, result_b.content_hash, "both paths dedupe to one hash");

    let blob = contentcache::blob::BlobStore::new(store_dir.path(), 6);
    assert!(blob.exists(&result_a.content_hash));

    cache.invalidate(&file_a).await.unwrap();
    assert!(blob.exists(&result_a.content_hash), "blob must survive while b.txt still references it");

    cache.invalidate(&file_b).await.unwrap();
    assert!(!blob.exists(&result_a.content_hash), "blob must be collected once no entry references it");
}

/// P7: the validator rejects traversal attempts and out-of-allowlist paths
/// before the processor ever runs, for a spread of adversarial inputs.
#[tokio::test]
async fn p7_path_security_rejects_traversal_and_escapes() {
    let data_dir = tempdir().unwrap();
    let allowed_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let outside_file = data_dir.path().join("outside.txt");
    tokio::fs::write(&outside_file, b"x").await.unwrap();

    let cache = cache_with(store_dir.path(), |c| c.allowed_paths = vec![allowed_dir.path().to_path_buf()]);

    let traversal = allowed_dir.path().join("../outside.txt");
    let err = cache.get(&traversal, |_p| async { Ok("nope".to_string()) }).await.unwrap_err();
    assert!(matches!(err, contentcache::CacheError::PermissionDenied { .. }));

    let err = cache.get(&outside_file, |_p| async { Ok("nope".to_string()) }).await.unwrap_err();
    assert!(matches!(err, contentcache::CacheError::PermissionDenied { .. }));
}

/// P8: a blob written but never committed to metadata (simulating a crash
/// between blob write and metadata put) is invisible to `get`, is later
/// swept as garbage, and its removal never disturbs a live entry's own blob.
#[tokio::test]
async fn p8_orphaned_blob_is_swept_without_disturbing_live_entries() {
    let data_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let live_file = data_dir.path().join("live.txt");
    tokio::fs::write(&live_file, b"keep me").await.unwrap();

    let cache = cache_at(store_dir.path());
    let live = cache
        .get(&live_file, |_p| async { Ok("x".repeat(200 * 1024)) })
        .await
        .unwrap();

    let blob = contentcache::blob::BlobStore::new(store_dir.path(), 6);
    let orphan_hash = contentcache::fingerprint::fingerprint_bytes(b"never committed to metadata");
    blob.put(&orphan_hash, "never committed to metadata").unwrap();
    assert!(blob.exists(&orphan_hash));

    let removed_entries = cache.sweep_old(3600.0).await.unwrap();
    assert_eq!(removed_entries, 0, "nothing is an hour old yet");

    assert!(!blob.exists(&orphan_hash), "orphaned blob should have been garbage collected");
    assert!(blob.exists(&live.content_hash), "live entry's blob must survive the sweep");

    let still_there = cache.get(&live_file, |_p| async { Ok("should not run".to_string()) }).await.unwrap();
    assert!(still_there.from_cache);
}
