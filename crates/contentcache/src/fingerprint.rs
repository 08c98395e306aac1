//! Content Fingerprinter (§4.2): SHA-256 over file bytes in bounded chunks.

use crate::error::{CacheError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Chunk size recommended by the spec: large enough to amortize syscall
/// overhead, small enough that a single chunk never dominates the event
/// loop.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 fingerprint of `path`, yielding to the runtime
/// between chunks so a large file does not starve other tasks.
///
/// Returns the 64-char lowercase hex digest. Any read failure is reported
/// as `StorageFailure`.
pub async fn fingerprint(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CacheError::storage_failure_with_source(format!("cannot open {}: {e}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| CacheError::storage_failure_with_source(format!("cannot read {}: {e}", path.display()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        tokio::task::yield_now().await;
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint raw bytes already in memory (used for dedupe comparisons and
/// tests where no file round trip is needed).
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let hash = fingerprint(&file).await.unwrap();
        assert_eq!(hash, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn deterministic_across_calls() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, b"world").await.unwrap();

        let h1 = fingerprint(&file).await.unwrap();
        let h2 = fingerprint(&file).await.unwrap();
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn differs_for_different_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, b"hello").await.unwrap();
        tokio::fs::write(&b, b"world").await.unwrap();

        assert_ne!(fingerprint(&a).await.unwrap(), fingerprint(&b).await.unwrap());
    }

    #[tokio::test]
    async fn spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.bin");
        let data = vec![0x5au8; CHUNK_SIZE * 3 + 17];
        tokio::fs::write(&file, &data).await.unwrap();

        let hash = fingerprint(&file).await.unwrap();
        assert_eq!(hash, fingerprint_bytes(&data));
    }

    #[tokio::test]
    async fn missing_file_is_storage_failure() {
        let err = fingerprint(Path::new("/nonexistent/file")).await.unwrap_err();
        assert!(matches!(err, CacheError::StorageFailure { .. }));
    }
}
