//! Integrity Verification (§4.9): classifies a stored entry against the
//! current on-disk state of its source path.

use crate::types::{CacheEntry, Integrity};
use std::path::Path;

/// Check `entry` against `path`'s current metadata (and, if `verify_hash`,
/// its content). Size is checked before mtime: it is cheaper and strictly
/// more reliable against clock skew.
pub async fn check(entry: &CacheEntry, path: &Path, verify_hash: bool) -> Integrity {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return Integrity::FileMissing,
    };

    if metadata.len() != entry.file_size {
        return Integrity::FileModified;
    }

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    if mtime > entry.mtime {
        return Integrity::FileModified;
    }

    if verify_hash {
        match crate::fingerprint::fingerprint(path).await {
            Ok(hash) if hash == entry.content_hash => Integrity::Valid,
            Ok(_) => Integrity::ContentChanged,
            Err(_) => Integrity::FileMissing,
        }
    } else {
        Integrity::Valid
    }
}
