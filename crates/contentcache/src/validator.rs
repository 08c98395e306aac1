//! Path Validator (§4.1): rejects inputs outside an allowlist and rejects
//! traversal patterns, producing a canonical path or `PermissionDenied`.

use crate::error::{CacheError, Result};
use std::path::{Path, PathBuf};

/// Validate and canonicalize `raw` against `allowed`, applying the spec's
/// rules in order:
///
/// 1. Reject the literal substring `..` in the raw input, before resolution.
/// 2. Resolve symlinks and normalize to absolute form.
/// 3. If `allowed` is non-empty, require the resolved path to descend from
///    at least one (canonicalized) allowlist entry.
/// 4. Reject if the resolved path does not exist or is not a regular file.
///
/// This function is pure aside from the filesystem probes steps 2 and 4
/// require; it never mutates state.
pub fn validate(raw: &Path, allowed: &[PathBuf]) -> Result<PathBuf> {
    if raw.components().any(|c| c.as_os_str() == "..") {
        return Err(CacheError::permission_denied(format!(
            "path contains a parent-directory component: {}",
            raw.display()
        )));
    }

    let canonical = std::fs::canonicalize(raw).map_err(|e| {
        CacheError::permission_denied_with_source(format!("cannot resolve path {}: {e}", raw.display()), e)
    })?;

    if !allowed.is_empty() {
        let mut descends = false;
        for root in allowed {
            let Ok(canonical_root) = std::fs::canonicalize(root) else {
                continue;
            };
            if canonical.starts_with(&canonical_root) {
                descends = true;
                break;
            }
        }
        if !descends {
            return Err(CacheError::permission_denied(format!(
                "path {} is outside the configured allowlist",
                canonical.display()
            )));
        }
    }

    let metadata = std::fs::metadata(&canonical).map_err(|e| {
        CacheError::permission_denied_with_source(format!("cannot stat {}: {e}", canonical.display()), e)
    })?;
    if !metadata.is_file() {
        return Err(CacheError::permission_denied(format!(
            "{} is not a regular file",
            canonical.display()
        )));
    }

    Ok(canonical)
}
