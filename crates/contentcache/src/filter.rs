//! Negative-Existence Filter (§4.3): an approximate membership structure
//! for "we have seen this path as missing" fast-reject.

use bloomfilter::Bloom;
use parking_lot::Mutex;
use std::path::Path;

/// Target false-positive rate; a false positive only costs one extra `stat`
/// call, so the spec's ≤1% bound leaves comfortable margin.
const TARGET_FP_RATE: f64 = 0.01;

/// Advisory, append-only membership set of paths observed as non-existent.
/// Rebuilt from empty on process restart; no removal operation is required.
pub struct NegativeExistenceFilter {
    bloom: Mutex<Bloom<str>>,
}

impl NegativeExistenceFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            bloom: Mutex::new(Bloom::new_for_fp_rate(capacity.max(1), TARGET_FP_RATE)),
        }
    }

    /// Record that `path` was observed as missing.
    pub fn record_missing(&self, path: &Path) {
        self.bloom.lock().set(&path_key(path));
    }

    /// `true` means "probably missing; probe the filesystem before trusting
    /// this". `false` is a hard guarantee the path was never recorded.
    pub fn probably_missing(&self, path: &Path) -> bool {
        self.bloom.lock().check(&path_key(path))
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
