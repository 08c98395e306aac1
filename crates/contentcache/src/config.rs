//! Cache configuration, with environment-variable overrides (spec §6).

use crate::error::{CacheError, Result};
use std::path::PathBuf;

/// Byte-size above which extracted content is stored in the blob store
/// rather than inline in the metadata record.
pub const INLINE_THRESHOLD_BYTES: usize = 64 * 1024;

/// Immutable construction-time configuration for a [`crate::Cache`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub memory_budget_bytes: u64,
    pub verify_hash: bool,
    pub backend_pool_size: u32,
    pub compression_level: u32,
    pub filter_capacity: usize,
    pub allowed_paths: Vec<PathBuf>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache_storage"),
            memory_budget_bytes: 100 * 1024 * 1024,
            verify_hash: true,
            backend_pool_size: 10,
            compression_level: 6,
            filter_capacity: 1_000_000,
            allowed_paths: Vec::new(),
            debug: false,
        }
    }
}

impl Config {
    /// Layer environment-variable overrides over [`Config::default`].
    ///
    /// Each option is read from a same-named upper-case env var, per spec
    /// §6: `CACHE_DIR`, `MEMORY_BUDGET_BYTES`, `VERIFY_HASH`,
    /// `BACKEND_POOL_SIZE`, `COMPRESSION_LEVEL`, `FILTER_CAPACITY`,
    /// `ALLOWED_PATHS` (colon-separated), `DEBUG`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("CACHE_DIR") {
            config.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MEMORY_BUDGET_BYTES") {
            config.memory_budget_bytes = parse_env("MEMORY_BUDGET_BYTES", &v)?;
        }
        if let Ok(v) = std::env::var("VERIFY_HASH") {
            config.verify_hash = parse_bool("VERIFY_HASH", &v)?;
        }
        if let Ok(v) = std::env::var("BACKEND_POOL_SIZE") {
            config.backend_pool_size = parse_env("BACKEND_POOL_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("COMPRESSION_LEVEL") {
            config.compression_level = parse_env("COMPRESSION_LEVEL", &v)?;
        }
        if let Ok(v) = std::env::var("FILTER_CAPACITY") {
            config.filter_capacity = parse_env("FILTER_CAPACITY", &v)?;
        }
        if let Ok(v) = std::env::var("ALLOWED_PATHS") {
            config.allowed_paths = v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect();
        }
        if let Ok(v) = std::env::var("DEBUG") {
            config.debug = parse_bool("DEBUG", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject a config that violates its own documented invariants
    /// (compression level range, non-zero pool size) before it reaches the
    /// coordinator.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(CacheError::config_invalid(format!(
                "compression_level must be in 0..=9, got {}",
                self.compression_level
            )));
        }
        if self.backend_pool_size == 0 {
            return Err(CacheError::config_invalid("backend_pool_size must be at least 1"));
        }
        if self.filter_capacity == 0 {
            return Err(CacheError::config_invalid("filter_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CacheError::config_invalid(format!("invalid value for {name}: {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CacheError::config_invalid(format!(
            "invalid boolean value for {name}: {value:?}"
        ))),
    }
}
