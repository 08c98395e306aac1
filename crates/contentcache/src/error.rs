//! Error types for contentcache.
//!
//! All fallible operations return `Result<T>` = `std::result::Result<T,
//! CacheError>`. The taxonomy mirrors the component that raised the error,
//! not the underlying library, so callers can match on `CacheError::Kind`
//! without knowing whether the metadata store is backed by SQLite or Redis.
//!
//! # Error Handling Philosophy
//!
//! - `Io` (from `std::io::Error`) always bubbles up unchanged: it indicates
//!   a real filesystem problem, not a cache-layer decision.
//! - `IntegrityFault` is recovered locally by the coordinator (reprocess
//!   once); if it recurs it is re-raised as `StorageFailure`.
//! - Every other variant propagates to the caller and increments the
//!   matching counter in `Cache::statistics().errors`.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// The cache's error taxonomy (spec §7). Variant names are the error kind;
/// they are also used verbatim as keys in `Statistics::errors`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("permission denied: {message}")]
    PermissionDenied {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("source missing: {message}")]
    SourceMissing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("integrity fault: {message}")]
    IntegrityFault {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage failure: {message}")]
    StorageFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("processing error: {message}")]
    ProcessingError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl CacheError {
    /// Stable name of the error kind, used as the key in `errors: {kind -> count}`.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Io(_) => "Io",
            CacheError::PermissionDenied { .. } => "PermissionDenied",
            CacheError::SourceMissing { .. } => "SourceMissing",
            CacheError::IntegrityFault { .. } => "IntegrityFault",
            CacheError::StorageFailure { .. } => "StorageFailure",
            CacheError::ProcessingError { .. } => "ProcessingError",
            CacheError::ConfigInvalid { .. } => "ConfigInvalid",
            CacheError::LockPoisoned(_) => "LockPoisoned",
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $with_source:ident, $variant:ident) => {
        impl CacheError {
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            pub fn $with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

error_constructor!(permission_denied, permission_denied_with_source, PermissionDenied);
error_constructor!(source_missing, source_missing_with_source, SourceMissing);
error_constructor!(integrity_fault, integrity_fault_with_source, IntegrityFault);
error_constructor!(storage_failure, storage_failure_with_source, StorageFailure);
error_constructor!(processing_error, processing_error_with_source, ProcessingError);
error_constructor!(config_invalid, config_invalid_with_source, ConfigInvalid);

#[cfg(feature = "sqlite-backend")]
impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::storage_failure_with_source(err.to_string(), err)
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<r2d2::Error> for CacheError {
    fn from(err: r2d2::Error) -> Self {
        CacheError::storage_failure_with_source(err.to_string(), err)
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::storage_failure_with_source(err.to_string(), err)
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CacheError::storage_failure_with_source(err.to_string(), err)
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CacheError::storage_failure_with_source(err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_bubbles_unchanged() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CacheError = io_err.into();
        assert!(matches!(err, CacheError::Io(_)));
        assert_eq!(err.kind(), "Io");
    }

    #[test]
    fn constructors_round_trip_kind() {
        assert_eq!(CacheError::permission_denied("x").kind(), "PermissionDenied");
        assert_eq!(CacheError::source_missing("x").kind(), "SourceMissing");
        assert_eq!(CacheError::integrity_fault("x").kind(), "IntegrityFault");
        assert_eq!(CacheError::storage_failure("x").kind(), "StorageFailure");
        assert_eq!(CacheError::processing_error("x").kind(), "ProcessingError");
        assert_eq!(CacheError::config_invalid("x").kind(), "ConfigInvalid");
    }

    #[test]
    fn with_source_preserves_chain() {
        let source = std::io::Error::other("tesseract failed");
        let err = CacheError::processing_error_with_source("failed", source);
        assert!(std::error::Error::source(&err).is_some());
    }
}
