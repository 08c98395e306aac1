//! contentcache - a content-addressed cache for expensive, user-supplied
//! extraction functions.
//!
//! Wraps any async `path -> String` callable (LLM calls, OCR, document
//! parsing, ...) with memoization keyed on a file's identity and its
//! on-disk state: a path that has not changed size or modification time
//! (and, optionally, content hash) since it was last processed is served
//! from a bounded in-memory tier, a durable metadata store, or a
//! compressed blob store, in that order, without re-invoking the
//! processor.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use contentcache::{Cache, Config};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> contentcache::Result<()> {
//! let config = Config::default();
//! let metadata = Arc::new(contentcache::metadata::sqlite::SqliteMetadataStore::open(
//!     &config.cache_dir,
//!     config.backend_pool_size,
//! )?);
//! let cache = Cache::new(config, metadata)?;
//!
//! let result = cache
//!     .get(&PathBuf::from("document.pdf"), |path| async move {
//!         Ok(format!("extracted content of {}", path.display()))
//!     })
//!     .await?;
//! println!("{} (from_cache={})", result.content, result.from_cache);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`validator`] — path canonicalization and allowlist enforcement
//! - [`fingerprint`] — SHA-256 content fingerprinting
//! - [`filter`] — bloom-filter-backed negative-existence fast-reject
//! - [`blob`] — compressed, content-addressed blob storage
//! - [`metadata`] — the pluggable `MetadataStore` trait and its two
//!   reference backends (`sqlite`, `redis`)
//! - [`memory`] — the bounded in-memory LRU tier
//! - [`serializer`] — per-path mutex registry guaranteeing at most one
//!   in-flight processor call per path
//! - [`integrity`] — classifies a stored entry against current disk state
//! - [`coordinator`] — [`Cache`], the state machine tying all of the above
//!   together
//! - [`metrics`] — Prometheus-exposition counters and histograms

#![deny(unsafe_code)]

pub mod blob;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod integrity;
pub mod memory;
pub mod metadata;
pub mod metrics;
pub mod serializer;
pub mod types;
pub mod validator;

pub use config::Config;
pub use coordinator::Cache;
pub use error::{CacheError, Result};
pub use metadata::MetadataStore;
pub use types::{CacheEntry, CachedContent, ErrorCounts, Integrity, Statistics};
