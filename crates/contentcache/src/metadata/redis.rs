//! Remote KV metadata store: entries serialized with `rmp-serde` (the
//! teacher's OCR cache encoding) under `cache:entry:{sha256(path)}`, a
//! secondary hash index as a Redis set `cache:hash:{content_hash}`, and an
//! access-time index as a sorted set `cache:atime` (spec §4.5 "Remote KV").
//! Multi-key updates (`put`, `delete_by_path`, `touch`) each run as a single
//! `redis::Script` so they commit atomically from Redis's perspective.

use super::{MetadataStore, Totals};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::path::Path;

const PUT_SCRIPT: &str = r#"
local entry_key = KEYS[1]
local hash_set_key = KEYS[2]
local atime_key = KEYS[3]
local path = ARGV[1]
local payload = ARGV[2]
local last_accessed = ARGV[3]
local old = redis.call('GET', entry_key)
if old then
    local old_hash_key = ARGV[4]
    redis.call('SREM', old_hash_key, path)
end
redis.call('SET', entry_key, payload)
redis.call('SADD', hash_set_key, path)
redis.call('ZADD', atime_key, last_accessed, path)
return 1
"#;

const DELETE_SCRIPT: &str = r#"
local entry_key = KEYS[1]
local hash_set_key = KEYS[2]
local atime_key = KEYS[3]
local path = ARGV[1]
local existed = redis.call('DEL', entry_key)
if hash_set_key ~= '' then
    redis.call('SREM', hash_set_key, path)
end
redis.call('ZREM', atime_key, path)
return existed
"#;

const TOUCH_SCRIPT: &str = r#"
local entry_key = KEYS[1]
local atime_key = KEYS[2]
local path = ARGV[1]
local payload = ARGV[2]
local last_accessed = ARGV[3]
if redis.call('EXISTS', entry_key) == 0 then
    return 0
end
redis.call('SET', entry_key, payload)
redis.call('ZADD', atime_key, last_accessed, path)
return 1
"#;

const ATIME_ZSET: &str = "cache:atime";

pub struct RedisMetadataStore {
    pool: Pool,
}

impl RedisMetadataStore {
    pub fn connect(redis_url: &str, pool_size: usize) -> Result<Self> {
        let cfg = PoolConfig::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::storage_failure_with_source("cannot build redis pool", e))?;
        let _ = pool_size;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::storage_failure_with_source("cannot acquire redis connection", e))
    }
}

fn entry_key(path: &Path) -> String {
    format!("cache:entry:{}", crate::fingerprint::fingerprint_bytes(path.to_string_lossy().as_bytes()))
}

fn hash_set_key(hash: &str) -> String {
    format!("cache:hash:{hash}")
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn decode(payload: &[u8]) -> Result<CacheEntry> {
    Ok(rmp_serde::from_slice(payload)?)
}

fn encode(entry: &CacheEntry) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(entry)?)
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get_by_path(&self, path: &Path) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn().await?;
        let payload: Option<Vec<u8>> = conn.get(entry_key(path)).await?;
        payload.map(|p| decode(&p)).transpose()
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>> {
        let mut conn = self.conn().await?;
        let paths: Vec<String> = conn.smembers(hash_set_key(hash)).await?;
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let key = entry_key(Path::new(&path));
            if let Some(payload) = conn.get::<_, Option<Vec<u8>>>(&key).await? {
                out.push(decode(&payload)?);
            }
        }
        Ok(out)
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.conn().await?;
        let old = self.get_by_path(&entry.path).await?;
        let old_hash_key = old.map(|e| hash_set_key(&e.content_hash)).unwrap_or_default();

        Script::new(PUT_SCRIPT)
            .key(entry_key(&entry.path))
            .key(hash_set_key(&entry.content_hash))
            .key(ATIME_ZSET)
            .arg(path_string(&entry.path))
            .arg(encode(entry)?)
            .arg(entry.last_accessed)
            .arg(old_hash_key)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }

    async fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let mut conn = self.conn().await?;
        let existing = self.get_by_path(path).await?;
        let hash_key = existing.map(|e| hash_set_key(&e.content_hash)).unwrap_or_default();

        let removed: i64 = Script::new(DELETE_SCRIPT)
            .key(entry_key(path))
            .key(hash_key)
            .key(ATIME_ZSET)
            .arg(path_string(path))
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::from)?;
        Ok(removed > 0)
    }

    async fn touch(&self, path: &Path, last_accessed: f64, access_count: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let Some(mut entry) = self.get_by_path(path).await? else {
            return Ok(());
        };
        entry.last_accessed = last_accessed;
        entry.access_count = access_count;

        Script::new(TOUCH_SCRIPT)
            .key(entry_key(path))
            .key(ATIME_ZSET)
            .arg(path_string(path))
            .arg(encode(&entry)?)
            .arg(last_accessed)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }

    async fn iter_older_than(&self, cutoff: f64) -> Result<Vec<CacheEntry>> {
        let mut conn = self.conn().await?;
        let paths: Vec<String> = conn.zrangebyscore(ATIME_ZSET, f64::MIN, cutoff).await?;
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(payload) = conn.get::<_, Option<Vec<u8>>>(entry_key(Path::new(&path))).await? {
                out.push(decode(&payload)?);
            }
        }
        Ok(out)
    }

    async fn count_by_hash(&self) -> Result<HashMap<String, u64>> {
        let mut conn = self.conn().await?;
        let all_paths: Vec<String> = conn.zrange(ATIME_ZSET, 0, -1).await?;
        let mut counts = HashMap::new();
        for path in all_paths {
            if let Some(payload) = conn.get::<_, Option<Vec<u8>>>(entry_key(Path::new(&path))).await? {
                let entry = decode(&payload)?;
                *counts.entry(entry.content_hash).or_insert(0u64) += 1;
            }
        }
        Ok(counts)
    }

    async fn totals(&self) -> Result<Totals> {
        let mut conn = self.conn().await?;
        let all_paths: Vec<String> = conn.zrange(ATIME_ZSET, 0, -1).await?;
        let mut totals = Totals::default();
        for path in all_paths {
            if let Some(payload) = conn.get::<_, Option<Vec<u8>>>(entry_key(Path::new(&path))).await? {
                let entry = decode(&payload)?;
                totals.entry_count += 1;
                totals.total_bytes += entry.file_size;
            }
        }
        Ok(totals)
    }
}
