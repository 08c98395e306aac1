//! Embedded relational metadata store: a single `metadata.db` SQLite file
//! behind an `r2d2` connection pool, WAL journaling and `synchronous=NORMAL`
//! (spec §4.5 "Embedded relational"). Schema mirrors the retrieval pack's
//! file-cache table shape: one `entries` table keyed by `path`, secondary
//! indexes on `content_hash` and `last_accessed`, and a small `counters`
//! table for aggregate statistics.

use super::{MetadataStore, Totals};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct SqliteMetadataStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteMetadataStore {
    /// Open (creating if absent) `cache_dir/metadata.db`, applying WAL and
    /// `synchronous=NORMAL` pragmas on every pooled connection.
    pub fn open(cache_dir: &Path, pool_size: u32) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let db_path = cache_dir.join("metadata.db");

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder().max_size(pool_size).build(manager).map_err(|e| {
            CacheError::storage_failure_with_source(format!("cannot open metadata store at {}", db_path.display()), e)
        })?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                mtime REAL NOT NULL,
                file_size INTEGER NOT NULL,
                content TEXT,
                blob_ref TEXT,
                extracted_at REAL NOT NULL,
                access_count INTEGER NOT NULL,
                last_accessed REAL NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS entries_content_hash ON entries(content_hash);
            CREATE INDEX IF NOT EXISTS entries_last_accessed ON entries(last_accessed);
            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
        let path: String = row.get("path")?;
        Ok(CacheEntry {
            path: PathBuf::from(path),
            content_hash: row.get("content_hash")?,
            mtime: row.get("mtime")?,
            file_size: row.get::<_, i64>("file_size")? as u64,
            content: row.get("content")?,
            blob_ref: row.get("blob_ref")?,
            extracted_at: row.get("extracted_at")?,
            access_count: row.get::<_, i64>("access_count")? as u64,
            last_accessed: row.get("last_accessed")?,
            created_at: row.get("created_at")?,
        })
    }

    fn pooled(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn insert_entry(conn: &Connection, entry: &CacheEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entries (path, content_hash, mtime, file_size, content, blob_ref, extracted_at, access_count, last_accessed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            mtime = excluded.mtime,
            file_size = excluded.file_size,
            content = excluded.content,
            blob_ref = excluded.blob_ref,
            extracted_at = excluded.extracted_at,
            access_count = excluded.access_count,
            last_accessed = excluded.last_accessed,
            created_at = excluded.created_at",
        params![
            path_key(&entry.path),
            entry.content_hash,
            entry.mtime,
            entry.file_size as i64,
            entry.content,
            entry.blob_ref,
            entry.extracted_at,
            entry.access_count as i64,
            entry.last_accessed,
            entry.created_at,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_by_path(&self, path: &Path) -> Result<Option<CacheEntry>> {
        let conn = self.pooled()?;
        let key = path_key(path);
        conn.query_row("SELECT * FROM entries WHERE path = ?1", params![key], Self::row_to_entry)
            .optional()
            .map_err(CacheError::from)
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>> {
        let conn = self.pooled()?;
        let mut stmt = conn.prepare("SELECT * FROM entries WHERE content_hash = ?1")?;
        let rows = stmt.query_map(params![hash], Self::row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CacheError::from)
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.pooled()?;
        insert_entry(&conn, entry)?;
        Ok(())
    }

    async fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let conn = self.pooled()?;
        let affected = conn.execute("DELETE FROM entries WHERE path = ?1", params![path_key(path)])?;
        Ok(affected > 0)
    }

    async fn touch(&self, path: &Path, last_accessed: f64, access_count: u64) -> Result<()> {
        let conn = self.pooled()?;
        conn.execute(
            "UPDATE entries SET last_accessed = ?1, access_count = ?2 WHERE path = ?3",
            params![last_accessed, access_count as i64, path_key(path)],
        )?;
        Ok(())
    }

    async fn iter_older_than(&self, cutoff: f64) -> Result<Vec<CacheEntry>> {
        let conn = self.pooled()?;
        let mut stmt = conn.prepare("SELECT * FROM entries WHERE last_accessed < ?1")?;
        let rows = stmt.query_map(params![cutoff], Self::row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CacheError::from)
    }

    async fn count_by_hash(&self) -> Result<HashMap<String, u64>> {
        let conn = self.pooled()?;
        let mut stmt = conn.prepare("SELECT content_hash, COUNT(*) FROM entries GROUP BY content_hash")?;
        let rows = stmt.query_map([], |row| {
            let hash: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((hash, count as u64))
        })?;
        rows.collect::<rusqlite::Result<HashMap<_, _>>>().map_err(CacheError::from)
    }

    async fn totals(&self) -> Result<Totals> {
        let conn = self.pooled()?;
        let (entry_count, total_bytes): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), SUM(file_size) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(Totals {
            entry_count: entry_count as u64,
            total_bytes: total_bytes.unwrap_or(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_secs;
    use tempfile::tempdir;

    fn entry(path: &str, hash: &str) -> CacheEntry {
        let now = now_secs();
        CacheEntry {
            path: PathBuf::from(path),
            content_hash: hash.to_string(),
            mtime: now,
            file_size: 42,
            content: Some("hello".to_string()),
            blob_ref: None,
            extracted_at: now,
            access_count: 0,
            last_accessed: now,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        let e = entry("/a", "hash-a");
        store.put(&e).await.unwrap();

        let fetched = store.get_by_path(Path::new("/a")).await.unwrap().unwrap();
        assert_eq!(fetched, e);
    }

    #[tokio::test]
    async fn put_upserts_by_path() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        store.put(&entry("/a", "hash-a")).await.unwrap();
        store.put(&entry("/a", "hash-b")).await.unwrap();

        let all = store.get_by_hash("hash-a").await.unwrap();
        assert!(all.is_empty());
        let fetched = store.get_by_path(Path::new("/a")).await.unwrap().unwrap();
        assert_eq!(fetched.content_hash, "hash-b");
    }

    #[tokio::test]
    async fn get_by_hash_finds_duplicates() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        store.put(&entry("/a", "shared")).await.unwrap();
        store.put(&entry("/b", "shared")).await.unwrap();

        let matches = store.get_by_hash("shared").await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn delete_by_path_reports_existence() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        store.put(&entry("/a", "hash-a")).await.unwrap();

        assert!(store.delete_by_path(Path::new("/a")).await.unwrap());
        assert!(!store.delete_by_path(Path::new("/a")).await.unwrap());
        assert!(store.get_by_path(Path::new("/a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_updates_access_metadata_only() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        let e = entry("/a", "hash-a");
        store.put(&e).await.unwrap();

        store.touch(Path::new("/a"), 12345.0, 7).await.unwrap();
        let fetched = store.get_by_path(Path::new("/a")).await.unwrap().unwrap();
        assert_eq!(fetched.last_accessed, 12345.0);
        assert_eq!(fetched.access_count, 7);
        assert_eq!(fetched.content_hash, "hash-a");
    }

    #[tokio::test]
    async fn iter_older_than_filters_by_last_accessed() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        let mut old = entry("/old", "hash-old");
        old.last_accessed = 100.0;
        let mut fresh = entry("/fresh", "hash-fresh");
        fresh.last_accessed = 999_999_999.0;
        store.put(&old).await.unwrap();
        store.put(&fresh).await.unwrap();

        let stale = store.iter_older_than(1000.0).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].path, PathBuf::from("/old"));
    }

    #[tokio::test]
    async fn totals_reflects_entry_count_and_bytes() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        store.put(&entry("/a", "hash-a")).await.unwrap();
        store.put(&entry("/b", "hash-b")).await.unwrap();

        let totals = store.totals().await.unwrap();
        assert_eq!(totals.entry_count, 2);
        assert_eq!(totals.total_bytes, 84);
    }

    #[tokio::test]
    async fn count_by_hash_groups_duplicates() {
        let dir = tempdir().unwrap();
        let store = SqliteMetadataStore::open(dir.path(), 4).unwrap();
        store.put(&entry("/a", "shared")).await.unwrap();
        store.put(&entry("/b", "shared")).await.unwrap();
        store.put(&entry("/c", "unique")).await.unwrap();

        let counts = store.count_by_hash().await.unwrap();
        assert_eq!(counts.get("shared"), Some(&2));
        assert_eq!(counts.get("unique"), Some(&1));
    }
}
