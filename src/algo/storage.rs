//! SQLite-backed persistent cache for similarity representations.
//!
//! Each batch is keyed by `(content_hash, args_hash)` and stored as a JSON
//! blob. The storage layer is opt-in via the `cache` feature.

use rusqlite::{params, Connection, OptionalExtension};

use super::cache::{self, CacheKey, CacheMeta, RepresentationStore};
use super::clustering::SparseVector;
use crate::error::{GroupingError, Result};

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> GroupingError + '_ {
    move |e| GroupingError::Cache(format!("{context}: {e}"))
}

/// SQLite-backed representation cache.
pub struct CacheDb {
    conn: Connection,
}

impl CacheDb {
    /// Open (or create) a cache database at the given path.
    pub fn open_or_create(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| GroupingError::Cache(format!("Failed to open cache DB at '{path}': {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err("Failed to set PRAGMA"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS representations (
                content_hash  INTEGER NOT NULL,
                args_hash     INTEGER NOT NULL,
                row_count     INTEGER NOT NULL,
                version       TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                payload       BLOB NOT NULL,
                UNIQUE(content_hash, args_hash)
            );",
        )
        .map_err(db_err("Failed to create cache schema"))?;

        Ok(Self { conn })
    }

    /// Retrieve a cached payload. Returns `None` on cache miss.
    pub fn get(&self, key: &CacheKey) -> Result<Option<(CacheMeta, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT row_count, version, created_at, payload
                 FROM representations
                 WHERE content_hash = ?1 AND args_hash = ?2",
            )
            .map_err(db_err("Failed to prepare SELECT"))?;

        let result = stmt
            .query_row(
                params![key.content_hash as i64, key.args_hash as i64],
                |row| {
                    let row_count: i64 = row.get(0)?;
                    let version: String = row.get(1)?;
                    let created_at: i64 = row.get(2)?;
                    let payload: Vec<u8> = row.get(3)?;
                    Ok((row_count, version, created_at, payload))
                },
            )
            .optional()
            .map_err(db_err("Failed to query cache"))?;

        Ok(result.map(|(row_count, version, created_at, payload)| {
            let meta = CacheMeta {
                key: *key,
                row_count: row_count as usize,
                version,
                created_at: created_at as u64,
            };
            (meta, payload)
        }))
    }

    /// Store (upsert) a payload.
    pub fn put(&self, meta: &CacheMeta, payload: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO representations (content_hash, args_hash, row_count, version, created_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(content_hash, args_hash)
                 DO UPDATE SET row_count = excluded.row_count,
                               version = excluded.version,
                               created_at = excluded.created_at,
                               payload = excluded.payload",
                params![
                    meta.key.content_hash as i64,
                    meta.key.args_hash as i64,
                    meta.row_count as i64,
                    meta.version,
                    meta.created_at as i64,
                    payload,
                ],
            )
            .map_err(db_err("Failed to upsert representations"))?;
        Ok(())
    }

    /// Drop every cached batch. Returns the number of rows deleted.
    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM representations", [])
            .map_err(db_err("Failed to clear cache"))
    }

    /// Metadata about all cached batches, newest first.
    pub fn info(&self) -> Result<Vec<EntryInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT content_hash, args_hash, row_count, version, created_at, length(payload)
                 FROM representations
                 ORDER BY created_at DESC",
            )
            .map_err(db_err("Failed to prepare info query"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(EntryInfo {
                    content_hash: row.get::<_, i64>(0)? as u64,
                    args_hash: row.get::<_, i64>(1)? as u64,
                    row_count: row.get::<_, i64>(2)? as usize,
                    version: row.get(3)?,
                    created_at: row.get::<_, i64>(4)? as u64,
                    payload_bytes: row.get::<_, i64>(5)? as usize,
                })
            })
            .map_err(db_err("Failed to query info"))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(db_err("Failed to read row"))?);
        }
        Ok(result)
    }

    /// Total size of the database file in bytes (approximate).
    pub fn db_size_bytes(&self) -> Result<u64> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .map_err(db_err("Failed to get page_count"))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .map_err(db_err("Failed to get page_size"))?;
        Ok((page_count * page_size) as u64)
    }
}

impl RepresentationStore for CacheDb {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<SparseVector>>> {
        match self.get(key)? {
            Some((meta, payload)) if cache::is_valid(&meta, key) => {
                Ok(Some(serde_json::from_slice(&payload)?))
            }
            _ => Ok(None),
        }
    }

    fn save(&mut self, meta: &CacheMeta, vectors: &[SparseVector]) -> Result<()> {
        let payload = serde_json::to_vec(vectors)?;
        self.put(meta, &payload)
    }
}

/// Info record for a cached batch (returned by `CacheDb::info()`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntryInfo {
    pub content_hash: u64,
    pub args_hash: u64,
    pub row_count: usize,
    pub version: String,
    pub created_at: u64,
    pub payload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> CacheDb {
        CacheDb::open_or_create(":memory:").unwrap()
    }

    fn key(content: u64, args: u64) -> CacheKey {
        CacheKey {
            content_hash: content,
            args_hash: args,
        }
    }

    fn vectors() -> Vec<SparseVector> {
        vec![
            SparseVector::from_pairs(vec![(0, 0.6), (3, 0.8)]),
            SparseVector::from_pairs(vec![(1, 1.0)]),
        ]
    }

    #[test]
    fn open_or_create_in_memory() {
        assert!(test_db().info().unwrap().is_empty());
    }

    #[test]
    fn put_and_get_roundtrip() {
        let db = test_db();
        db.put(&CacheMeta::new(key(111, 222), 50), b"payload").unwrap();
        let (meta, payload) = db.get(&key(111, 222)).unwrap().unwrap();
        assert_eq!(meta.row_count, 50);
        assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(payload, b"payload");
        assert!(db.get(&key(111, 333)).unwrap().is_none());
    }

    #[test]
    fn put_upsert_overwrites() {
        let db = test_db();
        db.put(&CacheMeta::new(key(1, 2), 5), b"first").unwrap();
        db.put(&CacheMeta::new(key(1, 2), 10), b"second").unwrap();
        let (meta, payload) = db.get(&key(1, 2)).unwrap().unwrap();
        assert_eq!(meta.row_count, 10);
        assert_eq!(payload, b"second");
    }

    #[test]
    fn store_roundtrip_vectors() {
        let mut db = test_db();
        let k = key(7, 8);
        assert!(db.load(&k).unwrap().is_none());
        db.save(&CacheMeta::new(k, 2), &vectors()).unwrap();
        assert_eq!(db.load(&k).unwrap(), Some(vectors()));
    }

    #[test]
    fn stale_version_is_a_miss() {
        let mut db = test_db();
        let k = key(7, 8);
        let mut meta = CacheMeta::new(k, 2);
        meta.version = "0.0.0".into();
        db.save(&meta, &vectors()).unwrap();
        assert!(db.load(&k).unwrap().is_none());
    }

    #[test]
    fn clear_and_info() {
        let db = test_db();
        db.put(&CacheMeta::new(key(1, 1), 1), &[0u8; 64]).unwrap();
        db.put(&CacheMeta::new(key(2, 1), 1), b"x").unwrap();
        let info = db.info().unwrap();
        assert_eq!(info.len(), 2);
        assert!(info.iter().any(|i| i.payload_bytes == 64));
        assert_eq!(db.clear().unwrap(), 2);
        assert!(db.info().unwrap().is_empty());
        assert!(db.db_size_bytes().unwrap() > 0);
    }
}
