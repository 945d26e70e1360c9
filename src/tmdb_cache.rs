use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;

/// SQLite-backed cache for TMDB responses, keyed by a fingerprint of the
/// normalized query and media kind. Expired rows are deleted on read.
pub struct TmdbCache {
    conn: Mutex<Connection>,
    ttl_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TmdbCacheStats {
    pub total_entries: i64,
    pub movie_entries: i64,
    pub tv_entries: i64,
}

impl TmdbCache {
    pub fn open(path: &Path, ttl_days: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tmdb_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_hash TEXT UNIQUE NOT NULL,
                query TEXT NOT NULL,
                media_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp REAL NOT NULL,
                ttl_days INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_query_hash ON tmdb_cache (query_hash)",
            [],
        )?;

        debug!("Opened TMDB cache at {}", path.display());

        Ok(TmdbCache {
            conn: Mutex::new(conn),
            ttl_days,
        })
    }

    fn hash_query(query: &str, kind: &str) -> String {
        let key = format!("{}:{}", query.to_lowercase().trim(), kind);
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn now() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Look up a cached payload. Expired entries are removed and reported
    /// as a miss.
    pub fn get(&self, query: &str, kind: &str) -> Result<Option<String>> {
        let query_hash = Self::hash_query(query, kind);
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, f64, i64)> = conn
            .query_row(
                "SELECT payload, timestamp, ttl_days FROM tmdb_cache WHERE query_hash = ?1",
                params![query_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((payload, timestamp, ttl_days)) = row else {
            return Ok(None);
        };

        let age_days = (Self::now() - timestamp) / (24.0 * 3600.0);
        if age_days >= ttl_days as f64 {
            conn.execute(
                "DELETE FROM tmdb_cache WHERE query_hash = ?1",
                params![query_hash],
            )?;
            debug!("Cache expired for query: {query} ({kind})");
            return Ok(None);
        }

        debug!("Cache hit for query: {query} ({kind})");
        Ok(Some(payload))
    }

    pub fn put(&self, query: &str, kind: &str, payload: &str) -> Result<()> {
        let query_hash = Self::hash_query(query, kind);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tmdb_cache
             (query_hash, query, media_type, payload, timestamp, ttl_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                query_hash,
                query,
                kind,
                payload,
                Self::now(),
                self.ttl_days
            ],
        )?;
        debug!("Cached results for query: {query} ({kind})");
        Ok(())
    }

    /// Remove every entry past its TTL; returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let cutoff_expr = Self::now();
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM tmdb_cache WHERE (?1 - timestamp) / 86400.0 >= ttl_days",
            params![cutoff_expr],
        )?;
        if removed > 0 {
            info!("Removed {removed} expired TMDB cache entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<TmdbCacheStats> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN media_type = 'movie' THEN 1 END),
                    COUNT(CASE WHEN media_type = 'tv' THEN 1 END)
             FROM tmdb_cache",
            [],
            |row| {
                Ok(TmdbCacheStats {
                    total_entries: row.get(0)?,
                    movie_entries: row.get(1)?,
                    tv_entries: row.get(2)?,
                })
            },
        )
        .map_err(Into::into)
    }

    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM tmdb_cache", [])?;
        info!("Cleared all TMDB cache entries ({removed} deleted)");
        Ok(removed)
    }

    /// Backdate an entry, for expiry tests.
    #[cfg(test)]
    fn age_entry(&self, query: &str, kind: &str, days: f64) {
        let query_hash = Self::hash_query(query, kind);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tmdb_cache SET timestamp = timestamp - ?1 WHERE query_hash = ?2",
            params![days * 24.0 * 3600.0, query_hash],
        )
        .unwrap();
    }
}
