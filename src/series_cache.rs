use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tmdb::MediaInfo;

/// Persistent identification cache keyed by (series, season), so the
/// later discs of a multi-disc season reuse the identification made for
/// the first one.
pub struct SeriesCache {
    conn: Mutex<Connection>,
    ttl_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesCacheStats {
    pub total_entries: i64,
    pub recent_entries: i64,
    pub popular: Vec<(String, Option<u32>, i64)>,
}

impl SeriesCache {
    pub fn open(path: &Path, ttl_days: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS series_cache (
                cache_key TEXT PRIMARY KEY,
                series_title TEXT NOT NULL,
                season_number INTEGER,
                metadata_json TEXT NOT NULL,
                tmdb_id INTEGER,
                cached_at REAL NOT NULL,
                accessed_at REAL NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cached_at ON series_cache(cached_at)",
            [],
        )?;

        debug!("Opened series cache at {}", path.display());

        Ok(SeriesCache {
            conn: Mutex::new(conn),
            ttl_days,
        })
    }

    /// Cache key: upper-case, underscore-normalized title plus season
    /// (0 when unknown).
    fn cache_key(series_title: &str, season: Option<u32>) -> String {
        let normalized = series_title
            .to_uppercase()
            .replace([' ', '-'], "_");
        format!("{}_S{}", normalized, season.unwrap_or(0))
    }

    fn now() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Persist the identified metadata for a series season.
    pub fn cache(
        &self,
        series_title: &str,
        season: Option<u32>,
        media_info: &MediaInfo,
    ) -> Result<()> {
        let key = Self::cache_key(series_title, season);
        let metadata_json = serde_json::to_string(media_info)?;
        let now = Self::now();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO series_cache
             (cache_key, series_title, season_number, metadata_json, tmdb_id, cached_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)",
            params![key, series_title, season, metadata_json, media_info.tmdb_id, now],
        )?;
        info!("Cached series metadata: {series_title} S{}", season.unwrap_or(0));
        Ok(())
    }

    /// Fetch a live entry. Expired rows are deleted and reported as a
    /// miss; hits bump the access bookkeeping.
    pub fn lookup(&self, series_title: &str, season: Option<u32>) -> Result<Option<MediaInfo>> {
        let key = Self::cache_key(series_title, season);
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, f64)> = conn
            .query_row(
                "SELECT metadata_json, cached_at FROM series_cache WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((metadata_json, cached_at)) = row else {
            return Ok(None);
        };

        if Self::now() - cached_at > f64::from(self.ttl_days) * 24.0 * 3600.0 {
            conn.execute("DELETE FROM series_cache WHERE cache_key = ?1", params![key])?;
            debug!("Series cache entry expired: {key}");
            return Ok(None);
        }

        conn.execute(
            "UPDATE series_cache
             SET accessed_at = ?1, access_count = access_count + 1
             WHERE cache_key = ?2",
            params![Self::now(), key],
        )?;

        match serde_json::from_str::<MediaInfo>(&metadata_json) {
            Ok(info) => {
                info!("Series cache hit: {series_title} S{}", season.unwrap_or(0));
                Ok(Some(info))
            }
            Err(e) => {
                warn!("Corrupt series cache entry {key}: {e}");
                conn.execute("DELETE FROM series_cache WHERE cache_key = ?1", params![key])?;
                Ok(None)
            }
        }
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        let cutoff = Self::now() - f64::from(self.ttl_days) * 24.0 * 3600.0;
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM series_cache WHERE cached_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            info!("Cleaned up {removed} expired series cache entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<SeriesCacheStats> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM series_cache", [], |r| r.get(0))?;
        let recent_cutoff = Self::now() - 7.0 * 24.0 * 3600.0;
        let recent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM series_cache WHERE cached_at > ?1",
            params![recent_cutoff],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT series_title, season_number, access_count
             FROM series_cache
             ORDER BY access_count DESC, series_title
             LIMIT 5",
        )?;
        let popular = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SeriesCacheStats {
            total_entries: total,
            recent_entries: recent,
            popular,
        })
    }

    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM series_cache", [])?;
        info!("Cleared all series cache entries ({removed} deleted)");
        Ok(removed)
    }

    #[cfg(test)]
    fn age_entry(&self, series_title: &str, season: Option<u32>, days: f64) {
        let key = Self::cache_key(series_title, season);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE series_cache SET cached_at = cached_at - ?1 WHERE cache_key = ?2",
            params![days * 24.0 * 3600.0, key],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmdb::MediaKind;

    fn batman() -> MediaInfo {
        MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: String::new(),
            genres: vec![],
            season: Some(1),
            episodes: vec![],
            confidence: 0.8,
        }
    }

    fn temp_cache(ttl_days: u32) -> (tempfile::TempDir, SeriesCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SeriesCache::open(&dir.path().join("series_cache.db"), ttl_days).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(SeriesCache::cache_key("Batman", Some(1)), "BATMAN_S1");
        assert_eq!(
            SeriesCache::cache_key("gilmore girls", Some(3)),
            "GILMORE_GIRLS_S3"
        );
        assert_eq!(SeriesCache::cache_key("Foo-Bar", None), "FOO_BAR_S0");
    }

    #[test]
    fn test_cache_and_lookup() {
        let (_dir, cache) = temp_cache(90);
        cache.cache("Batman", Some(1), &batman()).unwrap();

        let hit = cache.lookup("BATMAN", Some(1)).unwrap().unwrap();
        assert_eq!(hit.tmdb_id, 2287);
        assert_eq!(hit.title, "Batman");

        assert!(cache.lookup("Batman", Some(2)).unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_deleted_on_lookup() {
        let (_dir, cache) = temp_cache(90);
        cache.cache("Batman", Some(1), &batman()).unwrap();
        cache.age_entry("Batman", Some(1), 91.0);

        assert!(cache.lookup("Batman", Some(1)).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_lookup_bumps_access_count() {
        let (_dir, cache) = temp_cache(90);
        cache.cache("Batman", Some(1), &batman()).unwrap();
        cache.lookup("Batman", Some(1)).unwrap();
        cache.lookup("Batman", Some(1)).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.popular[0].0, "Batman");
        assert_eq!(stats.popular[0].2, 2);
    }

    #[test]
    fn test_cleanup_and_clear() {
        let (_dir, cache) = temp_cache(90);
        cache.cache("Fresh", Some(1), &batman()).unwrap();
        cache.cache("Stale", Some(1), &batman()).unwrap();
        cache.age_entry("Stale", Some(1), 100.0);

        assert_eq!(cache.cleanup_expired().unwrap(), 1);
        assert_eq!(cache.clear().unwrap(), 1);
    }
}
