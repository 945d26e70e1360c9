use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer::RipPlan;
use crate::error::{Result, SpindleError};
use crate::tmdb::MediaInfo;

const SCHEMA_VERSION: i64 = 2;

/// Pipeline state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Identifying,
    Identified,
    Ripping,
    Ripped,
    Encoding,
    Encoded,
    Organizing,
    Completed,
    Failed,
    Review,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Identifying => "identifying",
            ItemState::Identified => "identified",
            ItemState::Ripping => "ripping",
            ItemState::Ripped => "ripped",
            ItemState::Encoding => "encoding",
            ItemState::Encoded => "encoded",
            ItemState::Organizing => "organizing",
            ItemState::Completed => "completed",
            ItemState::Failed => "failed",
            ItemState::Review => "review",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "identifying" => ItemState::Identifying,
            "identified" => ItemState::Identified,
            "ripping" => ItemState::Ripping,
            "ripped" => ItemState::Ripped,
            "encoding" => ItemState::Encoding,
            "encoded" => ItemState::Encoded,
            "organizing" => ItemState::Organizing,
            "completed" => ItemState::Completed,
            "failed" => ItemState::Failed,
            "review" => ItemState::Review,
            _ => ItemState::Pending,
        }
    }

    /// Terminal states are never mutated except by explicit retry/delete.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Completed | ItemState::Failed | ItemState::Review
        )
    }

    /// States that indicate a stage was in flight when the daemon stopped.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            ItemState::Identifying | ItemState::Ripping | ItemState::Encoding | ItemState::Organizing
        )
    }

    pub const ALL: [ItemState; 11] = [
        ItemState::Pending,
        ItemState::Identifying,
        ItemState::Identified,
        ItemState::Ripping,
        ItemState::Ripped,
        ItemState::Encoding,
        ItemState::Encoded,
        ItemState::Organizing,
        ItemState::Completed,
        ItemState::Failed,
        ItemState::Review,
    ];
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work driven through the pipeline.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub disc_title: Option<String>,
    pub source_path: Option<PathBuf>,
    pub state: ItemState,
    pub media_info: Option<MediaInfo>,
    pub rip_plan: Option<RipPlan>,
    pub ripped_file: Option<PathBuf>,
    pub ripped_files: Vec<PathBuf>,
    pub encoded_file: Option<PathBuf>,
    pub encoded_files: Vec<PathBuf>,
    pub final_file: Option<PathBuf>,
    pub error_message: Option<String>,
    pub progress_stage: Option<String>,
    pub progress_percent: f32,
    pub progress_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn set_progress(&mut self, stage: &str, percent: f32, message: Option<&str>) {
        self.progress_stage = Some(stage.to_string());
        self.progress_percent = percent.clamp(0.0, 100.0);
        self.progress_message = message.map(str::to_string);
    }
}

impl std::fmt::Display for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(info) = &self.media_info {
            return write!(f, "{} ({})", info.title, self.state);
        }
        if let Some(title) = &self.disc_title {
            return write!(f, "{} ({})", title, self.state);
        }
        if let Some(path) = &self.source_path {
            if let Some(name) = path.file_name() {
                return write!(f, "{} ({})", name.to_string_lossy(), self.state);
            }
        }
        write!(f, "Queue item {} ({})", self.id, self.state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueHealth {
    pub store_reachable: bool,
    pub schema_version: i64,
    pub row_count: i64,
    pub integrity_ok: bool,
}

/// Single source of truth for queue items, persisted in SQLite.
pub struct QueueStore {
    conn: Mutex<Connection>,
}

impl QueueStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        info!("Opened queue store at {}", path.display());

        let store = QueueStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                disc_title TEXT,
                source_path TEXT,
                status TEXT NOT NULL,
                media_info_json TEXT,
                rip_plan_json TEXT,
                ripped_file TEXT,
                ripped_files_json TEXT,
                encoded_file TEXT,
                encoded_files_json TEXT,
                final_file TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                progress_stage TEXT,
                progress_percent REAL DEFAULT 0.0,
                progress_message TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_items(status)",
            [],
        )?;
        Ok(())
    }

    /// Additive migrations. Old stores (before the progress tuple and the
    /// multi-file columns existed) are upgraded on open; a duplicate
    /// column error means the column already exists.
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let migrations = [
            "ALTER TABLE queue_items ADD COLUMN progress_stage TEXT",
            "ALTER TABLE queue_items ADD COLUMN progress_percent REAL DEFAULT 0.0",
            "ALTER TABLE queue_items ADD COLUMN progress_message TEXT",
            "ALTER TABLE queue_items ADD COLUMN rip_plan_json TEXT",
            "ALTER TABLE queue_items ADD COLUMN ripped_files_json TEXT",
            "ALTER TABLE queue_items ADD COLUMN encoded_files_json TEXT",
        ];
        for migration in migrations {
            if let Err(e) = conn.execute(migration, []) {
                let msg = e.to_string();
                if !msg.contains("duplicate column") {
                    return Err(e.into());
                }
            }
        }
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Create a new PENDING item for an inserted disc.
    pub fn add_disc(&self, disc_title: &str) -> Result<QueueItem> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_items (disc_title, status, created_at, updated_at, progress_percent)
             VALUES (?1, ?2, ?3, ?4, 0.0)",
            params![
                disc_title,
                ItemState::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        let item = self.get(id)?.ok_or_else(|| {
            SpindleError::Store(format!("inserted item {id} not found"))
        })?;
        info!("Added disc to queue: {item}");
        Ok(item)
    }

    /// Inject an externally produced file; it enters the pipeline as
    /// already ripped.
    pub fn add_file(&self, source_path: &Path) -> Result<QueueItem> {
        let now = Utc::now();
        let path_str = source_path.to_string_lossy().to_string();
        let files_json = serde_json::to_string(&vec![path_str.clone()])?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_items
             (source_path, status, ripped_file, ripped_files_json, created_at, updated_at, progress_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0.0)",
            params![
                path_str,
                ItemState::Ripped.as_str(),
                path_str,
                files_json,
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        let item = self.get(id)?.ok_or_else(|| {
            SpindleError::Store(format!("inserted item {id} not found"))
        })?;
        info!("Added file to queue: {item}");
        Ok(item)
    }

    /// Atomic full-record write. Bumps the updated-at timestamp.
    pub fn update(&self, item: &QueueItem) -> Result<()> {
        let now = Utc::now();
        let media_info_json = item
            .media_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let rip_plan_json = item
            .rip_plan
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ripped_files_json = serde_json::to_string(
            &item
                .ripped_files
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect::<Vec<_>>(),
        )?;
        let encoded_files_json = serde_json::to_string(
            &item
                .encoded_files
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect::<Vec<_>>(),
        )?;

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE queue_items
             SET disc_title = ?1, source_path = ?2, status = ?3, media_info_json = ?4,
                 rip_plan_json = ?5, ripped_file = ?6, ripped_files_json = ?7,
                 encoded_file = ?8, encoded_files_json = ?9, final_file = ?10,
                 error_message = ?11, updated_at = ?12, progress_stage = ?13,
                 progress_percent = ?14, progress_message = ?15
             WHERE id = ?16",
            params![
                item.disc_title,
                item.source_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                item.state.as_str(),
                media_info_json,
                rip_plan_json,
                item.ripped_file.as_ref().map(|p| p.to_string_lossy().to_string()),
                ripped_files_json,
                item.encoded_file.as_ref().map(|p| p.to_string_lossy().to_string()),
                encoded_files_json,
                item.final_file.as_ref().map(|p| p.to_string_lossy().to_string()),
                item.error_message,
                now.to_rfc3339(),
                item.progress_stage,
                item.progress_percent,
                item.progress_message,
                item.id
            ],
        )?;
        if changed == 0 {
            return Err(SpindleError::Store(format!(
                "queue item {} does not exist",
                item.id
            )));
        }
        debug!("Updated queue item: {item}");
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM queue_items WHERE id = ?1",
            params![id],
            row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Items in a given state, oldest first.
    pub fn list_by_state(&self, state: ItemState) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM queue_items WHERE status = ?1 ORDER BY created_at, id",
        )?;
        let items = stmt
            .query_map(params![state.as_str()], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// All items, newest first.
    pub fn list_all(&self) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM queue_items ORDER BY created_at DESC, id DESC")?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn stats(&self) -> Result<HashMap<ItemState, usize>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
        let mut stats = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.insert(ItemState::from_str(&status), count as usize);
        }
        Ok(stats)
    }

    pub fn remove(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
        if removed > 0 {
            info!("Removed item {id} from queue");
        }
        Ok(removed > 0)
    }

    pub fn clear_completed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM queue_items WHERE status = ?1",
            params![ItemState::Completed.as_str()],
        )?;
        info!("Cleared {count} completed items from queue");
        Ok(count)
    }

    pub fn clear_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM queue_items WHERE status = ?1",
            params![ItemState::Failed.as_str()],
        )?;
        info!("Cleared {count} failed items from queue");
        Ok(count)
    }

    /// Delete everything. Without `force`, refuses while any item is in a
    /// processing state.
    pub fn clear_all(&self, force: bool) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        if !force {
            let processing: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE status IN (?1, ?2, ?3, ?4)",
                params![
                    ItemState::Identifying.as_str(),
                    ItemState::Ripping.as_str(),
                    ItemState::Encoding.as_str(),
                    ItemState::Organizing.as_str()
                ],
                |row| row.get(0),
            )?;
            if processing > 0 {
                return Err(SpindleError::Store(format!(
                    "{processing} item(s) are processing; use force to clear anyway"
                )));
            }
        }
        let count = conn.execute("DELETE FROM queue_items", [])?;
        info!("Cleared all {count} items from queue");
        Ok(count)
    }

    /// Crash recovery: items stuck in a processing state are returned to
    /// the last fully persisted pre-stage state.
    pub fn reset_stuck_processing(&self) -> Result<usize> {
        let resets = [
            (ItemState::Identifying, ItemState::Pending),
            (ItemState::Ripping, ItemState::Identified),
            (ItemState::Encoding, ItemState::Ripped),
            (ItemState::Organizing, ItemState::Encoded),
        ];

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let mut total = 0;
        for (from, to) in resets {
            total += conn.execute(
                "UPDATE queue_items
                 SET status = ?1, progress_stage = NULL, progress_percent = 0.0,
                     progress_message = NULL, updated_at = ?2
                 WHERE status = ?3",
                params![to.as_str(), now, from.as_str()],
            )?;
        }
        if total > 0 {
            warn!("Reset {total} stuck processing item(s)");
        }
        Ok(total)
    }

    pub fn health_check(&self) -> QueueHealth {
        let conn = self.conn.lock().unwrap();

        let schema_version = conn
            .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0);
        let row_count = conn
            .query_row("SELECT COUNT(*) FROM queue_items", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(-1);
        let integrity_ok = conn
            .query_row("PRAGMA integrity_check", [], |row| {
                row.get::<_, String>(0)
            })
            .map(|v| v == "ok")
            .unwrap_or(false);

        QueueHealth {
            store_reachable: row_count >= 0,
            schema_version,
            row_count,
            integrity_ok,
        }
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let media_info = row
        .get::<_, Option<String>>("media_info_json")?
        .and_then(|json| match serde_json::from_str(&json) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Failed to deserialize media info: {e}");
                None
            }
        });
    let rip_plan = row
        .get::<_, Option<String>>("rip_plan_json")?
        .and_then(|json| match serde_json::from_str(&json) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!("Failed to deserialize rip plan: {e}");
                None
            }
        });

    let parse_files = |json: Option<String>| -> Vec<PathBuf> {
        json.and_then(|j| serde_json::from_str::<Vec<String>>(&j).ok())
            .map(|paths| paths.into_iter().map(PathBuf::from).collect())
            .unwrap_or_default()
    };

    let parse_time = |value: String| {
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };

    Ok(QueueItem {
        id: row.get("id")?,
        disc_title: row.get("disc_title")?,
        source_path: row
            .get::<_, Option<String>>("source_path")?
            .map(PathBuf::from),
        state: ItemState::from_str(&row.get::<_, String>("status")?),
        media_info,
        rip_plan,
        ripped_file: row
            .get::<_, Option<String>>("ripped_file")?
            .map(PathBuf::from),
        ripped_files: parse_files(row.get("ripped_files_json")?),
        encoded_file: row
            .get::<_, Option<String>>("encoded_file")?
            .map(PathBuf::from),
        encoded_files: parse_files(row.get("encoded_files_json")?),
        final_file: row
            .get::<_, Option<String>>("final_file")?
            .map(PathBuf::from),
        error_message: row.get("error_message")?,
        progress_stage: row.get("progress_stage")?,
        progress_percent: row
            .get::<_, Option<f64>>("progress_percent")?
            .unwrap_or(0.0) as f32,
        progress_message: row.get("progress_message")?,
        created_at: parse_time(row.get("created_at")?),
        updated_at: parse_time(row.get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmdb::{EpisodeInfo, MediaKind};

    fn temp_store() -> (tempfile::TempDir, QueueStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(&dir.path().join("queue.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_add_disc_starts_pending() {
        let (_dir, store) = temp_store();
        let item = store.add_disc("BLAZING_SADDLES").unwrap();
        assert_eq!(item.state, ItemState::Pending);
        assert_eq!(item.disc_title.as_deref(), Some("BLAZING_SADDLES"));
        assert!(item.ripped_file.is_none());
    }

    #[test]
    fn test_add_file_starts_ripped_with_path() {
        let (_dir, store) = temp_store();
        let path = PathBuf::from("/staging/movie.mkv");
        let item = store.add_file(&path).unwrap();

        assert_eq!(item.state, ItemState::Ripped);
        assert_eq!(item.ripped_file, Some(path.clone()));
        assert_eq!(item.ripped_files, vec![path.clone()]);

        // Re-read straight from the store
        let fetched = store.get(item.id).unwrap().unwrap();
        assert_eq!(fetched.state, ItemState::Ripped);
        assert_eq!(fetched.ripped_file, Some(path));
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let (_dir, store) = temp_store();
        let a = store.add_disc("DISC_A").unwrap();
        let b = store.add_disc("DISC_B").unwrap();
        let c = store.add_disc("DISC_C").unwrap();
        assert!(a.id < b.id && b.id < c.id);

        // Deleting does not free ids within a run
        store.remove(c.id).unwrap();
        let d = store.add_disc("DISC_D").unwrap();
        assert!(d.id > c.id);
    }

    #[test]
    fn test_media_info_round_trip() {
        let (_dir, store) = temp_store();
        let mut item = store.add_disc("BATMAN_TV_S1_DISC_1").unwrap();

        item.media_info = Some(MediaInfo {
            title: "Batman".to_string(),
            year: 1966,
            kind: MediaKind::Tv,
            tmdb_id: 2287,
            overview: "Adam West".to_string(),
            genres: vec!["Action".to_string()],
            season: Some(1),
            episodes: vec![EpisodeInfo {
                season: 1,
                episode: 1,
                name: Some("Hi Diddle Riddle".to_string()),
                runtime: Some(25),
            }],
            confidence: 0.8,
        });
        item.state = ItemState::Identified;
        store.update(&item).unwrap();

        let fetched = store.get(item.id).unwrap().unwrap();
        let info = fetched.media_info.unwrap();
        assert_eq!(info.title, "Batman");
        assert_eq!(info.year, 1966);
        assert_eq!(info.kind, MediaKind::Tv);
        assert_eq!(info.tmdb_id, 2287);
        assert_eq!(info.overview, "Adam West");
        assert_eq!(info.genres, vec!["Action".to_string()]);
        assert_eq!(info.season, Some(1));
        assert_eq!(info.episodes.len(), 1);
        assert_eq!(info.episodes[0].name.as_deref(), Some("Hi Diddle Riddle"));
    }

    #[test]
    fn test_list_by_state_is_fifo() {
        let (_dir, store) = temp_store();
        let a = store.add_disc("FIRST").unwrap();
        let b = store.add_disc("SECOND").unwrap();

        let pending = store.list_by_state(ItemState::Pending).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a.id);
        assert_eq!(pending[1].id, b.id);

        let all = store.list_all().unwrap();
        assert_eq!(all[0].id, b.id); // newest first
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = temp_store();
        store.add_disc("A").unwrap();
        store.add_disc("B").unwrap();
        let mut c = store.add_disc("C").unwrap();
        c.state = ItemState::Completed;
        store.update(&c).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.get(&ItemState::Pending), Some(&2));
        assert_eq!(stats.get(&ItemState::Completed), Some(&1));
    }

    #[test]
    fn test_reset_stuck_processing_exact_mapping() {
        let (_dir, store) = temp_store();
        let cases = [
            (ItemState::Identifying, ItemState::Pending),
            (ItemState::Ripping, ItemState::Identified),
            (ItemState::Encoding, ItemState::Ripped),
            (ItemState::Organizing, ItemState::Encoded),
        ];

        let mut ids = Vec::new();
        for (stuck, _) in &cases {
            let mut item = store.add_disc(&format!("DISC_{stuck}")).unwrap();
            item.state = *stuck;
            item.set_progress("stage", 50.0, Some("halfway"));
            store.update(&item).unwrap();
            ids.push(item.id);
        }

        assert_eq!(store.reset_stuck_processing().unwrap(), 4);
        for (id, (_, expected)) in ids.iter().zip(&cases) {
            let item = store.get(*id).unwrap().unwrap();
            assert_eq!(item.state, *expected);
            assert_eq!(item.progress_percent, 0.0);
            assert!(item.progress_stage.is_none());
        }

        // Idempotent: second run is a no-op
        assert_eq!(store.reset_stuck_processing().unwrap(), 0);
    }

    #[test]
    fn test_clear_operations() {
        let (_dir, store) = temp_store();
        let mut done = store.add_disc("DONE").unwrap();
        done.state = ItemState::Completed;
        store.update(&done).unwrap();
        let mut broken = store.add_disc("BROKEN").unwrap();
        broken.state = ItemState::Failed;
        store.update(&broken).unwrap();
        store.add_disc("WAITING").unwrap();

        assert_eq!(store.clear_completed().unwrap(), 1);
        assert_eq!(store.clear_failed().unwrap(), 1);
        assert_eq!(store.clear_all(false).unwrap(), 1);
    }

    #[test]
    fn test_clear_all_refuses_while_processing() {
        let (_dir, store) = temp_store();
        let mut item = store.add_disc("BUSY").unwrap();
        item.state = ItemState::Ripping;
        store.update(&item).unwrap();

        assert!(store.clear_all(false).is_err());
        assert_eq!(store.clear_all(true).unwrap(), 1);
    }

    #[test]
    fn test_update_missing_item_errors() {
        let (_dir, store) = temp_store();
        let mut item = store.add_disc("GHOST").unwrap();
        store.remove(item.id).unwrap();
        item.state = ItemState::Identified;
        assert!(store.update(&item).is_err());
    }

    #[test]
    fn test_health_check() {
        let (_dir, store) = temp_store();
        store.add_disc("X").unwrap();
        let health = store.health_check();
        assert!(health.store_reachable);
        assert!(health.integrity_ok);
        assert_eq!(health.row_count, 1);
        assert_eq!(health.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_from_legacy_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        // Simulate a store created before the progress and multi-file
        // columns existed.
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute(
                "CREATE TABLE queue_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    disc_title TEXT,
                    source_path TEXT,
                    status TEXT NOT NULL,
                    media_info_json TEXT,
                    ripped_file TEXT,
                    encoded_file TEXT,
                    final_file TEXT,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO queue_items (disc_title, status, created_at, updated_at)
                 VALUES ('OLD_DISC', 'pending', ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let store = QueueStore::open(&db_path).unwrap();
        let items = store.list_all().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].disc_title.as_deref(), Some("OLD_DISC"));
        assert_eq!(items[0].progress_percent, 0.0);
        assert!(items[0].rip_plan.is_none());
    }
}
