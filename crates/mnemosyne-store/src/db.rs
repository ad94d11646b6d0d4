use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::{context::ContextRepo, events::Events, sessions::Sessions, stats::Stats};

// NOTE: Connection Design
//
// One Connection, one async mutex. The capture agent writes to the same file
// from another process, so within this process every read and write is
// serialized by the mutex, and cross-process contention is absorbed by
// busy_timeout plus rollback-journal mode (DELETE is the one journal mode
// that behaves identically across platforms and bind-mounted volumes when a
// second writer exists).
//
// Repositories are method namespaces borrowing the owner - there is exactly
// one place the connection lives.

const PRAGMAS: [(&str, &str); 6] = [
    ("busy_timeout", "5000"),
    ("journal_mode", "DELETE"),
    ("synchronous", "NORMAL"),
    ("temp_store", "MEMORY"),
    ("mmap_size", "268435456"),
    ("foreign_keys", "ON"),
];

pub struct Storage {
    db_path: PathBuf,
    read_only: bool,
    pub(crate) conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) the row store and apply the connection contract.
    ///
    /// When `MNEMOSYNE_DB_READONLY=true` the file is opened through an
    /// `immutable=1` URI for dashboard-style consumers.
    pub fn open(db_path: &Path) -> Result<Self> {
        let read_only = std::env::var("MNEMOSYNE_DB_READONLY")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let conn = if read_only {
            let uri = format!("file:{}?immutable=1", db_path.display());
            let conn = Connection::open_with_flags(
                &uri,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
            )?;
            tracing::info!(path = %db_path.display(), "connected in read-only (immutable) mode");
            conn
        } else {
            if let Some(parent) = db_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(db_path)?;
            apply_pragmas(&conn);
            init_schema(&conn)?;
            tracing::info!(path = %db_path.display(), "connected to database");
            conn
        };

        Ok(Self {
            db_path: db_path.to_path_buf(),
            read_only,
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn);
        init_schema(&conn)?;
        Ok(Self {
            db_path: PathBuf::new(),
            read_only: false,
            conn: Mutex::new(conn),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    pub fn events(&self) -> Events<'_> {
        Events::new(self)
    }

    pub fn context(&self) -> ContextRepo<'_> {
        ContextRepo::new(self)
    }

    pub fn sessions(&self) -> Sessions<'_> {
        Sessions::new(self)
    }

    pub fn stats(&self) -> Stats<'_> {
        Stats::new(self)
    }

    /// Rebuild the database file, returning unused pages to the OS.
    pub async fn vacuum(&self) -> Result<()> {
        let conn = self.lock().await;
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    /// Current size of the database file in bytes (0 for in-memory).
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
    }
}

fn apply_pragmas(conn: &Connection) {
    for (key, value) in PRAGMAS {
        if let Err(err) = conn.pragma_update(None, key, value) {
            tracing::warn!(pragma = key, %err, "failed to apply pragma");
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS raw_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_uuid TEXT,
            timestamp_utc TEXT NOT NULL,
            unix_time INTEGER NOT NULL,
            process_name TEXT NOT NULL,
            window_title TEXT NOT NULL,
            window_hwnd INTEGER,
            roi_left INTEGER,
            roi_top INTEGER,
            roi_right INTEGER,
            roi_bottom INTEGER,
            input_idle_ms INTEGER DEFAULT 0,
            input_intensity INTEGER DEFAULT 0,
            is_processed INTEGER DEFAULT 0,
            has_screenshot INTEGER DEFAULT 0,
            screenshot_hash TEXT,
            screenshot_path TEXT,
            vlm_description TEXT,
            user_intent TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_raw_events_pending
            ON raw_events(is_processed, unix_time);

        CREATE TABLE IF NOT EXISTS context_enrichment (
            event_id INTEGER PRIMARY KEY,
            accessibility_tree_json TEXT,
            ocr_content TEXT,
            vlm_description TEXT,
            user_intent TEXT,
            generated_wikilinks TEXT,
            generated_tags TEXT
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_uuid TEXT UNIQUE NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            duration_seconds INTEGER NOT NULL,

            primary_process TEXT NOT NULL,
            primary_window TEXT NOT NULL,

            window_transitions TEXT,
            event_count INTEGER DEFAULT 0,
            avg_input_intensity REAL,

            activity_summary TEXT,
            generated_tags TEXT,

            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_time
            ON sessions(start_time, end_time);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initialization_creates_empty_tables() {
        let storage = Storage::open_in_memory().unwrap();

        let stats = storage.stats().get_stats().await.unwrap();
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.pending_events, 0);
        assert_eq!(stats.enriched_events, 0);
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/activity.db");

        let storage = Storage::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(!storage.is_read_only());
    }

    #[tokio::test]
    async fn vacuum_succeeds_on_fresh_store() {
        let storage = Storage::open_in_memory().unwrap();
        storage.vacuum().await.unwrap();
    }
}
