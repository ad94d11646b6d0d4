use rusqlite::params;
use serde::{Deserialize, Serialize};

use mnemosyne_types::Session;

use crate::db::Storage;
use crate::error::Result;

/// Archived session as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_uuid: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_seconds: i64,
    pub primary_process: String,
    pub primary_window: String,
    pub activity_summary: Option<String>,
    pub generated_tags: Vec<String>,
}

/// Repository for `sessions` operations.
pub struct Sessions<'a> {
    storage: &'a Storage,
}

impl<'a> Sessions<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Create the sessions table and its time index if missing.
    ///
    /// The schema is also created at connect time; this exists so the
    /// orchestrator can assert the table before entering the loop even when
    /// pointed at a database produced by an older capture agent.
    pub async fn ensure_table(&self) -> Result<()> {
        let conn = self.storage.lock().await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
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
                ON sessions(start_time, end_time);",
        )?;
        Ok(())
    }

    /// Insert an archived session.
    pub async fn insert(&self, session: &Session) -> Result<()> {
        let transitions_json = serde_json::to_string(&session.window_transitions)?;
        let tags_json = serde_json::to_string(&session.tags)?;

        let conn = self.storage.lock().await;
        conn.execute(
            "INSERT INTO sessions ( \
                 session_uuid, start_time, end_time, duration_seconds, \
                 primary_process, primary_window, window_transitions, \
                 event_count, avg_input_intensity, activity_summary, generated_tags \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.session_uuid.to_string(),
                session.start_time,
                session.end_time,
                session.duration_seconds(),
                session.primary_process,
                session.primary_window,
                transitions_json,
                session.event_count() as i64,
                session.avg_input_intensity,
                session.activity_summary,
                tags_json,
            ],
        )?;

        tracing::debug!(session = %session.session_uuid, "inserted session");
        Ok(())
    }

    /// Most recent sessions, newest first.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<SessionRow>> {
        let conn = self.storage.lock().await;
        let mut stmt = conn.prepare(
            "SELECT session_uuid, start_time, end_time, duration_seconds, \
                    primary_process, primary_window, activity_summary, generated_tags \
             FROM sessions \
             ORDER BY start_time DESC \
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SessionRow {
                    session_uuid: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    duration_seconds: row.get(3)?,
                    primary_process: row.get(4)?,
                    primary_window: row.get(5)?,
                    activity_summary: row.get(6)?,
                    generated_tags: row
                        .get::<_, Option<String>>(7)?
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Delete sessions that ended before the cutoff. Returns rows deleted.
    pub async fn prune_before(&self, cutoff_unix: i64) -> Result<usize> {
        let conn = self.storage.lock().await;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE end_time < ?1",
            params![cutoff_unix],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_types::CloseReason;
    use uuid::Uuid;

    fn session(start: i64, end: i64, summary: &str) -> Session {
        Session {
            session_uuid: Uuid::new_v4(),
            start_time: start,
            end_time: end,
            primary_process: "code.exe".into(),
            primary_window: "main.rs".into(),
            window_transitions: vec!["code.exe:main.rs".into()],
            events: vec![],
            avg_input_intensity: 42.0,
            close_reason: CloseReason::WindowChange,
            activity_summary: Some(summary.into()),
            tags: vec!["coding".into()],
        }
    }

    #[tokio::test]
    async fn insert_and_read_back_recent() {
        let storage = Storage::open_in_memory().unwrap();
        let sessions = storage.sessions();
        sessions.ensure_table().await.unwrap();

        sessions.insert(&session(100, 200, "early")).await.unwrap();
        sessions.insert(&session(500, 700, "late")).await.unwrap();

        let recent = sessions.get_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].activity_summary.as_deref(), Some("late"));
        assert_eq!(recent[0].duration_seconds, 200);
        assert_eq!(recent[0].generated_tags, vec!["coding".to_string()]);
    }

    #[tokio::test]
    async fn prune_removes_only_old_sessions() {
        let storage = Storage::open_in_memory().unwrap();
        let sessions = storage.sessions();

        sessions.insert(&session(100, 150, "old")).await.unwrap();
        sessions.insert(&session(800, 900, "new")).await.unwrap();

        let deleted = sessions.prune_before(500).await.unwrap();
        assert_eq!(deleted, 1);

        let recent = sessions.get_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].activity_summary.as_deref(), Some("new"));
    }
}
