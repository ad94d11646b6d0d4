use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::Storage;
use crate::error::Result;

/// Basic event counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_events: i64,
    pub pending_events: i64,
    pub enriched_events: i64,
}

/// Dashboard breakdown. Each field degrades to zero independently so a
/// missing column or table never takes down the whole readout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedStats {
    pub telemetry_events: i64,
    pub llm_events: i64,
    pub vlm_events: i64,
    pub screenshot_events: i64,
}

/// Repository for analytics queries.
pub struct Stats<'a> {
    storage: &'a Storage,
}

impl<'a> Stats<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.storage.lock().await;
        Ok(StoreStats {
            total_events: count(&conn, "SELECT COUNT(*) FROM raw_events")?,
            pending_events: count(&conn, "SELECT COUNT(*) FROM raw_events WHERE is_processed = 0")?,
            enriched_events: count(&conn, "SELECT COUNT(*) FROM context_enrichment")?,
        })
    }

    pub async fn get_detailed_analytics(&self) -> Result<DetailedStats> {
        let conn = self.storage.lock().await;

        Ok(DetailedStats {
            telemetry_events: count_or_zero(&conn, "SELECT COUNT(*) FROM raw_events"),
            llm_events: count_or_zero(
                &conn,
                "SELECT COUNT(*) FROM context_enrichment \
                 WHERE user_intent IS NOT NULL AND user_intent != ''",
            ),
            vlm_events: count_or_zero(
                &conn,
                "SELECT COUNT(*) FROM context_enrichment \
                 WHERE vlm_description IS NOT NULL AND vlm_description != ''",
            ),
            screenshot_events: count_or_zero(
                &conn,
                "SELECT COUNT(*) FROM raw_events \
                 WHERE screenshot_path IS NOT NULL AND screenshot_path != ''",
            ),
        })
    }
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

fn count_or_zero(conn: &Connection, sql: &str) -> i64 {
    match count(conn, sql) {
        Ok(n) => n,
        Err(err) => {
            tracing::warn!(%err, sql, "stats query failed, degrading to zero");
            0
        }
    }
}
