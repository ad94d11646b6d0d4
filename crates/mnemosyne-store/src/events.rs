use rusqlite::{Row, params, params_from_iter};

use mnemosyne_types::{CaptureEvent, EventGroup, HistoryEntry, RoiRect};

use crate::db::Storage;
use crate::error::Result;

const EVENT_COLUMNS: &str = "id, session_uuid, timestamp_utc, unix_time, \
     process_name, window_title, window_hwnd, \
     roi_left, roi_top, roi_right, roi_bottom, \
     input_idle_ms, input_intensity, \
     is_processed, has_screenshot, screenshot_hash, screenshot_path";

/// Repository for `raw_events` operations.
pub struct Events<'a> {
    storage: &'a Storage,
}

impl<'a> Events<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Unprocessed events, oldest first.
    pub async fn fetch_pending(&self, limit: usize) -> Result<Vec<CaptureEvent>> {
        let conn = self.storage.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM raw_events \
             WHERE is_processed = 0 ORDER BY unix_time ASC LIMIT ?1"
        ))?;
        let events = stmt
            .query_map(params![limit as i64], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(count = events.len(), "fetched pending events");
        Ok(events)
    }

    /// Full rows for a set of ids, oldest first. Used to enrich the members
    /// of a SQL-aggregated group.
    pub async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<CaptureEvent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.storage.lock().await;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM raw_events \
             WHERE id IN ({placeholders}) ORDER BY unix_time ASC"
        ))?;
        let events = stmt
            .query_map(params_from_iter(ids.iter()), event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Mark events processed one by one inside a single transaction.
    pub async fn mark_processed(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.storage.lock().await;
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE raw_events SET is_processed = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        tx.commit()?;

        tracing::debug!(count = ids.len(), "marked events processed");
        Ok(())
    }

    /// Mark events processed with a single `IN (...)` update.
    pub async fn batch_mark_processed(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.storage.lock().await;
        let placeholders = vec!["?"; ids.len()].join(",");
        let updated = conn.execute(
            &format!("UPDATE raw_events SET is_processed = 1 WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;

        Ok(updated)
    }

    /// Events inside `[ts - window, ts + window]`, oldest first.
    pub async fn get_history_tail(
        &self,
        timestamp: i64,
        window_seconds: i64,
    ) -> Result<Vec<HistoryEntry>> {
        let conn = self.storage.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp_utc, process_name, window_title, \
                    input_intensity, input_idle_ms \
             FROM raw_events \
             WHERE unix_time >= ?1 AND unix_time <= ?2 \
             ORDER BY unix_time ASC",
        )?;
        let entries = stmt
            .query_map(
                params![timestamp - window_seconds, timestamp + window_seconds],
                |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        timestamp_utc: row.get(1)?,
                        process_name: row.get(2)?,
                        window_title: row.get(3)?,
                        input_intensity: row.get(4)?,
                        input_idle_ms: row.get(5)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Server-side grouping of pending events by `(process, title)` with
    /// aggregates, most active groups first.
    pub async fn fetch_unique_groups(&self, limit: usize) -> Result<Vec<EventGroup>> {
        let conn = self.storage.lock().await;
        let mut stmt = conn.prepare(
            "SELECT process_name, window_title, \
                    GROUP_CONCAT(id) as event_ids, \
                    COUNT(*) as event_count, \
                    MIN(unix_time) as first_seen, \
                    MAX(unix_time) as last_seen, \
                    AVG(input_intensity) as avg_intensity \
             FROM raw_events \
             WHERE is_processed = 0 \
             GROUP BY process_name, window_title \
             ORDER BY event_count DESC \
             LIMIT ?1",
        )?;

        let mut groups = Vec::new();
        let mut rows = stmt.query(params![limit as i64])?;
        while let Some(row) = rows.next()? {
            let ids: Option<String> = row.get(2)?;
            let Some(ids) = ids else { continue };
            let event_ids: Vec<i64> = ids.split(',').filter_map(|s| s.parse().ok()).collect();

            groups.push(EventGroup {
                process_name: row.get(0)?,
                window_title: row.get(1)?,
                event_ids,
                event_count: row.get::<_, i64>(3)? as usize,
                first_seen: row.get(4)?,
                last_seen: row.get(5)?,
                avg_intensity: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                ack_ids: Vec::new(),
                screenshot_path: None,
                events: Vec::new(),
            });
        }

        if !groups.is_empty() {
            let total: usize = groups.iter().map(|g| g.event_count).sum();
            tracing::debug!(groups = groups.len(), events = total, "fetched unique groups");
        }
        Ok(groups)
    }

    /// Archive a broker group: insert its raw payloads already marked
    /// processed, plus an intent-only context row per inserted event.
    ///
    /// Context rows upsert by event id, so re-archiving the same group after
    /// a crash between archive and acknowledge is idempotent at this layer.
    pub async fn archive_enriched_group(
        &self,
        group: &EventGroup,
        user_intent: &str,
        tags: &[String],
    ) -> Result<()> {
        let mut conn = self.storage.lock().await;
        let timestamp_utc = chrono::Utc::now().to_rfc3339();
        let tags_json = serde_json::to_string(tags)?;

        let tx = conn.transaction()?;
        for event in &group.events {
            let event_id: i64 = tx.query_row(
                "INSERT INTO raw_events ( \
                     session_uuid, timestamp_utc, unix_time, \
                     process_name, window_title, window_hwnd, \
                     input_idle_ms, input_intensity, is_processed \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1) \
                 RETURNING id",
                params![
                    event.session_uuid.as_deref().unwrap_or("unknown"),
                    timestamp_utc,
                    event.unix_time,
                    event.process_name,
                    event.window_title,
                    event.window_hwnd.unwrap_or(0),
                    event.input_idle,
                    event.intensity,
                ],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT OR REPLACE INTO context_enrichment \
                 (event_id, accessibility_tree_json, ocr_content, \
                  vlm_description, user_intent, generated_wikilinks, generated_tags) \
                 VALUES (?1, NULL, NULL, NULL, ?2, ?3, ?3)",
                params![event_id, user_intent, tags_json],
            )?;
        }
        tx.commit()?;

        tracing::debug!(events = group.events.len(), "archived stream group");
        Ok(())
    }

    /// Insert a raw event row. The capture agent is the normal producer;
    /// this is the seam fixtures and tests go through.
    pub async fn insert(&self, event: &CaptureEvent) -> Result<i64> {
        let conn = self.storage.lock().await;
        let id = conn.query_row(
            "INSERT INTO raw_events ( \
                 session_uuid, timestamp_utc, unix_time, \
                 process_name, window_title, window_hwnd, \
                 roi_left, roi_top, roi_right, roi_bottom, \
                 input_idle_ms, input_intensity, is_processed, \
                 has_screenshot, screenshot_hash, screenshot_path \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
             RETURNING id",
            params![
                event.session_uuid,
                event.timestamp_utc,
                event.unix_time,
                event.process_name,
                event.window_title,
                event.window_hwnd,
                event.roi.map(|r| r.left),
                event.roi.map(|r| r.top),
                event.roi.map(|r| r.right),
                event.roi.map(|r| r.bottom),
                event.input_idle_ms,
                event.input_intensity,
                event.is_processed as i64,
                event.has_screenshot as i64,
                event.screenshot_hash,
                event.screenshot_path,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Delete raw events older than the cutoff. Returns rows deleted.
    pub async fn prune_before(&self, cutoff_unix: i64) -> Result<usize> {
        let conn = self.storage.lock().await;
        let deleted = conn.execute(
            "DELETE FROM raw_events WHERE unix_time < ?1",
            params![cutoff_unix],
        )?;
        Ok(deleted)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CaptureEvent> {
    let roi = match (
        row.get::<_, Option<i64>>(7)?,
        row.get::<_, Option<i64>>(8)?,
        row.get::<_, Option<i64>>(9)?,
        row.get::<_, Option<i64>>(10)?,
    ) {
        (Some(left), Some(top), Some(right), Some(bottom)) => Some(RoiRect {
            left,
            top,
            right,
            bottom,
        }),
        _ => None,
    };

    Ok(CaptureEvent {
        id: row.get(0)?,
        session_uuid: row.get(1)?,
        timestamp_utc: row.get(2)?,
        unix_time: row.get(3)?,
        process_name: row.get(4)?,
        window_title: row.get(5)?,
        window_hwnd: row.get(6)?,
        roi,
        input_idle_ms: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
        input_intensity: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        is_processed: row.get::<_, i64>(13)? != 0,
        has_screenshot: row.get::<_, i64>(14)? != 0,
        screenshot_hash: row.get(15)?,
        screenshot_path: row.get(16)?,
        screenshot_data: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_types::StreamEvent;

    fn sample_event(unix_time: i64, process: &str, title: &str) -> CaptureEvent {
        CaptureEvent {
            id: 0,
            session_uuid: Some("cap-1".into()),
            timestamp_utc: "2026-01-01T00:00:00Z".into(),
            unix_time,
            process_name: process.into(),
            window_title: title.into(),
            window_hwnd: None,
            roi: None,
            input_idle_ms: 10,
            input_intensity: 50,
            is_processed: false,
            has_screenshot: false,
            screenshot_hash: None,
            screenshot_path: None,
            screenshot_data: None,
        }
    }

    #[tokio::test]
    async fn fetch_pending_orders_by_time_and_respects_limit() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        events.insert(&sample_event(300, "a.exe", "w")).await.unwrap();
        events.insert(&sample_event(100, "b.exe", "w")).await.unwrap();
        events.insert(&sample_event(200, "c.exe", "w")).await.unwrap();

        let pending = events.fetch_pending(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].unix_time, 100);
        assert_eq!(pending[1].unix_time, 200);
    }

    #[tokio::test]
    async fn batch_mark_processed_clears_pending() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        let a = events.insert(&sample_event(100, "a.exe", "w")).await.unwrap();
        let b = events.insert(&sample_event(101, "a.exe", "w")).await.unwrap();

        let updated = events.batch_mark_processed(&[a, b]).await.unwrap();
        assert_eq!(updated, 2);
        assert!(events.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_processed_transactional_path() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        let a = events.insert(&sample_event(100, "a.exe", "w")).await.unwrap();
        events.mark_processed(&[a]).await.unwrap();
        assert!(events.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_tail_is_inclusive_both_sides() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        events.insert(&sample_event(40, "a.exe", "early")).await.unwrap();
        events.insert(&sample_event(100, "a.exe", "center")).await.unwrap();
        events.insert(&sample_event(160, "a.exe", "late")).await.unwrap();
        events.insert(&sample_event(161, "a.exe", "outside")).await.unwrap();

        let tail = events.get_history_tail(100, 60).await.unwrap();
        let titles: Vec<_> = tail.iter().map(|h| h.window_title.as_str()).collect();
        assert_eq!(titles, vec!["early", "center", "late"]);
    }

    #[tokio::test]
    async fn unique_groups_aggregate_and_sort_by_count() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        for t in [100, 110, 120] {
            events.insert(&sample_event(t, "code.exe", "main.rs")).await.unwrap();
        }
        events.insert(&sample_event(105, "firefox.exe", "docs")).await.unwrap();

        let groups = events.fetch_unique_groups(10).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].process_name, "code.exe");
        assert_eq!(groups[0].event_count, 3);
        assert_eq!(groups[0].event_ids.len(), 3);
        assert_eq!(groups[0].first_seen, 100);
        assert_eq!(groups[0].last_seen, 120);
        assert!((groups[0].avg_intensity - 50.0).abs() < f64::EPSILON);
        assert_eq!(groups[1].event_count, 1);
    }

    #[tokio::test]
    async fn archive_enriched_group_is_idempotent_on_context() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        let group = EventGroup {
            process_name: "code.exe".into(),
            window_title: "main.rs".into(),
            event_ids: vec![],
            event_count: 2,
            first_seen: 100,
            last_seen: 110,
            avg_intensity: 60.0,
            ack_ids: vec!["1-0".into(), "2-0".into()],
            screenshot_path: None,
            events: vec![
                StreamEvent {
                    stream_id: "1-0".into(),
                    session_uuid: Some("cap-1".into()),
                    unix_time: 100,
                    process_name: "code.exe".into(),
                    window_title: "main.rs".into(),
                    window_hwnd: None,
                    input_idle: 0,
                    intensity: 55.0,
                },
                StreamEvent {
                    stream_id: "2-0".into(),
                    session_uuid: Some("cap-1".into()),
                    unix_time: 110,
                    process_name: "code.exe".into(),
                    window_title: "main.rs".into(),
                    window_hwnd: None,
                    input_idle: 0,
                    intensity: 65.0,
                },
            ],
        };

        let tags = vec!["coding".to_string()];
        events
            .archive_enriched_group(&group, "Editing main.rs", &tags)
            .await
            .unwrap();

        let stats = storage.stats().get_stats().await.unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.pending_events, 0);
        assert_eq!(stats.enriched_events, 2);

        // A crash between archive and acknowledge replays the group.
        events
            .archive_enriched_group(&group, "Editing main.rs", &tags)
            .await
            .unwrap();
        let stats = storage.stats().get_stats().await.unwrap();
        assert_eq!(stats.enriched_events, 4);
        let ctx = storage.context().get(1).await.unwrap().unwrap();
        assert_eq!(ctx.user_intent.as_deref(), Some("Editing main.rs"));
    }

    #[tokio::test]
    async fn prune_before_removes_old_rows() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        events.insert(&sample_event(100, "a.exe", "old")).await.unwrap();
        events.insert(&sample_event(900, "a.exe", "new")).await.unwrap();

        let deleted = events.prune_before(500).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = events.fetch_pending(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].window_title, "new");
    }

    #[tokio::test]
    async fn roi_round_trips_through_rows() {
        let storage = Storage::open_in_memory().unwrap();
        let events = storage.events();

        let mut event = sample_event(100, "a.exe", "w");
        event.roi = Some(RoiRect {
            left: 10,
            top: 20,
            right: 300,
            bottom: 200,
        });
        events.insert(&event).await.unwrap();

        let fetched = events.fetch_pending(1).await.unwrap();
        assert_eq!(fetched[0].roi, event.roi);
    }
}
