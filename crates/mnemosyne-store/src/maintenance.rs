//! Out-of-band storage maintenance: retention pruning, screenshot sweep,
//! and compaction with a size report.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::db::Storage;
use crate::error::Result;

pub const DEFAULT_SESSION_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_RAW_EVENT_RETENTION_DAYS: i64 = 7;
const ORPHAN_SCREENSHOT_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub sessions_pruned: usize,
    pub raw_events_pruned: usize,
    pub screenshots_cleaned: usize,
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

/// Prune sessions and raw events past retention, sweep orphaned screenshot
/// files, then VACUUM. Each step is best-effort against the others only at
/// the filesystem layer; store failures propagate.
pub async fn run_full_maintenance(
    storage: &Storage,
    screenshots_dir: Option<&Path>,
    session_retention_days: i64,
    raw_event_retention_days: i64,
) -> Result<MaintenanceReport> {
    let now = unix_now();
    let mut report = MaintenanceReport {
        size_before_bytes: storage.file_size(),
        ..Default::default()
    };

    let session_cutoff = now - session_retention_days * 86_400;
    report.sessions_pruned = storage.sessions().prune_before(session_cutoff).await?;
    tracing::info!(
        pruned = report.sessions_pruned,
        retention_days = session_retention_days,
        "pruned old sessions"
    );

    let event_cutoff = now - raw_event_retention_days * 86_400;
    report.raw_events_pruned = storage.events().prune_before(event_cutoff).await?;
    tracing::info!(
        pruned = report.raw_events_pruned,
        retention_days = raw_event_retention_days,
        "pruned old raw events"
    );

    if let Some(dir) = screenshots_dir {
        report.screenshots_cleaned = cleanup_orphaned_screenshots(dir);
    }

    storage.vacuum().await?;
    report.size_after_bytes = storage.file_size();

    tracing::info!(
        size_before = report.size_before_bytes,
        size_after = report.size_after_bytes,
        "maintenance complete"
    );
    Ok(report)
}

/// Delete screenshot files older than one hour that archival never cleaned
/// up. Per-file failures are ignored.
pub fn cleanup_orphaned_screenshots(screenshots_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(screenshots_dir) else {
        return 0;
    };

    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_image = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("png") | Some("jpg")
        );
        if !is_image {
            continue;
        }

        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > ORPHAN_SCREENSHOT_MAX_AGE);

        if old_enough && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    if deleted > 0 {
        tracing::info!(deleted, "cleaned up orphaned screenshots");
    }
    deleted
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use mnemosyne_types::{CaptureEvent, CloseReason, Session};
    use uuid::Uuid;

    fn old_session(now: i64) -> Session {
        Session {
            session_uuid: Uuid::new_v4(),
            start_time: now - 40 * 86_400,
            end_time: now - 40 * 86_400 + 600,
            primary_process: "code.exe".into(),
            primary_window: "old".into(),
            window_transitions: vec![],
            events: vec![],
            avg_input_intensity: 10.0,
            close_reason: CloseReason::IdleTimeout,
            activity_summary: None,
            tags: vec![],
        }
    }

    fn old_event(now: i64) -> CaptureEvent {
        CaptureEvent {
            id: 0,
            session_uuid: None,
            timestamp_utc: "2026-01-01T00:00:00Z".into(),
            unix_time: now - 10 * 86_400,
            process_name: "a.exe".into(),
            window_title: "stale".into(),
            window_hwnd: None,
            roi: None,
            input_idle_ms: 0,
            input_intensity: 0,
            is_processed: true,
            has_screenshot: false,
            screenshot_hash: None,
            screenshot_path: None,
            screenshot_data: None,
        }
    }

    #[tokio::test]
    async fn full_maintenance_prunes_by_retention() {
        let storage = Storage::open_in_memory().unwrap();
        let now = unix_now();

        storage.sessions().insert(&old_session(now)).await.unwrap();
        storage.events().insert(&old_event(now)).await.unwrap();

        let report = run_full_maintenance(
            &storage,
            None,
            DEFAULT_SESSION_RETENTION_DAYS,
            DEFAULT_RAW_EVENT_RETENTION_DAYS,
        )
        .await
        .unwrap();

        assert_eq!(report.sessions_pruned, 1);
        assert_eq!(report.raw_events_pruned, 1);
    }

    #[test]
    fn screenshot_sweep_honors_age_and_extension() {
        let dir = tempfile::tempdir().unwrap();

        let stale = dir.path().join("aaa.png");
        let fresh = dir.path().join("bbb.png");
        let other = dir.path().join("notes.txt");
        std::fs::write(&stale, b"img").unwrap();
        std::fs::write(&fresh, b"img").unwrap();
        std::fs::write(&other, b"txt").unwrap();

        let two_hours_ago = FileTime::from_unix_time(unix_now() - 7200, 0);
        filetime::set_file_mtime(&stale, two_hours_ago).unwrap();
        filetime::set_file_mtime(&other, two_hours_ago).unwrap();

        let deleted = cleanup_orphaned_screenshots(dir.path());
        assert_eq!(deleted, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn screenshot_sweep_missing_dir_is_zero() {
        assert_eq!(
            cleanup_orphaned_screenshots(Path::new("/nonexistent/mnemosyne-shots")),
            0
        );
    }
}
