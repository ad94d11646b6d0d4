use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::truncate_chars;

/// Why the tracker closed a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    WindowChange,
    IdleTimeout,
    MaxDuration,
    ForcedClose,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::WindowChange => "window_change",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::MaxDuration => "max_duration",
            CloseReason::ForcedClose => "forced_close",
        }
    }
}

/// Minimal event record retained in memory for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub process_name: String,
    pub window_title: String,
    pub unix_time: i64,
    pub intensity: f64,
    #[serde(default)]
    pub screenshot_path: Option<String>,
}

/// A time-bounded sequence of events judged to belong to one activity.
///
/// Produced by the session tracker, consumed by the session manager which
/// fills `activity_summary` and `tags` during archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_uuid: Uuid,
    /// Unix seconds of the first event.
    pub start_time: i64,
    /// Unix seconds of the closing event. Always `>= start_time` is NOT
    /// guaranteed by the clock; `duration_seconds` clamps skew to zero.
    pub end_time: i64,
    pub primary_process: String,
    pub primary_window: String,
    /// Ordered unique window keys encountered, `"<process>:<title[:50]>"`.
    pub window_transitions: Vec<String>,
    pub events: Vec<SessionEvent>,
    pub avg_input_intensity: f64,
    pub close_reason: CloseReason,
    pub activity_summary: Option<String>,
    pub tags: Vec<String>,
}

impl Session {
    /// Clock skew yields zero, never a negative duration.
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).max(0)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

/// Window key used for transition tracking and fingerprinting.
pub fn window_key(process: &str, title: &str) -> String {
    format!("{}:{}", process, truncate_chars(title, 50))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_clock_skew_to_zero() {
        let session = Session {
            session_uuid: Uuid::nil(),
            start_time: 1000,
            end_time: 990,
            primary_process: "a".into(),
            primary_window: "w".into(),
            window_transitions: vec![],
            events: vec![],
            avg_input_intensity: 0.0,
            close_reason: CloseReason::WindowChange,
            activity_summary: None,
            tags: vec![],
        };
        assert_eq!(session.duration_seconds(), 0);
    }

    #[test]
    fn window_key_truncates_long_titles() {
        let title = "x".repeat(80);
        let key = window_key("code.exe", &title);
        assert_eq!(key, format!("code.exe:{}", "x".repeat(50)));
    }

    #[test]
    fn close_reason_wire_names() {
        assert_eq!(CloseReason::WindowChange.as_str(), "window_change");
        assert_eq!(CloseReason::ForcedClose.as_str(), "forced_close");
    }
}
