use serde::{Deserialize, Serialize};

use crate::event::StreamEvent;

/// Events sharing `(process_name, window_title)` within one fetch batch,
/// collapsed for a single LLM inference applied to all members.
///
/// Both ingest backends produce this shape: the SQL path aggregates
/// server-side and fills `event_ids`; the broker path groups in memory and
/// fills `ack_ids` and `events` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGroup {
    pub process_name: String,
    pub window_title: String,
    /// Local-store row ids (empty in stream mode).
    #[serde(default)]
    pub event_ids: Vec<i64>,
    pub event_count: usize,
    pub first_seen: i64,
    pub last_seen: i64,
    pub avg_intensity: f64,
    /// Broker entry ids to acknowledge after archival (empty in store mode).
    #[serde(default)]
    pub ack_ids: Vec<String>,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    /// Raw broker payloads carried through for archival (empty in store mode).
    #[serde(default)]
    pub events: Vec<StreamEvent>,
}

impl EventGroup {
    /// The timestamp this group contributes to session tracking:
    /// last activity wins, falling back to first-seen.
    pub fn tracking_time(&self) -> i64 {
        if self.last_seen > 0 {
            self.last_seen
        } else {
            self.first_seen
        }
    }
}
