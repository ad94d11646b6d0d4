use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Region-of-interest rectangle within a screenshot, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiRect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// A single capture record emitted by the external agent.
///
/// Events are heterogeneous at the source; optional fields model what a
/// given producer actually sent. Consumers probe capabilities through the
/// `has_*` helpers instead of poking at raw fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub id: i64,
    #[serde(default)]
    pub session_uuid: Option<String>,
    /// ISO-8601 capture timestamp, as recorded by the agent.
    pub timestamp_utc: String,
    /// Seconds since epoch.
    pub unix_time: i64,
    pub process_name: String,
    pub window_title: String,
    #[serde(default)]
    pub window_hwnd: Option<i64>,
    #[serde(default)]
    pub roi: Option<RoiRect>,
    #[serde(default)]
    pub input_idle_ms: i64,
    /// Input intensity on a 0-100 scale.
    #[serde(default)]
    pub input_intensity: i64,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub has_screenshot: bool,
    #[serde(default)]
    pub screenshot_hash: Option<String>,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    /// In-memory screenshot bytes (RAM mode). Never persisted.
    #[serde(skip)]
    pub screenshot_data: Option<Vec<u8>>,
}

impl CaptureEvent {
    pub fn has_window_handle(&self) -> bool {
        self.window_hwnd.is_some()
    }

    pub fn has_screenshot(&self) -> bool {
        self.has_screenshot && self.screenshot_hash.is_some()
    }

    pub fn has_roi(&self) -> bool {
        self.roi.is_some()
    }

    /// Resolve the on-disk screenshot location for this event, if any.
    ///
    /// Explicit paths from the producer win; otherwise the content hash is
    /// resolved under the screenshots directory.
    pub fn screenshot_file(&self, screenshots_dir: &std::path::Path) -> Option<PathBuf> {
        if let Some(path) = &self.screenshot_path {
            return Some(PathBuf::from(path));
        }
        self.screenshot_hash
            .as_ref()
            .filter(|_| self.has_screenshot)
            .map(|hash| screenshots_dir.join(format!("{hash}.png")))
    }
}

/// Raw broker message payload: string-valued fields plus the broker id.
///
/// Producers emit string maps; numeric fields are parsed leniently and
/// default to zero when absent or malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Broker-assigned entry id, required for acknowledgment.
    pub stream_id: String,
    #[serde(default)]
    pub session_uuid: Option<String>,
    pub unix_time: i64,
    pub process_name: String,
    pub window_title: String,
    #[serde(default)]
    pub window_hwnd: Option<i64>,
    #[serde(default)]
    pub input_idle: i64,
    #[serde(default)]
    pub intensity: f64,
}

/// Compact historical event used to build recent-activity context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp_utc: String,
    pub process_name: String,
    pub window_title: String,
    pub input_intensity: i64,
    pub input_idle_ms: i64,
}
