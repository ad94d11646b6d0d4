mod context;
mod event;
mod group;
mod session;

pub use context::EnrichedContext;
pub use event::{CaptureEvent, HistoryEntry, RoiRect, StreamEvent};
pub use group::EventGroup;
pub use session::{CloseReason, Session, SessionEvent, window_key};

/// Truncate a string to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
