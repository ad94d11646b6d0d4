//! Session tracker: a single-threaded state machine with at most one active
//! session. Every incoming event either extends the active session or closes
//! it and immediately seeds the next one.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use mnemosyne_types::{CloseReason, Session, SessionEvent, window_key};

pub const DEFAULT_IDLE_THRESHOLD_SEC: i64 = 300;
pub const DEFAULT_MAX_DURATION_SEC: i64 = 1800;

struct ActiveSession {
    session_uuid: Uuid,
    start_time: i64,
    primary_process: String,
    primary_window: String,
    window_transitions: Vec<String>,
    events: Vec<SessionEvent>,
    last_event_time: i64,
}

impl ActiveSession {
    fn seed(event: SessionEvent) -> Self {
        let key = window_key(&event.process_name, &event.window_title);
        Self {
            session_uuid: Uuid::new_v4(),
            start_time: event.unix_time,
            primary_process: event.process_name.clone(),
            primary_window: event.window_title.clone(),
            window_transitions: vec![key],
            last_event_time: event.unix_time,
            events: vec![event],
        }
    }

    fn absorb(&mut self, event: SessionEvent) {
        let key = window_key(&event.process_name, &event.window_title);
        if !self.window_transitions.contains(&key) {
            self.window_transitions.push(key);
        }
        self.last_event_time = event.unix_time;
        self.events.push(event);
    }

    fn close(self, end_time: i64, reason: CloseReason) -> Session {
        let avg_input_intensity = if self.events.is_empty() {
            0.0
        } else {
            self.events.iter().map(|e| e.intensity).sum::<f64>() / self.events.len() as f64
        };

        Session {
            session_uuid: self.session_uuid,
            start_time: self.start_time,
            end_time,
            primary_process: self.primary_process,
            primary_window: self.primary_window,
            window_transitions: self.window_transitions,
            events: self.events,
            avg_input_intensity,
            close_reason: reason,
            activity_summary: None,
            tags: Vec::new(),
        }
    }
}

pub struct SessionTracker {
    idle_threshold_sec: i64,
    max_duration_sec: i64,
    active: Option<ActiveSession>,
}

impl SessionTracker {
    pub fn new(idle_threshold_sec: i64, max_duration_sec: i64) -> Self {
        Self {
            idle_threshold_sec,
            max_duration_sec,
            active: None,
        }
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Feed one event. Returns the closed session when this event triggered
    /// a transition; the tracker is already re-seeded with the event.
    ///
    /// Transition order: window change, idle timeout, max duration. An idle
    /// close ends at the last activity timestamp, the other reasons end at
    /// the triggering event.
    pub fn process_event(&mut self, event: SessionEvent) -> Option<Session> {
        let Some(active) = self.active.as_ref() else {
            self.active = Some(ActiveSession::seed(event));
            return None;
        };

        let close = if event.process_name != active.primary_process
            || event.window_title != active.primary_window
        {
            Some((CloseReason::WindowChange, event.unix_time))
        } else if event.unix_time - active.last_event_time > self.idle_threshold_sec {
            Some((CloseReason::IdleTimeout, active.last_event_time))
        } else if event.unix_time - active.start_time > self.max_duration_sec {
            Some((CloseReason::MaxDuration, event.unix_time))
        } else {
            None
        };

        match close {
            Some((reason, end_time)) => {
                let closed = self
                    .active
                    .take()
                    .expect("active session checked above")
                    .close(end_time, reason);
                tracing::debug!(
                    session = %closed.session_uuid,
                    reason = reason.as_str(),
                    duration = closed.duration_seconds(),
                    "session closed"
                );
                self.active = Some(ActiveSession::seed(event));
                Some(closed)
            }
            None => {
                self.active
                    .as_mut()
                    .expect("active session checked above")
                    .absorb(event);
                None
            }
        }
    }

    /// Close the active session with end time now. No new session starts.
    pub fn force_close(&mut self) -> Option<Session> {
        self.force_close_at(unix_now())
    }

    pub fn force_close_at(&mut self, now: i64) -> Option<Session> {
        let closed = self.active.take()?.close(now, CloseReason::ForcedClose);
        tracing::debug!(session = %closed.session_uuid, "session force-closed");
        Some(closed)
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD_SEC, DEFAULT_MAX_DURATION_SEC)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
