//! Short-horizon duplicate-fingerprint suppression.
//!
//! The broker's pending replay and crash-restart windows can hand the same
//! process back within seconds; suppressing those saves a model call while
//! the cycle still counts the group as handled.

use std::collections::HashMap;

pub const DEDUP_WINDOW_SEC: i64 = 15;
const PRUNE_AGE_SEC: i64 = 60;

pub struct FingerprintSuppressor {
    window_sec: i64,
    recent: HashMap<String, i64>,
}

impl FingerprintSuppressor {
    pub fn new(window_sec: i64) -> Self {
        Self {
            window_sec,
            recent: HashMap::new(),
        }
    }

    /// True when the process was recorded less than the window ago. A
    /// non-suppressed call records `now` and prunes stale entries.
    pub fn should_skip(&mut self, process_name: &str, now: i64) -> bool {
        if let Some(last_seen) = self.recent.get(process_name) {
            let elapsed = now - last_seen;
            if elapsed < self.window_sec {
                tracing::debug!(process = process_name, elapsed, "suppressing duplicate fingerprint");
                return true;
            }
        }

        self.recent.insert(process_name.to_string(), now);
        self.recent.retain(|_, seen| now - *seen < PRUNE_AGE_SEC);
        false
    }

    pub fn tracked(&self) -> usize {
        self.recent.len()
    }
}

impl Default for FingerprintSuppressor {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_within_window_is_suppressed() {
        let mut suppressor = FingerprintSuppressor::default();

        assert!(!suppressor.should_skip("vscode", 1000));
        assert!(suppressor.should_skip("vscode", 1005));
    }

    #[test]
    fn sighting_past_window_is_processed() {
        let mut suppressor = FingerprintSuppressor::default();

        assert!(!suppressor.should_skip("vscode", 1000));
        assert!(!suppressor.should_skip("vscode", 1020));
    }

    #[test]
    fn distinct_processes_do_not_interfere() {
        let mut suppressor = FingerprintSuppressor::default();

        assert!(!suppressor.should_skip("vscode", 1000));
        assert!(!suppressor.should_skip("firefox", 1001));
    }

    #[test]
    fn stale_entries_are_pruned() {
        let mut suppressor = FingerprintSuppressor::default();

        suppressor.should_skip("vscode", 1000);
        suppressor.should_skip("firefox", 1001);
        assert_eq!(suppressor.tracked(), 2);

        // 100 seconds later both entries are past the prune age; the new
        // sighting replaces them.
        assert!(!suppressor.should_skip("terminal", 1100));
        assert_eq!(suppressor.tracked(), 1);
    }
}
