mod dedup;
mod tracker;

pub use dedup::{DEDUP_WINDOW_SEC, FingerprintSuppressor};
pub use tracker::{DEFAULT_IDLE_THRESHOLD_SEC, DEFAULT_MAX_DURATION_SEC, SessionTracker};
