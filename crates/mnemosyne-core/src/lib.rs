mod paths;
mod sanitize;

pub use paths::{default_db_path, graph_path, resolve_db_path, screenshots_dir};
pub use sanitize::{REDACTION_MARKER, Sanitizer, clean_text, contains_pii};
