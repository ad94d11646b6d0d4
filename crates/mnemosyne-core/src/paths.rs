use std::path::{Path, PathBuf};

/// Default row-store location, relative to the working directory.
pub fn default_db_path() -> PathBuf {
    PathBuf::from(".mnemosyne/activity.db")
}

/// Resolve the row-store path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. MNEMOSYNE_DB_PATH environment variable (with tilde expansion)
/// 3. `.mnemosyne/activity.db` in the working directory
pub fn resolve_db_path(explicit_path: Option<&str>) -> PathBuf {
    if let Some(path) = explicit_path {
        return expand_tilde(path);
    }

    if let Ok(env_path) = std::env::var("MNEMOSYNE_DB_PATH") {
        return expand_tilde(&env_path);
    }

    default_db_path()
}

/// Screenshot drop directory shared with the capture agent.
pub fn screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

/// Knowledge-graph JSON file, stored next to the database.
pub fn graph_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("knowledge_graph.json")
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
