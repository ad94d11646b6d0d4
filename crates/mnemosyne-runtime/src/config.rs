use std::path::PathBuf;
use std::time::Duration;

use mnemosyne_core::{resolve_db_path, screenshots_dir};

pub const DEFAULT_LLM_HOST: &str = "http://localhost:11434";
pub const DEFAULT_VLM_MODEL: &str = "minicpm-v";

/// Runtime configuration, resolved from the environment with spec defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Row-store file location.
    pub db_path: PathBuf,
    /// Broker host; presence enables stream mode.
    pub redis_host: Option<String>,
    pub redis_port: u16,
    /// LLM endpoint and tiers.
    pub llm_host: String,
    pub model_heavy: String,
    pub model_light: String,
    /// Vision endpoint and model.
    pub vlm_host: String,
    pub vlm_model: String,
    /// Vault of notes enabling wikilink augmentation.
    pub vault_path: Option<PathBuf>,
    pub screenshots_dir: PathBuf,
    pub ocr_languages: String,

    pub idle_threshold_sec: i64,
    pub max_session_sec: i64,
    pub min_session_sec: i64,
    pub vram_threshold_mb: u64,
    pub cycle_period: Duration,
    pub error_cooldown: Duration,
    pub dedup_window_sec: i64,
    pub batch_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let llm_host = std::env::var("OLLAMA_LLM_HOST")
            .or_else(|_| std::env::var("OLLAMA_HOST"))
            .unwrap_or_else(|_| DEFAULT_LLM_HOST.to_string());
        let vlm_host =
            std::env::var("OLLAMA_VLM_HOST").unwrap_or_else(|_| llm_host.clone());

        Self {
            db_path: resolve_db_path(None),
            redis_host: std::env::var("MNEMOSYNE_REDIS_HOST").ok().filter(|h| !h.is_empty()),
            redis_port: 6379,
            llm_host,
            model_heavy: std::env::var("LLM_MODEL_HEAVY")
                .unwrap_or_else(|_| mnemosyne_cognition::DEFAULT_MODEL.to_string()),
            model_light: std::env::var("LLM_MODEL_LIGHT").unwrap_or_else(|_| "phi3:mini".to_string()),
            vlm_host,
            vlm_model: std::env::var("VLM_MODEL").unwrap_or_else(|_| DEFAULT_VLM_MODEL.to_string()),
            vault_path: std::env::var("MNEMOSYNE_VAULT_PATH").ok().map(PathBuf::from),
            screenshots_dir: screenshots_dir(),
            ocr_languages: std::env::var("MNEMOSYNE_OCR_LANG")
                .unwrap_or_else(|_| mnemosyne_perception::DEFAULT_LANGUAGES.to_string()),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: mnemosyne_core::default_db_path(),
            redis_host: None,
            redis_port: 6379,
            llm_host: DEFAULT_LLM_HOST.to_string(),
            model_heavy: mnemosyne_cognition::DEFAULT_MODEL.to_string(),
            model_light: "phi3:mini".to_string(),
            vlm_host: DEFAULT_LLM_HOST.to_string(),
            vlm_model: DEFAULT_VLM_MODEL.to_string(),
            vault_path: None,
            screenshots_dir: screenshots_dir(),
            ocr_languages: "eng+rus".to_string(),
            idle_threshold_sec: 300,
            max_session_sec: 1800,
            min_session_sec: 5,
            vram_threshold_mb: 4096,
            cycle_period: Duration::from_secs(30),
            error_cooldown: Duration::from_secs(5),
            dedup_window_sec: 15,
            batch_limit: 100,
        }
    }
}
