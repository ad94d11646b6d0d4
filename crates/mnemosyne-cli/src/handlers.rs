use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::DateTime;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::sync::watch;

use mnemosyne_core::{resolve_db_path, screenshots_dir};
use mnemosyne_runtime::{Config, Orchestrator, SystemGuard};
use mnemosyne_store::{Storage, maintenance};
use mnemosyne_types::truncate_chars;

fn db_path(db_override: Option<PathBuf>) -> PathBuf {
    match db_override {
        Some(path) => path,
        None => resolve_db_path(None),
    }
}

pub async fn run(db_override: Option<PathBuf>, vault: Option<PathBuf>, once: bool) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(db) = db_override {
        config.db_path = db;
    }
    if vault.is_some() {
        config.vault_path = vault;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::initialize(config, shutdown_rx)
        .await
        .context("initialization failed")?;

    if once {
        let report = orchestrator.run_cycle().await?;
        println!(
            "processed {} events from {} groups",
            report.events_processed, report.groups
        );
        return Ok(());
    }

    orchestrator.run().await
}

pub async fn status(db_override: Option<PathBuf>) -> Result<()> {
    let path = db_path(db_override);
    let storage = Storage::open(&path)
        .with_context(|| format!("opening row store at {}", path.display()))?;

    let stats = storage.stats().get_stats().await?;
    let detailed = storage.stats().get_detailed_analytics().await?;

    let colored = std::io::stdout().is_terminal();
    let header = |text: &str| {
        if colored {
            println!("{}", text.bold());
        } else {
            println!("{text}");
        }
    };

    header("Store");
    println!("  database:        {}", path.display());
    println!("  total events:    {}", stats.total_events);
    println!("  pending events:  {}", stats.pending_events);
    println!("  enriched events: {}", stats.enriched_events);

    header("Enrichment");
    println!("  with intent:     {}", detailed.llm_events);
    println!("  with vision:     {}", detailed.vlm_events);
    println!("  with screenshot: {}", detailed.screenshot_events);

    header("Resource guard");
    let guard = SystemGuard::new(Config::default().vram_threshold_mb);
    match guard.free_gpu_bytes() {
        Some(free) => println!("  free VRAM:       {} MiB", free / 1024 / 1024),
        None => println!("  free VRAM:       unavailable"),
    }
    let verdict = if guard.safe_to_run() {
        if colored {
            format!("{}", "safe to run".green())
        } else {
            "safe to run".to_string()
        }
    } else if colored {
        format!("{}", "denied".red())
    } else {
        "denied".to_string()
    };
    println!("  admission:       {verdict}");

    Ok(())
}

pub async fn sessions(db_override: Option<PathBuf>, limit: usize) -> Result<()> {
    let path = db_path(db_override);
    let storage = Storage::open(&path)
        .with_context(|| format!("opening row store at {}", path.display()))?;

    let rows = storage.sessions().get_recent(limit).await?;
    if rows.is_empty() {
        println!("no archived sessions");
        return Ok(());
    }

    for row in rows {
        let start = DateTime::from_timestamp(row.start_time, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| row.start_time.to_string());
        let minutes = row.duration_seconds / 60;
        let summary = row
            .activity_summary
            .as_deref()
            .map(|s| truncate_chars(s, 70).to_string())
            .unwrap_or_else(|| "(no summary)".to_string());

        println!(
            "{}  {:>4}m  {:<20}  {}",
            start,
            minutes,
            truncate_chars(&row.primary_process, 20),
            summary
        );
        if !row.generated_tags.is_empty() {
            println!("{:>18}tags: {}", "", row.generated_tags.join(", "));
        }
    }

    Ok(())
}

pub async fn maintain(
    db_override: Option<PathBuf>,
    session_retention_days: i64,
    event_retention_days: i64,
) -> Result<()> {
    let path = db_path(db_override);
    let storage = Storage::open(&path)
        .with_context(|| format!("opening row store at {}", path.display()))?;

    let shots = screenshots_dir();
    let report = maintenance::run_full_maintenance(
        &storage,
        Some(shots.as_path()),
        session_retention_days,
        event_retention_days,
    )
    .await?;

    println!("sessions pruned:     {}", report.sessions_pruned);
    println!("raw events pruned:   {}", report.raw_events_pruned);
    println!("screenshots cleaned: {}", report.screenshots_cleaned);
    println!(
        "store size:          {} KiB -> {} KiB",
        report.size_before_bytes / 1024,
        report.size_after_bytes / 1024
    );

    Ok(())
}
