use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mnemosyne",
    about = "On-device activity intelligence: turns desktop capture events into semantically-tagged sessions",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Row-store location (overrides MNEMOSYNE_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the enrichment-and-aggregation loop
    Run {
        /// Vault of notes enabling wikilink augmentation
        #[arg(long)]
        vault: Option<PathBuf>,

        /// Process one cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show store statistics and resource-guard state
    Status,

    /// List recently archived sessions
    Sessions {
        /// Maximum sessions to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Prune old rows, sweep orphaned screenshots, and compact the store
    Maintain {
        /// Days of archived sessions to keep
        #[arg(long, default_value_t = 30)]
        session_retention_days: i64,

        /// Days of raw events to keep
        #[arg(long, default_value_t = 7)]
        event_retention_days: i64,
    },
}
