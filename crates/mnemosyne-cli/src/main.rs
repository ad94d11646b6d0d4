mod args;
mod handlers;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let db_override = cli.db.clone();

    match cli.command {
        Command::Run { vault, once } => handlers::run(db_override, vault, once).await,
        Command::Status => handlers::status(db_override).await,
        Command::Sessions { limit } => handlers::sessions(db_override, limit).await,
        Command::Maintain {
            session_retention_days,
            event_retention_days,
        } => handlers::maintain(db_override, session_retention_days, event_retention_days).await,
    }
}
