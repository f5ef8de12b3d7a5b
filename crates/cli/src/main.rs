//! corkscan command-line entry point.
//!
//! Boots logging and configuration, then runs one subcommand against the
//! local cache and queue. Logs go to stderr as JSON; command output goes to
//! stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corkscan_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "corkscan", version, about = "Wine label analysis cache and offline sync")]
struct Cli {
    /// SQLite database path (overrides CORKSCAN_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store an analysis result for a label.
    Analyze(commands::scan::AnalyzeArgs),
    /// Mark a cached analysis as saved so it gets synced.
    Save { key: String },
    /// Clear the saved flag of a cached analysis.
    Unsave { key: String },
    /// Delete a cached analysis.
    Delete { key: String },
    /// Print a cached analysis.
    Show { key: String },
    /// List queue records waiting for upload.
    Pending,
    /// List the most recent queue records.
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run one sync pass.
    Sync,
    /// Keep syncing on cache and connectivity changes until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(db_path = %config.db_path.display(), "starting corkscan");

    let ctx = commands::Context::open(config).await;
    match cli.command {
        Command::Analyze(args) => commands::scan::analyze(&ctx, args).await,
        Command::Save { key } => commands::scan::save(&ctx, &key).await,
        Command::Unsave { key } => commands::scan::unsave(&ctx, &key).await,
        Command::Delete { key } => commands::scan::delete(&ctx, &key).await,
        Command::Show { key } => commands::scan::show(&ctx, &key).await,
        Command::Pending => commands::queue::pending(&ctx).await,
        Command::Recent { limit } => commands::queue::recent(&ctx, limit).await,
        Command::Sync => commands::sync::sync_once(&ctx).await,
        Command::Watch => commands::sync::watch(&ctx).await,
    }
}
