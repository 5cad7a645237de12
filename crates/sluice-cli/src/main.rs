//! Sluice CLI - inspect a controller's durable request queue and failures
//!
//! Meant for offline use: opening the queue repairs a torn tail, so stop the
//! controller that owns the directory first.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the request queue directory
    #[arg(short, long, default_value = "./data/queue")]
    queue_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue offsets and size
    Status,

    /// Requests recorded but not yet acknowledged
    Pending {
        /// Print as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Requests that failed terminally
    Failures {
        /// Path to the failed-request ledger
        #[arg(short, long, default_value = "./data/failed.jsonl")]
        ledger: PathBuf,

        /// Print as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Drop acknowledged requests from the log
    Compact,

    /// Validate a controller configuration file
    CheckConfig {
        /// Path to the JSON configuration
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Status => commands::queue::status(cli.queue_dir)?,
        Commands::Pending { json } => commands::queue::pending(cli.queue_dir, json)?,
        Commands::Compact => commands::queue::compact(cli.queue_dir)?,
        Commands::Failures { ledger, json } => commands::failures::execute(ledger, json)?,
        Commands::CheckConfig { path } => commands::config::execute(path)?,
    }

    Ok(())
}
