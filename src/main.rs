mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "calsync")]
#[command(about = "Keep remote calendars in sync with ICS schedule exports")]
struct Cli {
    /// Config file (defaults to ~/.config/calsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,
    /// List scheduled jobs, soonest first
    Jobs,
    /// Sync one schedule export now, outside the scheduler
    Sync {
        /// Schedule page or ICS export URL
        source_url: String,

        /// Target calendar name (defaults to the schedule's resource id)
        #[arg(short, long)]
        calendar: Option<String>,

        /// Count changes without writing them
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config.log_level);

    match cli.command {
        Commands::Serve => commands::serve::run(&config).await,
        Commands::Jobs => commands::jobs::run(&config),
        Commands::Sync {
            source_url,
            calendar,
            dry_run,
            json,
        } => commands::sync::run(&config, source_url, calendar, dry_run, json).await,
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
