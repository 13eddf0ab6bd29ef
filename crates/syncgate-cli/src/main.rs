//! Operator CLI for the syncgate request gateway
//!
//! Inspects and drains the durable queue on disk, and runs a gateway that
//! reads JSON request descriptors from stdin.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    common,
    conflicts::{handle_conflicts_command, ConflictsCommand},
    queue::{handle_queue_command, QueueCommand},
    run::{handle_run_command, RunCommand},
};

#[derive(Parser)]
#[command(name = "syncgate")]
#[command(about = "Syncgate - offline-first request gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".syncgate/config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file and print a summary
    CheckConfig,

    /// Inspect or cancel queued operations
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Inspect or resolve version conflicts
    #[command(subcommand)]
    Conflicts(ConflictsCommand),

    /// Attempt every pending operation now, ignoring backoff
    Flush,

    /// Serve JSON-lines requests from stdin with the retry scheduler running
    Run(RunCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckConfig => {
            let config = common::load_config(&cli.config, true)?;
            common::print_summary(&cli.config, &config);
        }

        Commands::Queue(cmd) => {
            let config = common::load_config(&cli.config, false)?;
            handle_queue_command(cmd, config).await?;
        }

        Commands::Conflicts(cmd) => {
            let config = common::load_config(&cli.config, false)?;
            handle_conflicts_command(cmd, config).await?;
        }

        Commands::Flush => {
            let config = common::load_config(&cli.config, false)?;
            common::flush(config).await?;
        }

        Commands::Run(cmd) => {
            let config = common::load_config(&cli.config, false)?;
            handle_run_command(cmd, config).await?;
        }
    }

    Ok(())
}
