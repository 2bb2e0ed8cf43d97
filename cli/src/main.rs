//! cipherbatch CLI
//!
//! Command-line driver for the encrypted batch protocol.
//!
//! # Usage
//!
//! ```bash
//! # Write a local configuration
//! cipherbatch init --preset local
//!
//! # Run one full round against the local oracle committee
//! cipherbatch simulate --markers 4 --commands 2
//!
//! # Summarize the saved snapshot
//! cipherbatch inspect --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logging;

use commands::{InitCommand, InspectCommand, SimulateCommand};

/// Encrypted batch submission with verified decryption callbacks
#[derive(Parser)]
#[command(name = "cipherbatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encrypted batch protocol driver", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, global = true, env = "CIPHERBATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data directory
    Init(InitCommand),

    /// Run one simulated round
    Simulate(SimulateCommand),

    /// Summarize a state snapshot
    Inspect(InspectCommand),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&logging::settings(
        cli.config.as_deref(),
        cli.data_dir.as_deref(),
        cli.log_level.as_deref(),
        cli.json_logs,
    ))?;

    match cli.command {
        Commands::Init(cmd) => cmd.execute(cli.data_dir).await,
        Commands::Simulate(cmd) => cmd.execute(cli.config, cli.data_dir).await,
        Commands::Inspect(cmd) => cmd.execute(cli.data_dir).await,
        Commands::Version => {
            println!("cipherbatch {}", cipherbatch::VERSION);
            println!("Snapshot format: v{}", cipherbatch_protocol::SNAPSHOT_VERSION);
            Ok(())
        }
    }
}
