//! recsync CLI
//!
//! Command-line tools for recsync deployments.
//!
//! # Commands
//!
//! - `run` - Replay a JSON script of reads and writes against an in-memory store
//! - `check-config` - Validate a server configuration file

mod commands;

use clap::{Parser, Subcommand};
use commands::run::OutputFormat;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// recsync command-line tools.
#[derive(Parser)]
#[command(name = "recsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a request script against an in-memory store
    Run {
        /// Server configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Request script (JSON)
        #[arg(short, long)]
        script: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Exit with an error if any step fails
        #[arg(long)]
        strict: bool,
    },

    /// Validate a server configuration file
    CheckConfig {
        /// Server configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Commands::Run {
            config,
            script,
            format,
            strict,
        } => {
            let summary = commands::run::run(&config, &script, format, strict, &mut stdout)?;
            info!(
                steps = summary.steps,
                failed = summary.failed,
                notices = summary.notices.len(),
                lagged = summary.lagged,
                "script finished"
            );
        }
        Commands::CheckConfig { config } => {
            commands::check_config::run(&config, &mut stdout)?;
        }
        Commands::Version => {
            writeln!(stdout, "recsync CLI v{}", env!("CARGO_PKG_VERSION"))?;
        }
    }

    Ok(())
}
