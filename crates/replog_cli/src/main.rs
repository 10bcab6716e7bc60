//! replog CLI
//!
//! Command-line tools for inspecting oplog files.
//!
//! # Commands
//!
//! - `dump` - Print entries in optime order
//! - `verify` - Check frame checksums and the hash chain
//! - `version` - Print version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Oplog inspection tools.
#[derive(Parser)]
#[command(name = "replog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the oplog file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for `dump`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per entry
    Text,
    /// A JSON array
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print oplog entries in optime order
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify frame checksums and the hash chain
    Verify {
        /// Hash of the entry preceding the first one in the file, for logs
        /// whose head has been truncated
        #[arg(long)]
        prev_hash: Option<i64>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Dump { limit, format } => {
            let path = cli.path.ok_or("oplog path required for dump")?;
            commands::dump::run(&path, limit, format)?;
        }
        Commands::Verify { prev_hash } => {
            let path = cli.path.ok_or("oplog path required for verify")?;
            commands::verify::run(&path, prev_hash)?;
        }
        Commands::Version => {
            println!("replog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("replog core v{}", replog_core::VERSION);
        }
    }

    Ok(())
}
