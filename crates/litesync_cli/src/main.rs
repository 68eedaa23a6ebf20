//! LiteSync CLI
//!
//! Command-line tools for the LiteSync replicator.
//!
//! # Commands
//!
//! - `check` - Build a replication configuration and print it
//! - `simulate` - Run a replication against in-memory stores
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::ConnectionArgs;
use tracing_subscriber::EnvFilter;

/// LiteSync replication tools.
#[derive(Parser)]
#[command(name = "litesync")]
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
    /// Build a configuration and print the resolved settings
    Check {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replicate seeded in-memory stores and print status changes
    Simulate {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Documents to seed on each side
        #[arg(short, long, default_value = "10")]
        documents: usize,

        /// Seconds to wait for the session to go idle
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Check { connection, format } => {
            commands::check::run(&connection, &format)?;
        }
        Commands::Simulate {
            connection,
            documents,
            timeout,
            format,
        } => {
            commands::simulate::run(&connection, documents, timeout, &format)?;
        }
        Commands::Version => {
            println!("LiteSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
