//! CLI argument definitions using clap
//!
//! Commands:
//! - clusterlogs scan --config <path>
//! - clusterlogs get --config <path> --key <json>
//! - clusterlogs watch --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clusterlogs - query and tail a cluster's logs as one table
#[derive(Parser, Debug)]
#[command(name = "clusterlogs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every readable row, oldest first
    Scan {
        /// Path to cluster file
        #[arg(long, default_value = "./clusterlogs.json")]
        config: PathBuf,
    },

    /// Look up one row by primary key
    Get {
        /// Path to cluster file
        #[arg(long, default_value = "./clusterlogs.json")]
        config: PathBuf,

        /// Primary key as JSON, e.g. '["2024-03-01T10:00:00.000000000Z","<uuid>"]'
        #[arg(long)]
        key: String,
    },

    /// Print current rows, then stream new ones until interrupted
    Watch {
        /// Path to cluster file
        #[arg(long, default_value = "./clusterlogs.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
