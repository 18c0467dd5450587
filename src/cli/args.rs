//! CLI argument definitions using clap
//!
//! Commands:
//! - aeroslot init --config <path>
//! - aeroslot status --config <path>
//! - aeroslot checkpoint --config <path>
//! - aeroslot sync --config <path> [--flushed-lsn <X/Y>]
//! - aeroslot create-slot --config <path> --name <name> [--kind <kind>] [--failover]
//! - aeroslot drop-slot --config <path> --name <name>
//! - aeroslot promote --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aeroslot - replication slot lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "aeroslot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize slot state in a data directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,
    },

    /// Print every slot row as JSON
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,
    },

    /// Run one invalidation pass and print the report
    Checkpoint {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,
    },

    /// Standby only: mirror the primary's failover slots once
    Sync {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,

        /// WAL position this standby has flushed (e.g. 0/3000060).
        /// Without it the standby counts as fully caught up.
        #[arg(long)]
        flushed_lsn: Option<String>,
    },

    /// Create a local slot
    CreateSlot {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,

        /// Slot name
        #[arg(long)]
        name: String,

        /// "physical" or "logical"
        #[arg(long, default_value = "logical")]
        kind: String,

        /// Mirror this slot onto standbys
        #[arg(long)]
        failover: bool,
    },

    /// Drop a local slot
    DropSlot {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,

        /// Slot name
        #[arg(long)]
        name: String,
    },

    /// Standby only: take authority over every mirrored slot
    Promote {
        /// Path to configuration file
        #[arg(long, default_value = "./aeroslot.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
