//! CLI module for aeroslot
//!
//! Provides command-line interface for:
//! - init: Create empty slot state
//! - status: Print slot rows
//! - checkpoint: Run one invalidation pass
//! - sync: One standby sync poll
//! - create-slot / drop-slot: Local slot administration
//! - promote: Standby takes authority over its mirrors

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    checkpoint, create_slot, drop_slot, init, promote, run, run_command, status, sync, Config,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
