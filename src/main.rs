//! aeroslot CLI entry point
//!
//! This is a minimal entrypoint that:
//! 1. Parses CLI arguments (via cli::run)
//! 2. Dispatches to CLI commands (via cli::run)
//! 3. Reports errors as JSON on stdout and text on stderr
//! 4. Exits with non-zero on failure
//!
//! All logic is delegated to the CLI module.

use aeroslot::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
