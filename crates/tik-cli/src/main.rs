//! # tik CLI
//!
//! Command-line interface for the Tiered Indexing Kernel.
//!
//! This binary provides human-friendly access to `tik-core` functionality.
//! Run `tik --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
