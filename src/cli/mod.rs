// CLI module
// Command-line interface, argument parsing and subcommand handlers

mod args;
mod commands;

pub use args::{CliArgs, Command, StatusArg};
pub use commands::{execute, run};

use clap::Parser;

/// Parse command-line arguments using clap
///
/// If parsing fails (invalid arguments, missing subcommand, or `--help`),
/// clap prints an error or help text and exits the process.
pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}
