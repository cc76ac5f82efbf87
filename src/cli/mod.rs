//! CLI module for rulecast
//!
//! Provides the command-line interface:
//! - demo: seed the check-credit model and run the order scenarios
//! - explain: print the rule set, ranks and dependency edges

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{explain, run, run_command, run_demo};
pub use errors::{CliError, CliErrorCode, CliResult};
