//! CLI argument definitions using clap
//!
//! Commands:
//! - rulecast demo --conditions <text> [--endpoint <url> --model <id>] [--audit-log <path>]
//! - rulecast explain

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rulecast - a declarative, dependency-ordered business rules engine
#[derive(Parser, Debug)]
#[command(name = "rulecast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Seed the check-credit model and run the order scenarios
    Demo {
        /// Path to an engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Free-text state of the world sent with every delegated
        /// selection
        #[arg(long)]
        conditions: Option<String>,

        /// Chat-completions endpoint for live supplier selection.
        /// Without it, delegated rules run on their fallback policies.
        #[arg(long)]
        endpoint: Option<String>,

        /// Model identifier for live supplier selection
        #[arg(long)]
        model: Option<String>,

        /// Append committed decision records to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Print the demo rule set, dependency edges and evaluation ranks
    Explain,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
