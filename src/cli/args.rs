//! CLI argument definitions using clap
//!
//! Commands:
//! - helmsman start --config <path>
//! - helmsman check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Helmsman - a strict, fail-closed topology controller for single-primary
/// database clusters
#[derive(Parser, Debug)]
#[command(name = "helmsman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the controller: polling loop, proxies, and HTTP API
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./helmsman.json")]
        config: PathBuf,
    },

    /// Load and validate a configuration file, then exit
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./helmsman.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
