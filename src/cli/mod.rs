//! CLI module for helmsman
//!
//! Provides the command-line interface:
//! - start: boot the controller and serve
//! - check-config: validate a configuration file and exit

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, start};
pub use errors::{CliError, CliResult};
