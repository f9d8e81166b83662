//! CLI error types
//!
//! Every CLI error is fatal: the process prints it and exits non-zero.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or validated
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A listener could not be bound or the runtime could not start
    #[error("boot failed: {0}")]
    Boot(String),
}

impl CliError {
    pub fn boot_failed(message: impl Into<String>) -> Self {
        CliError::Boot(message.into())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Boot(err.to_string())
    }
}
