//! Controller configuration
//!
//! Per TOPOLOGY_MODEL.md §6:
//! - Configuration is an explicit immutable object passed at construction
//! - It is read once at startup and never re-read at runtime
//! - There is no environment-driven mutable global
//!
//! Validation is strict: a configuration that cannot be proven coherent
//! (probe timeout not shorter than the poll interval, zero thresholds,
//! colliding ports) is rejected before any listener is bound.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config file: {0}")]
    Unreadable(String),

    /// Config file is not valid JSON
    #[error("cannot parse config file: {0}")]
    Unparseable(String),

    /// Config parsed but failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_fall() -> u32 {
    3
}

fn default_rise() -> u32 {
    2
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_bootstrap_deadline_secs() -> u64 {
    300
}

fn default_confirmation_retries() -> u32 {
    30
}

fn default_write_port() -> u16 {
    6432
}

fn default_read_port() -> u16 {
    6433
}

fn default_http_port() -> u16 {
    6480
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_replication_user() -> String {
    "replicator".to_string()
}

fn default_data_root() -> std::path::PathBuf {
    std::path::PathBuf::from("./helmsman-data/replicas")
}

fn default_primary_data() -> std::path::PathBuf {
    std::path::PathBuf::from("./helmsman-data/primary")
}

/// Immutable controller configuration.
///
/// Deserialized from a JSON file (`helmsman.json` by convention), validated
/// once, then shared by reference for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address of the initial primary's engine, e.g. `"10.0.1.1:5432"`
    pub primary_address: String,

    /// Addresses of the initial replicas' engines
    #[serde(default)]
    pub replica_addresses: Vec<String>,

    /// Subnet/ACL scope for replication traffic, e.g. `"10.0.1.0/24"`.
    /// Passed through to standby configuration; not enforced by helmsman.
    #[serde(default)]
    pub allowed_subnet: Option<String>,

    /// Polling interval for the routing pool, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Consecutive unhealthy probes before a node is marked down
    #[serde(default = "default_fall")]
    pub fall: u32,

    /// Consecutive healthy probes of the expected role before a node is marked up
    #[serde(default = "default_rise")]
    pub rise: u32,

    /// Per-probe timeout, in milliseconds. Must be shorter than the poll interval.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Overall deadline for one bootstrap attempt, in seconds
    #[serde(default = "default_bootstrap_deadline_secs")]
    pub bootstrap_deadline_secs: u64,

    /// Probe attempts while awaiting streaming confirmation before a
    /// bootstrap fails fatally
    #[serde(default = "default_confirmation_retries")]
    pub confirmation_retries: u32,

    /// Host to bind all listeners on
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port of the write proxy
    #[serde(default = "default_write_port")]
    pub write_port: u16,

    /// Port of the read proxy
    #[serde(default = "default_read_port")]
    pub read_port: u16,

    /// Port of the operator/introspection HTTP API
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// User the standby authenticates as on the replication stream
    #[serde(default = "default_replication_user")]
    pub replication_user: String,

    /// Password for the replication user, if the engine requires one
    #[serde(default)]
    pub replication_password: Option<String>,

    /// Root directory for locally provisioned replica engine state
    #[serde(default = "default_data_root")]
    pub data_root: std::path::PathBuf,

    /// The primary's data directory, source of local base copies
    #[serde(default = "default_primary_data")]
    pub primary_data: std::path::PathBuf,
}

impl ControllerConfig {
    /// Create a configuration with defaults for everything except addresses.
    pub fn new(primary_address: impl Into<String>, replica_addresses: Vec<String>) -> Self {
        Self {
            primary_address: primary_address.into(),
            replica_addresses,
            allowed_subnet: None,
            poll_interval_secs: default_poll_interval_secs(),
            fall: default_fall(),
            rise: default_rise(),
            probe_timeout_ms: default_probe_timeout_ms(),
            bootstrap_deadline_secs: default_bootstrap_deadline_secs(),
            confirmation_retries: default_confirmation_retries(),
            listen_host: default_listen_host(),
            write_port: default_write_port(),
            read_port: default_read_port(),
            http_port: default_http_port(),
            replication_user: default_replication_user(),
            replication_password: None,
            data_root: default_data_root(),
            primary_data: default_primary_data(),
        }
    }

    /// Load and validate a configuration from a JSON file.
    pub fn load(path: &std::path::Path) -> ConfigResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Unparseable(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Per TOPOLOGY_MODEL.md §6:
    /// - The probe timeout must be shorter than the poll interval, so a hung
    ///   node cannot stall a polling cycle
    /// - fall and rise must each require at least one observation
    /// - The three listener ports must not collide
    pub fn validate(&self) -> ConfigResult<()> {
        if self.primary_address.is_empty() {
            return Err(ConfigError::Invalid(
                "primary_address must not be empty".to_string(),
            ));
        }
        if self.replica_addresses.iter().any(|a| a.is_empty()) {
            return Err(ConfigError::Invalid(
                "replica_addresses must not contain empty entries".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout() >= self.poll_interval() {
            return Err(ConfigError::Invalid(
                "probe_timeout_ms must be shorter than poll_interval_secs".to_string(),
            ));
        }
        if self.fall == 0 || self.rise == 0 {
            return Err(ConfigError::Invalid(
                "fall and rise must each be at least 1".to_string(),
            ));
        }
        if self.confirmation_retries == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_retries must be at least 1".to_string(),
            ));
        }
        if self.write_port == self.read_port
            || self.write_port == self.http_port
            || self.read_port == self.http_port
        {
            return Err(ConfigError::Invalid(
                "write_port, read_port and http_port must be distinct".to_string(),
            ));
        }
        Ok(())
    }

    /// Polling interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Bootstrap deadline as a `Duration`.
    pub fn bootstrap_deadline(&self) -> Duration {
        Duration::from_secs(self.bootstrap_deadline_secs)
    }

    /// Socket address of the write proxy.
    pub fn write_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.write_port)
    }

    /// Socket address of the read proxy.
    pub fn read_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.read_port)
    }

    /// Socket address of the HTTP API.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.http_port)
    }
}
