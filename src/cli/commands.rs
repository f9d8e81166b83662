//! CLI command implementations
//!
//! `start` wires the whole controller together: registry, slot table,
//! polling pool, bootstrapper, both proxies, and the HTTP API. main.rs
//! delegates here and does nothing else.

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::bootstrap::provisioner::LocalProvisioner;
use crate::bootstrap::ReplicaBootstrapper;
use crate::config::ControllerConfig;
use crate::controller::TopologyController;
use crate::http_server::{HttpServer, HttpServerConfig};
use crate::observability::{Logger, MetricsRegistry};
use crate::probe::HttpRoleProbe;
use crate::proxy::{ReadProxy, WriteProxy};
use crate::routing::{RoutingPool, SharedRegistry};
use crate::slots::SlotManager;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches. This is the only function main.rs calls.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Start { config } => start(&config),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Load and validate a configuration file, print a summary, exit.
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;
    let summary = serde_json::json!({
        "valid": true,
        "primary_address": config.primary_address,
        "replicas": config.replica_addresses.len(),
        "poll_interval_secs": config.poll_interval_secs,
        "fall": config.fall,
        "rise": config.rise,
        "write_addr": config.write_addr(),
        "read_addr": config.read_addr(),
        "http_addr": config.http_addr(),
    });
    println!("{}", summary);
    Ok(())
}

/// Start the controller and serve until killed.
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("failed to create tokio runtime: {}", e)))?;
    rt.block_on(serve(config))
}

async fn serve(config: ControllerConfig) -> CliResult<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let registry: SharedRegistry = Arc::new(RwLock::new(Vec::new()));
    let slots = Arc::new(SlotManager::new());

    let probe = HttpRoleProbe::new(config.probe_timeout());
    let provisioner = LocalProvisioner::new(config.data_root.clone(), config.primary_data.clone());

    let pool = RoutingPool::new(
        probe.clone(),
        Arc::clone(&registry),
        &config,
        Arc::clone(&metrics),
    );
    let routing_rx = pool.subscribe_routing();
    let standings_rx = pool.subscribe_standings();

    let bootstrapper = ReplicaBootstrapper::new(
        provisioner,
        probe,
        Arc::clone(&slots),
        &config,
        Arc::clone(&metrics),
    );
    let controller = Arc::new(TopologyController::new(
        registry,
        slots,
        bootstrapper,
        routing_rx.clone(),
        standings_rx,
        Arc::clone(&metrics),
        config.primary_address.clone(),
    ));

    controller
        .seed(&config.replica_addresses)
        .await
        .map_err(|e| CliError::boot_failed(format!("failed to register nodes: {}", e)))?;

    // Bind every listener before serving anything, so a port collision
    // fails the whole start instead of a half-running controller.
    let write_listener = TcpListener::bind(config.write_addr()).await?;
    let read_listener = TcpListener::bind(config.read_addr()).await?;

    let write_addr = config.write_addr();
    let read_addr = config.read_addr();
    let http_addr = config.http_addr();
    Logger::info(
        "CONTROLLER_STARTED",
        &[
            ("primary", config.primary_address.as_str()),
            ("write_addr", write_addr.as_str()),
            ("read_addr", read_addr.as_str()),
            ("http_addr", http_addr.as_str()),
        ],
    );

    tokio::spawn(pool.run());
    tokio::spawn(WriteProxy::new(routing_rx.clone(), Arc::clone(&metrics)).run(write_listener));
    tokio::spawn(ReadProxy::new(routing_rx, Arc::clone(&metrics)).run(read_listener));

    let http = HttpServer::new(
        HttpServerConfig::from_controller(&config),
        controller,
        metrics,
    );
    http.start().await?;
    Ok(())
}
