//! Introspection and operator HTTP API
//!
//! # Endpoints
//!
//! - `/health` - liveness check
//! - `/observability/metrics` - counter snapshot
//! - `/cluster/topology` - nodes, routing, standings, slots in one view
//! - `/cluster/routing` - current routing snapshot
//! - `/cluster/slots` - replication slot table
//! - `/cluster/nodes` - node registration and lookup
//! - `/cluster/nodes/{id}/remove` - deregistration
//! - `/cluster/nodes/{id}/bootstrap` - trigger a replica bootstrap

pub mod config;
pub mod observability_routes;
pub mod server;
pub mod topology_routes;

pub use config::HttpServerConfig;
pub use server::HttpServer;
