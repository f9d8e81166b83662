//! helmsman - a strict, fail-closed topology controller for single-primary
//! database clusters
//!
//! One primary takes writes, replicas stream from it and serve reads.
//! Helmsman probes every node, routes traffic by observed role with fall/rise
//! hysteresis, manages replication slots, and bootstraps replicas from a
//! physical copy of the primary. When write authority is unclear, writes are
//! refused rather than guessed.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod controller;
pub mod http_server;
pub mod node;
pub mod observability;
pub mod probe;
pub mod proxy;
pub mod routing;
pub mod slots;
