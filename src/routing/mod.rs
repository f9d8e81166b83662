//! Health-driven routing
//!
//! Per ROUTING_MODEL.md:
//! - One polling loop probes every registered node on a fixed interval
//! - Per-node fall/rise hysteresis suppresses flapping
//! - Routing state is recomputed once per full cycle and published as an
//!   immutable snapshot
//! - At any moment, at most one node receives write traffic; if write
//!   authority is unclear, writes are refused (fail closed)

pub mod dispatch;
pub mod errors;
pub mod health;
pub mod pool;
pub mod state;

pub use dispatch::{pick_write, ConnectionCounts, ConnectionGuard, ReadDispatcher};
pub use errors::{RoutingError, RoutingResult};
pub use health::{HealthTracker, Transition};
pub use pool::{NodeStanding, RoutingPool, SharedRegistry};
pub use state::{NodeObservation, NodeRef, RoutingState};
