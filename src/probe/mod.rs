//! Role probing
//!
//! Per ROUTING_MODEL.md §2:
//! - A probe asks one node one question: what are you, right now?
//! - Probes are read-only and side-effect free
//! - A probe that fails or times out observes `Unknown` and unhealthy —
//!   the two outcomes are indistinguishable by design
//!
//! Probe results are snapshots, not a log: only the latest result per node
//! is ever held, and derived state (hysteresis counters, routing) lives in
//! the routing pool, never in the probe.

pub mod http;

use chrono::{DateTime, Utc};

use crate::node::{Node, NodeId};

pub use http::HttpRoleProbe;

/// Role observed by a probe.
///
/// `Unknown` covers every case where the node could not prove a role:
/// unreachable, timed out, or reachable but serving neither role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedRole {
    /// Node proved it is accepting writes
    Primary,
    /// Node proved it is replaying the replication stream
    Replica,
    /// No role could be proven
    Unknown,
}

impl ObservedRole {
    /// String form for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedRole::Primary => "primary",
            ObservedRole::Replica => "replica",
            ObservedRole::Unknown => "unknown",
        }
    }
}

/// Result of probing one node once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Node that was probed
    pub node_id: NodeId,

    /// Role the node proved, if any
    pub observed_role: ObservedRole,

    /// Whether the probe succeeded at all
    pub healthy: bool,

    /// When the probe completed
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// A successful observation of a role.
    pub fn observed(node_id: NodeId, observed_role: ObservedRole) -> Self {
        Self {
            node_id,
            observed_role,
            healthy: true,
            timestamp: Utc::now(),
        }
    }

    /// A failed probe: timeout, refused connection, or no role served.
    ///
    /// Per ROUTING_MODEL.md §2: failure and timeout classify identically.
    pub fn unreachable(node_id: NodeId) -> Self {
        Self {
            node_id,
            observed_role: ObservedRole::Unknown,
            healthy: false,
            timestamp: Utc::now(),
        }
    }

    /// True if this result is a healthy observation of the given role.
    pub fn is_healthy_as(&self, role: ObservedRole) -> bool {
        self.healthy && self.observed_role == role
    }
}

/// A role probe against one node.
///
/// Implementations must complete within a bounded timeout shorter than the
/// polling interval, so a hung node cannot stall a polling cycle.
pub trait RoleProbe: Send + Sync {
    /// Probe one node and report its current role and liveness.
    fn probe(&self, node: &Node) -> impl std::future::Future<Output = ProbeResult> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_is_unknown_and_unhealthy() {
        let id = NodeId::new();
        let result = ProbeResult::unreachable(id);
        assert_eq!(result.observed_role, ObservedRole::Unknown);
        assert!(!result.healthy);
        assert_eq!(result.node_id, id);
    }

    #[test]
    fn test_observed_is_healthy() {
        let id = NodeId::new();
        let result = ProbeResult::observed(id, ObservedRole::Replica);
        assert!(result.healthy);
        assert!(result.is_healthy_as(ObservedRole::Replica));
        assert!(!result.is_healthy_as(ObservedRole::Primary));
    }

    #[test]
    fn test_unhealthy_never_matches_a_role() {
        let result = ProbeResult::unreachable(NodeId::new());
        assert!(!result.is_healthy_as(ObservedRole::Unknown));
        assert!(!result.is_healthy_as(ObservedRole::Primary));
    }
}
