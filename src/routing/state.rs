//! Routing state snapshots
//!
//! Per ROUTING_MODEL.md §4:
//! - Routing state is recomputed from scratch after each full polling cycle
//! - The snapshot is immutable; readers never see a partial update
//! - `write_target` is the single up node observing primary; zero or more
//!   than one candidate means no write target at all (fail closed)
//! - `read_targets` are all up nodes observing replica

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::node::NodeId;
use crate::probe::ObservedRole;

/// Lightweight reference to a routable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRef {
    pub id: NodeId,
    pub address: String,
}

/// One node's standing at the end of a polling cycle, as fed into
/// recomputation. Produced by the pool from its hysteresis trackers.
#[derive(Debug, Clone)]
pub struct NodeObservation {
    pub node_id: NodeId,
    pub address: String,
    /// Whether the node is up per hysteresis
    pub up: bool,
    /// Role the node is routed as while up
    pub role: Option<ObservedRole>,
}

/// Immutable routing snapshot.
///
/// `cycle` identifies the polling cycle that produced this snapshot; every
/// field in one snapshot comes from the same cycle, never a mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingState {
    /// The single node receiving write traffic, if write authority is clear
    pub write_target: Option<NodeRef>,

    /// All nodes eligible for read traffic
    pub read_targets: Vec<NodeRef>,

    /// Polling cycle this snapshot was computed from
    pub cycle: u64,

    /// When the snapshot was computed
    pub computed_at: DateTime<Utc>,
}

impl RoutingState {
    /// The empty state published before the first polling cycle completes.
    /// Nothing is routed until probes have proven something.
    pub fn empty() -> Self {
        Self {
            write_target: None,
            read_targets: Vec::new(),
            cycle: 0,
            computed_at: Utc::now(),
        }
    }

    /// Recompute routing from a full cycle of observations.
    ///
    /// Per ROUTING_MODEL.md §4.2: if several nodes simultaneously claim
    /// primary, refusing writes is the only safe answer — routing must never
    /// pick a winner among split brains.
    pub fn recompute(cycle: u64, observations: &[NodeObservation]) -> Self {
        let mut primaries: Vec<NodeRef> = Vec::new();
        let mut read_targets: Vec<NodeRef> = Vec::new();

        for obs in observations {
            if !obs.up {
                continue;
            }
            let node_ref = NodeRef {
                id: obs.node_id,
                address: obs.address.clone(),
            };
            match obs.role {
                Some(ObservedRole::Primary) => primaries.push(node_ref),
                Some(ObservedRole::Replica) => read_targets.push(node_ref),
                _ => {}
            }
        }

        let write_target = if primaries.len() == 1 {
            primaries.pop()
        } else {
            None
        };

        Self {
            write_target,
            read_targets,
            cycle,
            computed_at: Utc::now(),
        }
    }

    /// True if writes can currently be dispatched.
    pub fn has_write_target(&self) -> bool {
        self.write_target.is_some()
    }

    /// True if the node appears anywhere in this snapshot.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.write_target.as_ref().is_some_and(|t| t.id == node_id)
            || self.read_targets.iter().any(|t| t.id == node_id)
    }
}
