//! Node identity and state
//!
//! Per TOPOLOGY_MODEL.md §2:
//! - A node's identity (id, address) is immutable for its lifetime
//! - A node's declared role is what the operator configured
//! - A node's state is what the control plane has actually observed
//!
//! The state enum replaces implicit on-disk markers (a standby marker file in
//! older designs). State is transitioned only by probe observations and by
//! bootstrap phase completions, never inferred from the filesystem.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier for a node. Never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh node id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (used when an operator supplies identity).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role an operator declared for a node at registration.
///
/// Per TOPOLOGY_MODEL.md §2: declared role is configuration, not observation.
/// Routing decisions use observed roles only; the declared role exists so the
/// control plane can flag disagreement between intent and reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredRole {
    /// Node is intended to be the sole write authority
    Primary,
    /// Node is intended to stream from the primary and serve reads
    Replica,
}

impl DeclaredRole {
    /// String form for logs and the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredRole::Primary => "primary",
            DeclaredRole::Replica => "replica",
        }
    }
}

impl fmt::Display for DeclaredRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Explicit node state held in the Node record.
///
/// Per TOPOLOGY_MODEL.md §3:
/// - `Primary`: last observation confirmed the node accepts writes
/// - `Standby`: last observation confirmed the node replays the stream
/// - `Provisioning`: a bootstrap owns the node; its engine may be stopped
///   or its data directory mid-wipe at any moment
/// - `Unknown`: never observed or unreachable
///
/// `Unknown` is the safe default: a node in `Unknown` receives no traffic.
/// `Provisioning` is stronger still: the routing pool quarantines the node
/// outright instead of waiting for probes to notice the stopped engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Primary,
    Standby,
    Provisioning,
    Unknown,
}

impl NodeState {
    /// State name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            NodeState::Primary => "primary",
            NodeState::Standby => "standby",
            NodeState::Provisioning => "provisioning",
            NodeState::Unknown => "unknown",
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A registered node.
///
/// Immutable fields: `id`, `address`, `declared_role`.
/// Mutable fields: `slot_name` (set once when a slot ordinal is assigned),
/// `state` (updated from probe observations and bootstrap completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable unique identifier
    pub id: NodeId,

    /// Engine address, e.g. `"10.0.1.12:5432"`
    pub address: String,

    /// Role the operator declared at registration
    pub declared_role: DeclaredRole,

    /// Replication slot owned by this node, if one has been assigned.
    /// Only replicas carry slots; the primary never does.
    pub slot_name: Option<String>,

    /// Last confirmed state
    pub state: NodeState,
}

impl Node {
    /// Create a node record with a fresh id and `Unknown` state.
    pub fn new(address: impl Into<String>, declared_role: DeclaredRole) -> Self {
        Self {
            id: NodeId::new(),
            address: address.into(),
            declared_role,
            slot_name: None,
            state: NodeState::Unknown,
        }
    }

    /// Create a primary node record.
    pub fn primary(address: impl Into<String>) -> Self {
        Self::new(address, DeclaredRole::Primary)
    }

    /// Create a replica node record.
    pub fn replica(address: impl Into<String>) -> Self {
        Self::new(address, DeclaredRole::Replica)
    }

    /// Check if the operator declared this node a replica.
    pub fn is_declared_replica(&self) -> bool {
        self.declared_role == DeclaredRole::Replica
    }

    /// Record a confirmed state observation.
    pub fn observe_state(&mut self, state: NodeState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_starts_unknown() {
        let node = Node::replica("10.0.0.2:5432");
        assert_eq!(node.state, NodeState::Unknown);
        assert!(node.slot_name.is_none());
        assert!(node.is_declared_replica());
    }

    #[test]
    fn test_primary_constructor() {
        let node = Node::primary("10.0.0.1:5432");
        assert_eq!(node.declared_role, DeclaredRole::Primary);
        assert!(!node.is_declared_replica());
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = Node::replica("10.0.0.2:5432");
        let b = Node::replica("10.0.0.2:5432");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_observe_state_transitions() {
        let mut node = Node::replica("10.0.0.2:5432");
        node.observe_state(NodeState::Standby);
        assert_eq!(node.state, NodeState::Standby);

        node.observe_state(NodeState::Unknown);
        assert_eq!(node.state, NodeState::Unknown);
    }

    #[test]
    fn test_state_names_for_observability() {
        assert_eq!(NodeState::Primary.state_name(), "primary");
        assert_eq!(NodeState::Standby.state_name(), "standby");
        assert_eq!(NodeState::Provisioning.state_name(), "provisioning");
        assert_eq!(NodeState::Unknown.state_name(), "unknown");
    }

    #[test]
    fn test_declared_role_serialization() {
        let json = serde_json::to_string(&DeclaredRole::Replica).unwrap();
        assert_eq!(json, "\"replica\"");
    }
}
