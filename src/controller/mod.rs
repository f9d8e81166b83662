//! Topology controller
//!
//! Per TOPOLOGY_MODEL.md §5:
//! - The controller is the sole mutator of cluster membership; the routing
//!   pool reads membership and updates observed state, nothing else
//! - Replica slot ordinals are assigned once, at registration, from a
//!   monotonic counter, so slot names never collide and never change
//! - Deregistration removes the node from membership first, then releases
//!   its slot; traffic stops before replication state is torn down
//!
//! Failover is manual: the controller never promotes a node on its own. An
//! operator promotes the engine out of band and the routing pool converges
//! on the new primary through its ordinary hysteresis.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::bootstrap::{BootstrapError, BootstrapJob, ReplicaBootstrapper};
use crate::bootstrap::provisioner::ReplicaProvisioner;
use crate::node::{DeclaredRole, Node, NodeId, NodeState};
use crate::observability::{Logger, MetricsRegistry};
use crate::probe::RoleProbe;
use crate::routing::{NodeStanding, RoutingState, SharedRegistry};
use crate::slots::{slot_name_for_ordinal, ReplicationSlot, SlotManager};

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Upper bound on waiting for the routing pool to publish a snapshot that
/// excludes a quarantined node. Must exceed any sane poll interval.
const QUARANTINE_SETTLE_LIMIT: Duration = Duration::from_secs(30);

/// Controller errors
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// No registered node carries this id
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// A node with this address is already registered
    #[error("address already registered: {0}")]
    DuplicateAddress(String),

    /// Bootstrap can only target nodes declared as replicas
    #[error("node {0} is not declared a replica")]
    NotAReplica(NodeId),

    /// The node is owned by a running bootstrap
    #[error("a bootstrap is in flight for node {0}")]
    BootstrapInFlight(NodeId),

    /// Routing never published a snapshot excluding the quarantined node
    #[error("quarantine for node {0} did not settle; is the polling pool running?")]
    QuarantineStalled(NodeId),

    /// A bootstrap attempt failed
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Point-in-time view of the whole topology, for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyView {
    pub nodes: Vec<Node>,
    pub routing: RoutingState,
    pub standings: Vec<NodeStanding>,
    pub slots: Vec<ReplicationSlot>,
}

/// Owner of cluster membership and the bootstrap orchestrator.
pub struct TopologyController<Pr: ReplicaProvisioner, P: RoleProbe> {
    registry: SharedRegistry,
    slots: Arc<SlotManager>,
    bootstrapper: ReplicaBootstrapper<Pr, P>,
    routing_rx: watch::Receiver<Arc<RoutingState>>,
    standings_rx: watch::Receiver<Arc<Vec<NodeStanding>>>,
    metrics: Arc<MetricsRegistry>,
    primary_address: String,
    next_ordinal: AtomicU32,
}

impl<Pr: ReplicaProvisioner, P: RoleProbe> TopologyController<Pr, P> {
    pub fn new(
        registry: SharedRegistry,
        slots: Arc<SlotManager>,
        bootstrapper: ReplicaBootstrapper<Pr, P>,
        routing_rx: watch::Receiver<Arc<RoutingState>>,
        standings_rx: watch::Receiver<Arc<Vec<NodeStanding>>>,
        metrics: Arc<MetricsRegistry>,
        primary_address: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            slots,
            bootstrapper,
            routing_rx,
            standings_rx,
            metrics,
            primary_address: primary_address.into(),
            next_ordinal: AtomicU32::new(1),
        }
    }

    /// Register the configured primary and replicas at startup.
    ///
    /// Every node starts `Unknown`; nothing is routed until probes prove it.
    pub async fn seed(&self, replica_addresses: &[String]) -> ControllerResult<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(replica_addresses.len() + 1);
        ids.push(
            self.add_node(self.primary_address.clone(), DeclaredRole::Primary)
                .await?,
        );
        for address in replica_addresses {
            ids.push(self.add_node(address.clone(), DeclaredRole::Replica).await?);
        }
        Ok(ids)
    }

    /// Register a node.
    ///
    /// Replicas are assigned their slot ordinal here, once, for life.
    pub async fn add_node(
        &self,
        address: String,
        declared_role: DeclaredRole,
    ) -> ControllerResult<NodeId> {
        let mut registry = self.registry.write().await;
        if registry.iter().any(|n| n.address == address) {
            return Err(ControllerError::DuplicateAddress(address));
        }

        let mut node = Node::new(address, declared_role);
        if node.is_declared_replica() {
            let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
            node.slot_name = Some(slot_name_for_ordinal(ordinal));
        }

        let node_id = node.id.to_string();
        let slot = node.slot_name.clone().unwrap_or_else(|| "none".to_string());
        Logger::info(
            "NODE_REGISTERED",
            &[
                ("node", node_id.as_str()),
                ("address", node.address.as_str()),
                ("declared_role", node.declared_role.as_str()),
                ("slot", slot.as_str()),
            ],
        );

        let id = node.id;
        registry.push(node);
        Ok(id)
    }

    /// Deregister a node.
    ///
    /// Membership is updated first, under the registry lock, so the next
    /// polling cycle stops routing to the node; only then is its slot
    /// released. A node owned by a running bootstrap cannot be removed:
    /// releasing its slot out from under the job would let a later
    /// registration rebind a slot the job still intends to activate.
    pub async fn remove_node(&self, node_id: NodeId) -> ControllerResult<()> {
        if self.bootstrapper.is_in_flight(node_id) {
            return Err(ControllerError::BootstrapInFlight(node_id));
        }

        let removed = {
            let mut registry = self.registry.write().await;
            let position = registry.iter().position(|n| n.id == node_id);
            match position {
                Some(index) => registry.remove(index),
                None => return Err(ControllerError::UnknownNode(node_id)),
            }
        };

        if let Some(slot_name) = &removed.slot_name {
            self.slots.release(slot_name);
            self.metrics.increment_slots_released();
        }

        let id = node_id.to_string();
        Logger::info(
            "NODE_DEREGISTERED",
            &[("node", id.as_str()), ("address", removed.address.as_str())],
        );
        Ok(())
    }

    /// Look up one node by id.
    pub async fn node(&self, node_id: NodeId) -> Option<Node> {
        self.registry
            .read()
            .await
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
    }

    /// Current routing snapshot.
    pub fn routing(&self) -> Arc<RoutingState> {
        self.routing_rx.borrow().clone()
    }

    /// The whole topology as one consistent view.
    pub async fn current_topology(&self) -> TopologyView {
        let nodes = self.registry.read().await.clone();
        TopologyView {
            nodes,
            routing: (**self.routing_rx.borrow()).clone(),
            standings: (**self.standings_rx.borrow()).clone(),
            slots: self.slots.snapshot(),
        }
    }

    /// Run a bootstrap for a registered replica.
    ///
    /// Bootstrap is destructive, so the node is quarantined first: it is
    /// marked `Provisioning` and the call waits for routing to publish a
    /// snapshot that excludes it before the engine is touched. A replica
    /// that is currently serving reads therefore drains out of routing
    /// before its data directory is wiped.
    ///
    /// On success the node is marked `Standby`; the routing pool still has
    /// to observe it healthy for `rise` cycles before it receives traffic.
    pub async fn trigger_bootstrap(&self, node_id: NodeId) -> ControllerResult<BootstrapJob> {
        let node = self
            .node(node_id)
            .await
            .ok_or(ControllerError::UnknownNode(node_id))?;
        if !node.is_declared_replica() {
            return Err(ControllerError::NotAReplica(node_id));
        }

        let previous_state = self.mark_state(node_id, NodeState::Provisioning).await;
        if let Err(err) = self.await_quarantine(node_id).await {
            let _ = self
                .mark_state(node_id, previous_state.unwrap_or_default())
                .await;
            return Err(err);
        }

        let result = self
            .bootstrapper
            .bootstrap(&node, &self.primary_address)
            .await;

        match &result {
            Ok(_) => {
                let _ = self.mark_state(node_id, NodeState::Standby).await;
            }
            // A concurrent attempt already owns the node; its quarantine
            // must stay in place.
            Err(BootstrapError::AlreadyInProgress(_)) => {}
            Err(_) => {
                let _ = self.mark_state(node_id, NodeState::Unknown).await;
            }
        }
        Ok(result?)
    }

    /// Record a state on the node, returning the state it replaced.
    async fn mark_state(&self, node_id: NodeId, state: NodeState) -> Option<NodeState> {
        let mut registry = self.registry.write().await;
        let node = registry.iter_mut().find(|n| n.id == node_id)?;
        let previous = node.state;
        node.observe_state(state);
        Some(previous)
    }

    /// Wait until the published routing snapshot no longer carries the node.
    ///
    /// Returns immediately when the node is not routed; otherwise the next
    /// polling cycle sees `Provisioning` and drops it.
    async fn await_quarantine(&self, node_id: NodeId) -> ControllerResult<()> {
        let mut routing_rx = self.routing_rx.clone();
        let settled = tokio::time::timeout(
            QUARANTINE_SETTLE_LIMIT,
            routing_rx.wait_for(|state| !state.contains(node_id)),
        )
        .await;
        match settled {
            Ok(Ok(_)) => Ok(()),
            _ => Err(ControllerError::QuarantineStalled(node_id)),
        }
    }

    /// True while a bootstrap is running for the node.
    pub fn bootstrap_in_flight(&self, node_id: NodeId) -> bool {
        self.bootstrapper.is_in_flight(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::provisioner::LocalProvisioner;
    use crate::config::ControllerConfig;
    use crate::probe::{ObservedRole, ProbeResult};
    use crate::routing::RoutingPool;
    use crate::slots::SlotState;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    /// Probe backed by the local provisioner's filesystem, as in the
    /// bootstrapper tests.
    struct FilesystemProbe {
        provisioner: LocalProvisioner,
    }

    impl RoleProbe for FilesystemProbe {
        async fn probe(&self, node: &Node) -> ProbeResult {
            if self.provisioner.is_running(node) {
                ProbeResult::observed(node.id, ObservedRole::Replica)
            } else {
                ProbeResult::unreachable(node.id)
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        provisioner: LocalProvisioner,
        controller: Arc<TopologyController<LocalProvisioner, FilesystemProbe>>,
        slots: Arc<SlotManager>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let primary_data = dir.path().join("primary");
        std::fs::create_dir_all(&primary_data).unwrap();
        std::fs::write(primary_data.join("segment_0"), b"rows").unwrap();
        let provisioner = LocalProvisioner::new(dir.path().join("replicas"), primary_data);

        let config = ControllerConfig::new("10.0.1.1:5432", vec![]);
        let registry: SharedRegistry = Arc::new(RwLock::new(Vec::new()));
        let slots = Arc::new(SlotManager::new());
        let metrics = Arc::new(MetricsRegistry::new());

        let bootstrapper = ReplicaBootstrapper::new(
            provisioner.clone(),
            FilesystemProbe {
                provisioner: provisioner.clone(),
            },
            Arc::clone(&slots),
            &config,
            Arc::clone(&metrics),
        )
        .with_confirmation_interval(Duration::from_millis(5));

        // The pool is only needed for its watch channels here; cycles are
        // never driven in these tests.
        let pool = RoutingPool::new(
            FilesystemProbe {
                provisioner: provisioner.clone(),
            },
            Arc::clone(&registry),
            &config,
            Arc::clone(&metrics),
        );

        let controller = Arc::new(TopologyController::new(
            registry,
            Arc::clone(&slots),
            bootstrapper,
            pool.subscribe_routing(),
            pool.subscribe_standings(),
            metrics,
            "10.0.1.1:5432",
        ));
        Harness {
            _dir: dir,
            provisioner,
            controller,
            slots,
        }
    }

    #[tokio::test]
    async fn test_seed_registers_primary_and_replicas() {
        let h = harness();
        let ids = h
            .controller
            .seed(&["10.0.1.2:5432".to_string(), "10.0.1.3:5432".to_string()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let view = h.controller.current_topology().await;
        assert_eq!(view.nodes.len(), 3);
        assert_eq!(view.nodes[0].declared_role, DeclaredRole::Primary);
        assert!(view.nodes[0].slot_name.is_none());
        assert_eq!(view.nodes[1].slot_name.as_deref(), Some("replica_1_slot"));
        assert_eq!(view.nodes[2].slot_name.as_deref(), Some("replica_2_slot"));
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let h = harness();
        h.controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        let err = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::DuplicateAddress(_)));
    }

    #[tokio::test]
    async fn test_ordinals_never_reused() {
        let h = harness();
        let first = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        h.controller.remove_node(first).await.unwrap();

        // A new node after a removal gets a fresh ordinal, not the freed one
        let second = h
            .controller
            .add_node("10.0.1.3:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        let node = h.controller.node(second).await.unwrap();
        assert_eq!(node.slot_name.as_deref(), Some("replica_2_slot"));
    }

    #[tokio::test]
    async fn test_remove_releases_slot() {
        let h = harness();
        let id = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        h.slots.reserve("replica_1_slot", id).unwrap();

        h.controller.remove_node(id).await.unwrap();
        assert!(h.controller.node(id).await.is_none());
        assert_eq!(
            h.slots.slot("replica_1_slot").unwrap().state,
            SlotState::Free
        );
    }

    #[tokio::test]
    async fn test_remove_unknown_node() {
        let h = harness();
        let err = h.controller.remove_node(NodeId::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_declared_primary() {
        let h = harness();
        let id = h
            .controller
            .add_node("10.0.1.1:5432".to_string(), DeclaredRole::Primary)
            .await
            .unwrap();
        let err = h.controller.trigger_bootstrap(id).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotAReplica(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_marks_node_standby() {
        let h = harness();
        let id = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        let node = h.controller.node(id).await.unwrap();

        // Report streaming once the engine comes up
        let provisioner = h.provisioner.clone();
        let reporter = tokio::spawn(async move {
            for _ in 0..500 {
                if provisioner.is_running(&node) {
                    std::fs::write(provisioner.node_dir(&node).join("stream_state"), "streaming")
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let job = h.controller.trigger_bootstrap(id).await.unwrap();
        reporter.await.unwrap();
        assert_eq!(job.phase, crate::bootstrap::BootstrapPhase::Done);
        assert_eq!(
            h.controller.node(id).await.unwrap().state,
            NodeState::Standby
        );
        assert_eq!(
            h.slots.slot("replica_1_slot").unwrap().state,
            SlotState::Active
        );
    }

    /// A replica that is currently serving reads must leave routing before
    /// its engine is stopped and its data wiped: the bootstrap holds at the
    /// quarantine barrier until a snapshot without the node is published.
    #[tokio::test]
    async fn test_bootstrap_quarantines_routed_replica_before_wipe() {
        let dir = TempDir::new().unwrap();
        let primary_data = dir.path().join("primary");
        std::fs::create_dir_all(&primary_data).unwrap();
        std::fs::write(primary_data.join("segment_0"), b"rows").unwrap();
        let provisioner = LocalProvisioner::new(dir.path().join("replicas"), primary_data);

        let config = ControllerConfig::new("10.0.1.1:5432", vec![]);
        let registry: SharedRegistry = Arc::new(RwLock::new(Vec::new()));
        let slots = Arc::new(SlotManager::new());
        let metrics = Arc::new(MetricsRegistry::new());

        let bootstrapper = ReplicaBootstrapper::new(
            provisioner.clone(),
            FilesystemProbe {
                provisioner: provisioner.clone(),
            },
            Arc::clone(&slots),
            &config,
            Arc::clone(&metrics),
        )
        .with_confirmation_interval(Duration::from_millis(5));

        let mut pool = RoutingPool::new(
            FilesystemProbe {
                provisioner: provisioner.clone(),
            },
            Arc::clone(&registry),
            &config,
            Arc::clone(&metrics),
        );

        let controller = Arc::new(TopologyController::new(
            registry,
            slots,
            bootstrapper,
            pool.subscribe_routing(),
            pool.subscribe_standings(),
            metrics,
            "10.0.1.1:5432",
        ));

        let id = controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        let node = controller.node(id).await.unwrap();

        // A previously bootstrapped replica: engine running, stale data on disk
        let node_dir = provisioner.node_dir(&node);
        std::fs::create_dir_all(node_dir.join("data")).unwrap();
        std::fs::write(node_dir.join("data").join("stale_segment"), b"old rows").unwrap();
        std::fs::write(node_dir.join("running"), b"").unwrap();

        // rise = 2: the replica enters read routing
        pool.poll_once().await;
        pool.poll_once().await;
        assert!(controller.routing().contains(id));

        // Confirm streaming once the stale data is gone and the engine is
        // back up. The stop window between stop_engine and start_engine is
        // sub-millisecond, so key on the durable post-wipe state instead.
        let reporter = {
            let provisioner = provisioner.clone();
            let node = node.clone();
            tokio::spawn(async move {
                let stale = provisioner
                    .node_dir(&node)
                    .join("data")
                    .join("stale_segment");
                for _ in 0..500 {
                    if !stale.exists() && provisioner.is_running(&node) {
                        std::fs::write(
                            provisioner.node_dir(&node).join("stream_state"),
                            "streaming",
                        )
                        .unwrap();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
        };

        let trigger = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.trigger_bootstrap(id).await })
        };

        // The node is marked Provisioning, but nothing is touched while
        // routing still lists it
        let mut provisioning = false;
        for _ in 0..500 {
            if controller.node(id).await.unwrap().state == NodeState::Provisioning {
                provisioning = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(provisioning);
        assert!(node_dir.join("data").join("stale_segment").exists());
        assert!(controller.routing().contains(id));

        // The next cycle quarantines the node; only then may the wipe run
        pool.poll_once().await;
        assert!(!controller.routing().contains(id));

        let job = trigger.await.unwrap().unwrap();
        reporter.await.unwrap();
        assert_eq!(job.phase, crate::bootstrap::BootstrapPhase::Done);
        assert!(!node_dir.join("data").join("stale_segment").exists());
        assert!(node_dir.join("data").join("segment_0").exists());

        // The rebuilt replica re-proves itself over rise cycles
        assert_eq!(
            controller.node(id).await.unwrap().state,
            NodeState::Standby
        );
        pool.poll_once().await;
        assert!(!controller.routing().contains(id));
        pool.poll_once().await;
        assert!(controller.routing().contains(id));
    }

    /// Removing a node mid-bootstrap would release the slot the running job
    /// still holds; the controller refuses until the job ends.
    #[tokio::test]
    async fn test_remove_rejected_while_bootstrap_in_flight() {
        let h = harness();
        let id = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();

        // No stream reporter: the attempt lingers in confirmation retries
        let trigger = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.trigger_bootstrap(id).await })
        };

        let mut in_flight = false;
        for _ in 0..500 {
            if h.controller.bootstrap_in_flight(id) {
                in_flight = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(in_flight);

        let err = h.controller.remove_node(id).await.unwrap_err();
        assert!(matches!(err, ControllerError::BootstrapInFlight(_)));
        assert!(h.controller.node(id).await.is_some());

        // The attempt ends (confirmation exhausted); removal then succeeds
        assert!(trigger.await.unwrap().is_err());
        h.controller.remove_node(id).await.unwrap();
        assert!(h.controller.node(id).await.is_none());
        assert_eq!(
            h.slots.slot("replica_1_slot").unwrap().state,
            SlotState::Free
        );
    }

    #[tokio::test]
    async fn test_topology_view_includes_slots() {
        let h = harness();
        let id = h
            .controller
            .add_node("10.0.1.2:5432".to_string(), DeclaredRole::Replica)
            .await
            .unwrap();
        h.slots.reserve("replica_1_slot", id).unwrap();

        let view = h.controller.current_topology().await;
        assert_eq!(view.slots.len(), 1);
        assert_eq!(view.slots[0].bound_node, Some(id));
        assert!(view.routing.write_target.is_none());
    }
}
