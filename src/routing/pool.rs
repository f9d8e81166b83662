//! The polling pool
//!
//! Per ROUTING_MODEL.md §3:
//! - Every registered node is probed once per cycle, concurrently, so one
//!   slow node never delays results for the rest (each probe carries its own
//!   timeout)
//! - Routing is recomputed after the full cycle, never after an individual
//!   probe, to avoid oscillation from partial information
//! - Snapshots are published through a watch channel; subscribers always see
//!   a complete state from a single cycle

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::config::ControllerConfig;
use crate::node::{Node, NodeId, NodeState};
use crate::observability::{Logger, MetricsRegistry};
use crate::probe::{ObservedRole, RoleProbe};

use super::health::{HealthTracker, Transition};
use super::state::{NodeObservation, RoutingState};

/// The node registry, shared between the controller (sole mutator of
/// membership) and the pool (reads membership, updates observed state).
pub type SharedRegistry = Arc<RwLock<Vec<Node>>>;

/// One node's standing as seen by the pool, for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStanding {
    pub node_id: NodeId,
    pub address: String,
    pub declared_role: crate::node::DeclaredRole,
    pub state: NodeState,
    pub up: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Fixed-interval polling pool.
///
/// Owns the hysteresis trackers; publishes routing snapshots and per-node
/// standings after every cycle.
pub struct RoutingPool<P: RoleProbe> {
    probe: P,
    registry: SharedRegistry,
    trackers: HashMap<NodeId, HealthTracker>,
    fall: u32,
    rise: u32,
    interval: Duration,
    cycle: u64,
    routing_tx: watch::Sender<Arc<RoutingState>>,
    standings_tx: watch::Sender<Arc<Vec<NodeStanding>>>,
    metrics: Arc<MetricsRegistry>,
}

impl<P: RoleProbe> RoutingPool<P> {
    /// Create a pool over a shared registry.
    ///
    /// Nothing is routed until the first cycle completes; the initial
    /// published snapshot is empty.
    pub fn new(
        probe: P,
        registry: SharedRegistry,
        config: &ControllerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (routing_tx, _) = watch::channel(Arc::new(RoutingState::empty()));
        let (standings_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            probe,
            registry,
            trackers: HashMap::new(),
            fall: config.fall,
            rise: config.rise,
            interval: config.poll_interval(),
            cycle: 0,
            routing_tx,
            standings_tx,
            metrics,
        }
    }

    /// Subscribe to routing snapshots.
    pub fn subscribe_routing(&self) -> watch::Receiver<Arc<RoutingState>> {
        self.routing_tx.subscribe()
    }

    /// Subscribe to per-node standings.
    pub fn subscribe_standings(&self) -> watch::Receiver<Arc<Vec<NodeStanding>>> {
        self.standings_tx.subscribe()
    }

    /// Run the polling loop for the lifetime of the controller.
    ///
    /// There is no cancellation beyond per-probe timeouts; the loop ends
    /// when the task owning it is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Execute one full polling cycle: probe every node, feed the trackers,
    /// recompute routing, publish.
    ///
    /// Public so tests can drive cycles deterministically.
    pub async fn poll_once(&mut self) {
        let nodes: Vec<Node> = self.registry.read().await.clone();

        // Membership changed under us: drop trackers for removed nodes so a
        // re-added node starts down again, and seed trackers for new ones.
        self.trackers
            .retain(|id, _| nodes.iter().any(|n| n.id == *id));
        for node in &nodes {
            self.trackers
                .entry(node.id)
                .or_insert_with(|| HealthTracker::new(self.fall, self.rise));
        }

        // Provisioning nodes are not probed: a bootstrap owns them, and their
        // engine may be stopped or mid-wipe. They are quarantined below.
        let probe = &self.probe;
        let results = join_all(nodes.iter().map(|node| async move {
            if node.state == NodeState::Provisioning {
                None
            } else {
                Some(probe.probe(node).await)
            }
        }))
        .await;

        let mut state_updates: Vec<(NodeId, NodeState)> = Vec::new();
        for (node, result) in nodes.iter().zip(results.iter()) {
            let Some(tracker) = self.trackers.get_mut(&node.id) else {
                continue;
            };

            let Some(result) = result else {
                // Quarantine takes effect this cycle, not after `fall`
                // failures; the tracker resets so the node must re-prove
                // itself once the bootstrap releases it.
                if tracker.is_up() {
                    self.metrics.increment_transitions_down();
                    let node_id = node.id.to_string();
                    Logger::warn(
                        "NODE_QUARANTINED",
                        &[
                            ("node", node_id.as_str()),
                            ("address", node.address.as_str()),
                        ],
                    );
                }
                *tracker = HealthTracker::new(self.fall, self.rise);
                continue;
            };

            self.metrics.increment_probes();
            if !result.healthy {
                self.metrics.increment_probe_failures();
            }

            match tracker.observe(result) {
                Some(Transition::WentUp(role)) => {
                    self.metrics.increment_transitions_up();
                    let node_id = node.id.to_string();
                    Logger::info(
                        "NODE_UP",
                        &[
                            ("node", node_id.as_str()),
                            ("address", node.address.as_str()),
                            ("role", role.as_str()),
                        ],
                    );
                    state_updates.push((node.id, confirmed_state(role)));
                }
                Some(Transition::WentDown) => {
                    self.metrics.increment_transitions_down();
                    let node_id = node.id.to_string();
                    Logger::warn(
                        "NODE_DOWN",
                        &[
                            ("node", node_id.as_str()),
                            ("address", node.address.as_str()),
                        ],
                    );
                    state_updates.push((node.id, NodeState::Unknown));
                }
                None => {}
            }
        }

        // Node state transitions driven by probe observations.
        if !state_updates.is_empty() {
            let mut registry = self.registry.write().await;
            for (node_id, state) in state_updates {
                if let Some(node) = registry.iter_mut().find(|n| n.id == node_id) {
                    node.observe_state(state);
                }
            }
        }

        self.cycle += 1;
        let observations: Vec<NodeObservation> = nodes
            .iter()
            .map(|node| {
                let tracker = &self.trackers[&node.id];
                NodeObservation {
                    node_id: node.id,
                    address: node.address.clone(),
                    up: tracker.is_up(),
                    role: tracker.routed_role(),
                }
            })
            .collect();

        let state = RoutingState::recompute(self.cycle, &observations);
        self.metrics.increment_routing_recomputations();
        if state.write_target.is_none() {
            self.metrics.increment_cycles_without_primary();
        }

        Logger::routing_cycle(
            self.cycle,
            state.write_target.as_ref().map(|t| t.address.as_str()),
            state.read_targets.len(),
        );

        let standings: Vec<NodeStanding> = nodes
            .iter()
            .map(|node| {
                let tracker = &self.trackers[&node.id];
                NodeStanding {
                    node_id: node.id,
                    address: node.address.clone(),
                    declared_role: node.declared_role,
                    state: node.state,
                    up: tracker.is_up(),
                    consecutive_failures: tracker.consecutive_failures(),
                    consecutive_successes: tracker.consecutive_successes(),
                }
            })
            .collect();

        self.routing_tx.send_replace(Arc::new(state));
        self.standings_tx.send_replace(Arc::new(standings));
    }
}

fn confirmed_state(role: ObservedRole) -> NodeState {
    match role {
        ObservedRole::Primary => NodeState::Primary,
        ObservedRole::Replica => NodeState::Standby,
        ObservedRole::Unknown => NodeState::Unknown,
    }
}
