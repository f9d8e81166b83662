//! Traffic dispatch
//!
//! Per ROUTING_MODEL.md §5:
//! - Writes go to the single write target, or are refused with a retryable
//!   error when none exists
//! - Reads pick the replica with the fewest outstanding connections; when
//!   connection counts are unavailable the dispatcher falls back to
//!   round-robin
//!
//! Outstanding-connection counts are maintained by the proxies through RAII
//! guards, so a dropped connection can never leak a count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::node::NodeId;

use super::errors::{RoutingError, RoutingResult};
use super::state::{NodeRef, RoutingState};

/// Outstanding-connection counters, one per backend node.
#[derive(Debug, Default)]
pub struct ConnectionCounts {
    counts: Mutex<HashMap<NodeId, Arc<AtomicUsize>>>,
}

impl ConnectionCounts {
    /// Create an empty counter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one connection opened to a node; the returned guard decrements
    /// the count when dropped.
    pub fn acquire(&self, node_id: NodeId) -> ConnectionGuard {
        let counter = {
            let mut counts = self.counts.lock().expect("connection counts poisoned");
            Arc::clone(counts.entry(node_id).or_default())
        };
        counter.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { counter }
    }

    /// Current outstanding connections to a node.
    pub fn outstanding(&self, node_id: NodeId) -> usize {
        let counts = self.counts.lock().expect("connection counts poisoned");
        counts
            .get(&node_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Counts for all known nodes (for introspection).
    pub fn snapshot(&self) -> HashMap<NodeId, usize> {
        let counts = self.counts.lock().expect("connection counts poisoned");
        counts
            .iter()
            .map(|(id, c)| (*id, c.load(Ordering::Relaxed)))
            .collect()
    }
}

/// RAII guard for one outstanding connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Read-path backend selection.
#[derive(Debug)]
pub struct ReadDispatcher {
    /// Connection counters; None means counts are unavailable and the
    /// dispatcher runs pure round-robin
    counts: Option<Arc<ConnectionCounts>>,

    /// Round-robin cursor, seeded randomly so restarts do not all hammer
    /// the first replica
    cursor: AtomicUsize,
}

impl ReadDispatcher {
    /// Dispatcher using least-outstanding-connections.
    pub fn with_counts(counts: Arc<ConnectionCounts>) -> Self {
        Self {
            counts: Some(counts),
            cursor: AtomicUsize::new(rand::thread_rng().gen()),
        }
    }

    /// Dispatcher without connection counts: round-robin only.
    pub fn round_robin() -> Self {
        Self {
            counts: None,
            cursor: AtomicUsize::new(rand::thread_rng().gen()),
        }
    }

    /// Pick a read backend from the current snapshot.
    pub fn pick_read(&self, state: &RoutingState) -> RoutingResult<NodeRef> {
        if state.read_targets.is_empty() {
            return Err(RoutingError::NoReplicas);
        }

        if let Some(counts) = &self.counts {
            // Least outstanding; ties resolved by first-seen so the choice
            // is deterministic for a given snapshot.
            let chosen = state
                .read_targets
                .iter()
                .min_by_key(|target| counts.outstanding(target.id))
                .cloned();
            if let Some(target) = chosen {
                return Ok(target);
            }
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % state.read_targets.len();
        Ok(state.read_targets[index].clone())
    }
}

/// Pick the write backend from the current snapshot.
///
/// Per ROUTING_MODEL.md §5.1: a missing write target is a retryable
/// refusal, not a crash.
pub fn pick_write(state: &RoutingState) -> RoutingResult<NodeRef> {
    state.write_target.clone().ok_or(RoutingError::NoPrimary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn target(address: &str) -> NodeRef {
        NodeRef {
            id: NodeId::new(),
            address: address.to_string(),
        }
    }

    fn state_with(write: Option<NodeRef>, reads: Vec<NodeRef>) -> RoutingState {
        RoutingState {
            write_target: write,
            read_targets: reads,
            cycle: 1,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_pick_write_with_target() {
        let primary = target("10.0.0.1:5432");
        let state = state_with(Some(primary.clone()), vec![]);
        assert_eq!(pick_write(&state).unwrap(), primary);
    }

    #[test]
    fn test_pick_write_fails_closed() {
        let state = state_with(None, vec![target("10.0.0.2:5432")]);
        let err = pick_write(&state).unwrap_err();
        assert_eq!(err, RoutingError::NoPrimary);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_pick_read_empty_set() {
        let dispatcher = ReadDispatcher::round_robin();
        let state = state_with(None, vec![]);
        assert_eq!(
            dispatcher.pick_read(&state).unwrap_err(),
            RoutingError::NoReplicas
        );
    }

    #[test]
    fn test_least_connections_prefers_idle_backend() {
        let counts = Arc::new(ConnectionCounts::new());
        let dispatcher = ReadDispatcher::with_counts(Arc::clone(&counts));

        let busy = target("10.0.0.2:5432");
        let idle = target("10.0.0.3:5432");
        let _guard_a = counts.acquire(busy.id);
        let _guard_b = counts.acquire(busy.id);

        let state = state_with(None, vec![busy.clone(), idle.clone()]);
        assert_eq!(dispatcher.pick_read(&state).unwrap(), idle);
    }

    #[test]
    fn test_guard_drop_releases_count() {
        let counts = ConnectionCounts::new();
        let id = NodeId::new();

        let guard = counts.acquire(id);
        assert_eq!(counts.outstanding(id), 1);
        drop(guard);
        assert_eq!(counts.outstanding(id), 0);
    }

    #[test]
    fn test_round_robin_covers_all_backends() {
        let dispatcher = ReadDispatcher::round_robin();
        let a = target("10.0.0.2:5432");
        let b = target("10.0.0.3:5432");
        let state = state_with(None, vec![a.clone(), b.clone()]);

        let first = dispatcher.pick_read(&state).unwrap();
        let second = dispatcher.pick_read(&state).unwrap();
        assert_ne!(first, second);

        // Third pick wraps around
        let third = dispatcher.pick_read(&state).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn test_counts_snapshot() {
        let counts = ConnectionCounts::new();
        let id = NodeId::new();
        let _guard = counts.acquire(id);

        let snapshot = counts.snapshot();
        assert_eq!(snapshot.get(&id), Some(&1));
    }
}
