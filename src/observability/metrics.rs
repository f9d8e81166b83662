//! Metrics registry for helmsman
//!
//! Per OBSERVABILITY.md:
//! - Counters only (no gauges, no histograms)
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe but lock-minimal
//!
//! The registry is shared between the polling loop, the proxies, and the
//! bootstrap orchestrator; the HTTP introspection endpoint renders a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics registry containing all control-plane counters
///
/// # Thread Safety
///
/// All counters use atomic operations for thread-safe increments.
/// Uses Relaxed ordering for minimal overhead (eventual consistency is fine
/// for metrics).
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Total role probes issued
    probes_total: AtomicU64,
    /// Probes that failed or timed out
    probe_failures: AtomicU64,
    /// Node up -> down transitions
    transitions_down: AtomicU64,
    /// Node down -> up transitions
    transitions_up: AtomicU64,
    /// Routing state recomputations (one per full polling cycle)
    routing_recomputations: AtomicU64,
    /// Polling cycles that produced no write target
    cycles_without_primary: AtomicU64,
    /// Write connections forwarded to the primary
    writes_dispatched: AtomicU64,
    /// Write connections refused (no write target)
    writes_rejected: AtomicU64,
    /// Read connections forwarded to a replica
    reads_dispatched: AtomicU64,
    /// Read connections refused (no read targets)
    reads_rejected: AtomicU64,
    /// Bootstrap jobs started
    bootstraps_started: AtomicU64,
    /// Bootstrap jobs completed (Done)
    bootstraps_completed: AtomicU64,
    /// Bootstrap jobs failed
    bootstraps_failed: AtomicU64,
    /// Replication slots reserved
    slots_reserved: AtomicU64,
    /// Replication slots released
    slots_released: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Probe metrics

    /// Increment probes issued
    pub fn increment_probes(&self) {
        self.probes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment failed probes
    pub fn increment_probe_failures(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Routing metrics

    /// Increment up -> down transitions
    pub fn increment_transitions_down(&self) {
        self.transitions_down.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment down -> up transitions
    pub fn increment_transitions_up(&self) {
        self.transitions_up.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment routing recomputations
    pub fn increment_routing_recomputations(&self) {
        self.routing_recomputations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cycles that ended with no write target
    pub fn increment_cycles_without_primary(&self) {
        self.cycles_without_primary.fetch_add(1, Ordering::Relaxed);
    }

    // Dispatch metrics

    /// Increment writes forwarded
    pub fn increment_writes_dispatched(&self) {
        self.writes_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment writes refused
    pub fn increment_writes_rejected(&self) {
        self.writes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment reads forwarded
    pub fn increment_reads_dispatched(&self) {
        self.reads_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment reads refused
    pub fn increment_reads_rejected(&self) {
        self.reads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Bootstrap metrics

    /// Increment bootstrap jobs started
    pub fn increment_bootstraps_started(&self) {
        self.bootstraps_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment bootstrap jobs completed
    pub fn increment_bootstraps_completed(&self) {
        self.bootstraps_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment bootstrap jobs failed
    pub fn increment_bootstraps_failed(&self) {
        self.bootstraps_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Slot metrics

    /// Increment slots reserved
    pub fn increment_slots_reserved(&self) {
        self.slots_reserved.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment slots released
    pub fn increment_slots_released(&self) {
        self.slots_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probes_total: self.probes_total.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            transitions_down: self.transitions_down.load(Ordering::Relaxed),
            transitions_up: self.transitions_up.load(Ordering::Relaxed),
            routing_recomputations: self.routing_recomputations.load(Ordering::Relaxed),
            cycles_without_primary: self.cycles_without_primary.load(Ordering::Relaxed),
            writes_dispatched: self.writes_dispatched.load(Ordering::Relaxed),
            writes_rejected: self.writes_rejected.load(Ordering::Relaxed),
            reads_dispatched: self.reads_dispatched.load(Ordering::Relaxed),
            reads_rejected: self.reads_rejected.load(Ordering::Relaxed),
            bootstraps_started: self.bootstraps_started.load(Ordering::Relaxed),
            bootstraps_completed: self.bootstraps_completed.load(Ordering::Relaxed),
            bootstraps_failed: self.bootstraps_failed.load(Ordering::Relaxed),
            slots_reserved: self.slots_reserved.load(Ordering::Relaxed),
            slots_released: self.slots_released.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub probes_total: u64,
    pub probe_failures: u64,
    pub transitions_down: u64,
    pub transitions_up: u64,
    pub routing_recomputations: u64,
    pub cycles_without_primary: u64,
    pub writes_dispatched: u64,
    pub writes_rejected: u64,
    pub reads_dispatched: u64,
    pub reads_rejected: u64,
    pub bootstraps_started: u64,
    pub bootstraps_completed: u64,
    pub bootstraps_failed: u64,
    pub slots_reserved: u64,
    pub slots_released: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let registry = MetricsRegistry::new();
        let snapshot = registry.snapshot();

        assert_eq!(snapshot.probes_total, 0);
        assert_eq!(snapshot.writes_rejected, 0);
        assert_eq!(snapshot.bootstraps_started, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_probes();
        registry.increment_probes();
        registry.increment_probe_failures();
        registry.increment_transitions_down();
        registry.increment_transitions_up();
        registry.increment_routing_recomputations();
        registry.increment_cycles_without_primary();
        registry.increment_writes_dispatched();
        registry.increment_writes_rejected();
        registry.increment_reads_dispatched();
        registry.increment_reads_rejected();
        registry.increment_bootstraps_started();
        registry.increment_bootstraps_completed();
        registry.increment_bootstraps_failed();
        registry.increment_slots_reserved();
        registry.increment_slots_released();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.probes_total, 2);
        assert_eq!(snapshot.probe_failures, 1);
        assert_eq!(snapshot.transitions_down, 1);
        assert_eq!(snapshot.transitions_up, 1);
        assert_eq!(snapshot.routing_recomputations, 1);
        assert_eq!(snapshot.cycles_without_primary, 1);
        assert_eq!(snapshot.writes_dispatched, 1);
        assert_eq!(snapshot.writes_rejected, 1);
        assert_eq!(snapshot.reads_dispatched, 1);
        assert_eq!(snapshot.reads_rejected, 1);
        assert_eq!(snapshot.bootstraps_started, 1);
        assert_eq!(snapshot.bootstraps_completed, 1);
        assert_eq!(snapshot.bootstraps_failed, 1);
        assert_eq!(snapshot.slots_reserved, 1);
        assert_eq!(snapshot.slots_released, 1);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_probes();
        registry.increment_writes_rejected();

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["probes_total"], 1);
        assert_eq!(parsed["writes_rejected"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = vec![];

        // Spawn multiple threads incrementing counters
        for _ in 0..10 {
            let reg = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    reg.increment_probes();
                    reg.increment_reads_dispatched();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.probes_total, 1000);
        assert_eq!(snapshot.reads_dispatched, 1000);
    }

    #[test]
    fn test_monotonic_increase() {
        let registry = MetricsRegistry::new();

        let mut prev = registry.snapshot().probes_total;
        for _ in 0..10 {
            registry.increment_probes();
            let current = registry.snapshot().probes_total;
            assert!(current >= prev);
            prev = current;
        }
    }
}
