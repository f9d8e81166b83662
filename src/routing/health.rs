//! Per-node fall/rise hysteresis
//!
//! Per ROUTING_MODEL.md §3:
//! - A node transitions up -> down after `fall` consecutive unhealthy probes
//! - A node transitions down -> up after `rise` consecutive healthy probes
//!   of one consistent role
//! - Fewer consecutive observations must never cause a flip
//!
//! A new node starts down: it receives no traffic until it has proven a role
//! `rise` times in a row. While a node is up, a healthy probe reporting a
//! *different* role than the one it came up with counts as a failure — the
//! node must fall and re-rise under its new role. This is what makes manual
//! promotion converge without any special-case path.

use crate::probe::{ObservedRole, ProbeResult};

/// A hysteresis state change produced by one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Node crossed the rise threshold and is now routed as this role
    WentUp(ObservedRole),
    /// Node crossed the fall threshold and is no longer routed
    WentDown,
}

/// Consecutive-observation tracker for one node.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    fall: u32,
    rise: u32,

    /// Whether the node currently receives traffic
    up: bool,

    /// Role confirmed at the last rise; None while down
    routed_role: Option<ObservedRole>,

    /// Consecutive failures while up
    failures: u32,

    /// Role of the current success streak while down
    streak_role: Option<ObservedRole>,

    /// Consecutive role-consistent successes while down
    successes: u32,
}

impl HealthTracker {
    /// Create a tracker in the down state.
    pub fn new(fall: u32, rise: u32) -> Self {
        Self {
            fall,
            rise,
            up: false,
            routed_role: None,
            failures: 0,
            streak_role: None,
            successes: 0,
        }
    }

    /// Whether the node is currently up.
    pub fn is_up(&self) -> bool {
        self.up
    }

    /// The role the node is routed as, if it is up.
    pub fn routed_role(&self) -> Option<ObservedRole> {
        self.routed_role
    }

    /// Consecutive failures observed while up (for introspection).
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Consecutive successes observed while down (for introspection).
    pub fn consecutive_successes(&self) -> u32 {
        self.successes
    }

    /// Feed one probe result; returns a transition if a threshold was crossed.
    pub fn observe(&mut self, result: &ProbeResult) -> Option<Transition> {
        if self.up {
            self.observe_while_up(result)
        } else {
            self.observe_while_down(result)
        }
    }

    fn observe_while_up(&mut self, result: &ProbeResult) -> Option<Transition> {
        let role_held = self
            .routed_role
            .map(|role| result.is_healthy_as(role))
            .unwrap_or(false);

        if role_held {
            self.failures = 0;
            return None;
        }

        self.failures += 1;
        if self.failures < self.fall {
            return None;
        }

        self.up = false;
        self.routed_role = None;
        self.failures = 0;
        self.successes = 0;
        self.streak_role = None;
        Some(Transition::WentDown)
    }

    fn observe_while_down(&mut self, result: &ProbeResult) -> Option<Transition> {
        if !result.healthy || result.observed_role == ObservedRole::Unknown {
            self.successes = 0;
            self.streak_role = None;
            return None;
        }

        // A role change restarts the streak: rise demands `rise` consecutive
        // observations of one consistent role.
        if self.streak_role != Some(result.observed_role) {
            self.streak_role = Some(result.observed_role);
            self.successes = 0;
        }
        self.successes += 1;

        if self.successes < self.rise {
            return None;
        }

        self.up = true;
        self.routed_role = self.streak_role;
        self.failures = 0;
        self.successes = 0;
        Some(Transition::WentUp(result.observed_role))
    }
}
