//! Replication slot management
//!
//! Per BOOTSTRAP_MODEL.md §2:
//! - A slot name maps to at most one bound node at any time
//! - Reservation and binding are a single atomic transition per slot
//! - Slot names are deterministic per replica ordinal, so slot identity
//!   survives process restarts and bootstrap re-runs are idempotent
//!
//! The slot table is the in-controller view of the primary's replication
//! slots; the bootstrapper is the only caller that turns these bindings into
//! engine state.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use crate::node::NodeId;

/// Result type for slot operations
pub type SlotResult<T> = Result<T, SlotError>;

/// Slot errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// The slot is reserved or active for a different node.
    ///
    /// Fatal to the requesting bootstrap attempt; other slots are unaffected.
    #[error("slot conflict: {name} is held by another node")]
    Conflict { name: String },

    /// The named slot does not exist
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    /// The slot exists but is not bound to the requesting node
    #[error("slot {name} is not bound to the requesting node")]
    NotBoundToNode { name: String },
}

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// Known but unbound (after release)
    Free,
    /// Bound to a node whose bootstrap has not yet confirmed streaming
    Reserved,
    /// Bound to a node confirmed streaming
    Active,
}

/// A replication slot binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationSlot {
    pub name: String,
    pub bound_node: Option<NodeId>,
    pub state: SlotState,
}

/// Deterministic slot name for a replica ordinal.
///
/// Ordinals are assigned once per node at registration, so retrying a
/// bootstrap reuses the same name.
pub fn slot_name_for_ordinal(ordinal: u32) -> String {
    format!("replica_{}_slot", ordinal)
}

/// Owner of all slot bindings.
///
/// One mutex over the whole table: slot transitions are rare (bootstrap and
/// deregistration only) and atomicity is what matters, not throughput.
#[derive(Debug, Default)]
pub struct SlotManager {
    slots: Mutex<HashMap<String, ReplicationSlot>>,
}

impl SlotManager {
    /// Create an empty slot table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a node. Reservation and binding are one atomic
    /// transition: on success the slot is `Reserved` and bound to `node_id`.
    ///
    /// Re-reserving a slot already held by the same node succeeds and resets
    /// it to `Reserved` (bootstrap re-entry). A slot held by any other node
    /// fails with `Conflict`.
    pub fn reserve(&self, name: &str, node_id: NodeId) -> SlotResult<ReplicationSlot> {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        match slots.get_mut(name) {
            None => {
                let slot = ReplicationSlot {
                    name: name.to_string(),
                    bound_node: Some(node_id),
                    state: SlotState::Reserved,
                };
                slots.insert(name.to_string(), slot.clone());
                Ok(slot)
            }
            Some(slot) => match slot.bound_node {
                None => {
                    slot.bound_node = Some(node_id);
                    slot.state = SlotState::Reserved;
                    Ok(slot.clone())
                }
                Some(owner) if owner == node_id => {
                    slot.state = SlotState::Reserved;
                    Ok(slot.clone())
                }
                Some(_) => Err(SlotError::Conflict {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Mark a reserved slot active once its node is confirmed streaming.
    pub fn activate(&self, name: &str, node_id: NodeId) -> SlotResult<()> {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| SlotError::UnknownSlot(name.to_string()))?;
        if slot.bound_node != Some(node_id) {
            return Err(SlotError::NotBoundToNode {
                name: name.to_string(),
            });
        }
        slot.state = SlotState::Active;
        Ok(())
    }

    /// Release a slot: unbind it and return it to `Free`.
    ///
    /// Releasing an unknown slot is a no-op; release runs on failure paths
    /// where the reservation may never have happened.
    pub fn release(&self, name: &str) {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        if let Some(slot) = slots.get_mut(name) {
            slot.bound_node = None;
            slot.state = SlotState::Free;
        }
    }

    /// Look up one slot.
    pub fn slot(&self, name: &str) -> Option<ReplicationSlot> {
        let slots = self.slots.lock().expect("slot table poisoned");
        slots.get(name).cloned()
    }

    /// The slot bound to a node, if any.
    pub fn slot_for_node(&self, node_id: NodeId) -> Option<ReplicationSlot> {
        let slots = self.slots.lock().expect("slot table poisoned");
        slots
            .values()
            .find(|slot| slot.bound_node == Some(node_id))
            .cloned()
    }

    /// Snapshot of all slots (for introspection), sorted by name.
    pub fn snapshot(&self) -> Vec<ReplicationSlot> {
        let slots = self.slots.lock().expect("slot table poisoned");
        let mut all: Vec<_> = slots.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
