//! Bootstrap job state machine
//!
//! Per BOOTSTRAP_MODEL.md §3, a job moves strictly forward:
//!
//! ```text
//! Preparing -> Copying -> AttachingToStream -> AwaitingConfirmation -> Done
//!     \___________\____________\_____________________\______________
//!                                                                   v
//!                                                                 Failed
//! ```
//!
//! A job exists only for the duration of one attempt and is discarded after
//! reaching a terminal phase. There is never more than one non-terminal job
//! per node; the bootstrapper enforces that.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::node::NodeId;

/// Phase of a bootstrap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BootstrapPhase {
    /// Reserving the slot, stopping the target engine, wiping local state
    Preparing,
    /// Streaming a full physical copy of the primary, bound to the slot
    Copying,
    /// Writing standby configuration referencing primary, slot, credentials
    AttachingToStream,
    /// Engine started; waiting for probe to confirm live streaming
    AwaitingConfirmation,
    /// Streaming confirmed; node is ready for routing
    Done,
    /// Attempt failed; slot released; safe to retry from Preparing
    Failed,
}

impl BootstrapPhase {
    /// Phase name for logs and errors.
    pub fn phase_name(&self) -> &'static str {
        match self {
            BootstrapPhase::Preparing => "preparing",
            BootstrapPhase::Copying => "copying",
            BootstrapPhase::AttachingToStream => "attaching_to_stream",
            BootstrapPhase::AwaitingConfirmation => "awaiting_confirmation",
            BootstrapPhase::Done => "done",
            BootstrapPhase::Failed => "failed",
        }
    }

    /// True for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Done | BootstrapPhase::Failed)
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_advance_to(&self, next: BootstrapPhase) -> bool {
        use BootstrapPhase::*;
        match (self, next) {
            // Forward edges
            (Preparing, Copying) => true,
            (Copying, AttachingToStream) => true,
            (AttachingToStream, AwaitingConfirmation) => true,
            (AwaitingConfirmation, Done) => true,
            // Any non-terminal phase may fail
            (phase, Failed) => !phase.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.phase_name())
    }
}

/// Attempted phase transition the state machine forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal bootstrap transition: {from} -> {to}")]
pub struct IllegalPhaseTransition {
    pub from: BootstrapPhase,
    pub to: BootstrapPhase,
}

/// One bootstrap attempt for one node.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapJob {
    pub node_id: NodeId,
    pub slot_name: String,
    pub phase: BootstrapPhase,
    pub started_at: DateTime<Utc>,
}

impl BootstrapJob {
    /// Start a job in `Preparing`.
    pub fn new(node_id: NodeId, slot_name: impl Into<String>) -> Self {
        Self {
            node_id,
            slot_name: slot_name.into(),
            phase: BootstrapPhase::Preparing,
            started_at: Utc::now(),
        }
    }

    /// Advance to the next phase, enforcing legal transitions.
    pub fn advance(&mut self, next: BootstrapPhase) -> Result<(), IllegalPhaseTransition> {
        if !self.phase.can_advance_to(next) {
            return Err(IllegalPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}
