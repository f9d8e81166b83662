//! Bootstrap error types
//!
//! Per BOOTSTRAP_MODEL.md §5:
//! - Every failure is tagged with the phase it occurred in, so an operator
//!   can diagnose without replaying the whole sequence
//! - A failed attempt leaves the node unregistered and its slot released;
//!   retrying from Preparing is always safe

use thiserror::Error;

use crate::node::NodeId;
use crate::slots::SlotError;

use super::job::{BootstrapPhase, IllegalPhaseTransition};

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Bootstrap errors
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// A non-terminal job already exists for this node.
    ///
    /// Rejected immediately; the existing job and its slot are untouched.
    #[error("bootstrap already in progress for node {0}")]
    AlreadyInProgress(NodeId),

    /// The node has no slot ordinal assigned; it was never registered as a
    /// replica with the controller
    #[error("node {0} has no replication slot assigned")]
    NoSlotAssigned(NodeId),

    /// Slot reservation or activation failed
    #[error("bootstrap failed in phase {phase}: {source}")]
    Slot {
        phase: BootstrapPhase,
        #[source]
        source: SlotError,
    },

    /// An engine-side operation failed
    #[error("bootstrap failed in phase {phase}: {message}")]
    Provision {
        phase: BootstrapPhase,
        message: String,
    },

    /// The node never confirmed live streaming within the retry budget.
    ///
    /// Fatal: a half-attached node is never handed to routing.
    #[error("no streaming confirmation after {attempts} attempts")]
    ConfirmationExhausted { attempts: u32 },

    /// The overall bootstrap deadline elapsed
    #[error("bootstrap deadline exceeded in phase {phase}")]
    DeadlineExceeded { phase: BootstrapPhase },

    /// Internal state machine violation
    #[error(transparent)]
    IllegalTransition(#[from] IllegalPhaseTransition),
}

impl BootstrapError {
    /// The phase the attempt failed in.
    pub fn phase(&self) -> BootstrapPhase {
        match self {
            // Rejected before a job ever existed
            BootstrapError::AlreadyInProgress(_) | BootstrapError::NoSlotAssigned(_) => {
                BootstrapPhase::Preparing
            }
            BootstrapError::Slot { phase, .. } => *phase,
            BootstrapError::Provision { phase, .. } => *phase,
            BootstrapError::ConfirmationExhausted { .. } => BootstrapPhase::AwaitingConfirmation,
            BootstrapError::DeadlineExceeded { phase } => *phase,
            BootstrapError::IllegalTransition(t) => t.from,
        }
    }

    /// True if the caller may retry the bootstrap from Preparing.
    ///
    /// Everything except a concurrent attempt is retryable; a concurrent
    /// attempt means someone else is already retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BootstrapError::AlreadyInProgress(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_carry_their_phase() {
        let err = BootstrapError::Provision {
            phase: BootstrapPhase::Copying,
            message: "copy interrupted".to_string(),
        };
        assert_eq!(err.phase(), BootstrapPhase::Copying);

        let err = BootstrapError::ConfirmationExhausted { attempts: 30 };
        assert_eq!(err.phase(), BootstrapPhase::AwaitingConfirmation);
    }

    #[test]
    fn test_already_in_progress_not_retryable() {
        assert!(!BootstrapError::AlreadyInProgress(NodeId::new()).is_retryable());
        assert!(BootstrapError::ConfirmationExhausted { attempts: 3 }.is_retryable());
    }

    #[test]
    fn test_slot_conflict_surfaces_source() {
        let err = BootstrapError::Slot {
            phase: BootstrapPhase::Preparing,
            source: SlotError::Conflict {
                name: "replica_1_slot".to_string(),
            },
        };
        assert!(err.to_string().contains("preparing"));
        assert!(err.to_string().contains("replica_1_slot"));
    }
}
