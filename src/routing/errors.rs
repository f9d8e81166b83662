//! Routing error types
//!
//! Per ROUTING_MODEL.md §7:
//! - A missing write target is a routing state, not a crash; the write path
//!   surfaces it as a retryable error distinguishable from query failures
//! - Transient probe failures never surface here at all; hysteresis absorbs
//!   them into routing state

use thiserror::Error;

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Routing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No node currently holds confirmed write authority.
    ///
    /// Raised both when zero nodes report primary and when more than one
    /// does; the caller cannot distinguish the two, and must not try.
    #[error("no primary available (writes fail closed)")]
    NoPrimary,

    /// No replica is currently up to serve reads
    #[error("no replica available")]
    NoReplicas,

    /// The requested node is not registered
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Forwarding a connection to a chosen backend failed
    #[error("backend connection failed: {0}")]
    BackendUnreachable(String),
}

impl RoutingError {
    /// True if the caller may safely retry the same operation later.
    ///
    /// Absence of targets is always retryable: routing state changes as
    /// probes come in. An unknown node is an operator mistake and is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoutingError::NoPrimary | RoutingError::NoReplicas | RoutingError::BackendUnreachable(_)
        )
    }
}
