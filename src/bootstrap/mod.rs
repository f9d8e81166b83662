//! Replica bootstrap
//!
//! Per BOOTSTRAP_MODEL.md:
//! - Bootstrap attaches a new or reset node to the primary's replication
//!   stream, bound to a uniquely-owned slot
//! - Every phase is idempotent with respect to re-entry; a failed attempt
//!   may be retried from the beginning
//! - Bootstrap is destructive: the target's local data state is wiped in
//!   Preparing, which is exactly what makes re-entry safe
//! - A node is handed to routing only after live streaming is confirmed

pub mod bootstrapper;
pub mod errors;
pub mod job;
pub mod provisioner;

pub use bootstrapper::ReplicaBootstrapper;
pub use errors::{BootstrapError, BootstrapResult};
pub use job::{BootstrapJob, BootstrapPhase};
pub use provisioner::{
    LocalProvisioner, ProvisionError, ProvisionResult, ReplicaProvisioner, StandbySettings,
    StreamState,
};
