//! Bootstrap orchestration
//!
//! Per BOOTSTRAP_MODEL.md §4:
//! - At most one non-terminal job per node; concurrent attempts are rejected
//!   before any engine or slot state is touched
//! - The whole attempt runs under one deadline; a deadline hit fails the job
//!   in whatever phase it reached
//! - Any failure releases the node's slot reservation, so a retry starts
//!   clean from `Preparing`
//! - Success requires two independent confirmations: the probe must observe
//!   a healthy replica AND the engine must report live streaming

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ControllerConfig;
use crate::node::{Node, NodeId};
use crate::observability::{Logger, MetricsRegistry};
use crate::probe::{ObservedRole, RoleProbe};
use crate::slots::SlotManager;

use super::errors::{BootstrapError, BootstrapResult};
use super::job::{BootstrapJob, BootstrapPhase};
use super::provisioner::{ReplicaProvisioner, StandbySettings, StreamState};

/// Drives the bootstrap phase sequence for one node at a time per node.
pub struct ReplicaBootstrapper<Pr: ReplicaProvisioner, P: RoleProbe> {
    provisioner: Pr,
    probe: P,
    slots: Arc<SlotManager>,
    metrics: Arc<MetricsRegistry>,
    deadline: Duration,
    confirmation_retries: u32,
    confirmation_interval: Duration,
    replication_user: String,
    replication_password: String,
    allowed_subnet: String,
    in_flight: Mutex<HashSet<NodeId>>,
}

/// Removes the node from the in-flight set when the attempt ends, success
/// or failure alike.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<NodeId>>,
    node_id: NodeId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.node_id);
    }
}

impl<Pr: ReplicaProvisioner, P: RoleProbe> ReplicaBootstrapper<Pr, P> {
    pub fn new(
        provisioner: Pr,
        probe: P,
        slots: Arc<SlotManager>,
        config: &ControllerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            provisioner,
            probe,
            slots,
            metrics,
            deadline: config.bootstrap_deadline(),
            confirmation_retries: config.confirmation_retries,
            confirmation_interval: Duration::from_secs(1),
            replication_user: config.replication_user.clone(),
            replication_password: config.replication_password.clone().unwrap_or_default(),
            allowed_subnet: config.allowed_subnet.clone().unwrap_or_default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Override the delay between streaming-confirmation attempts.
    pub fn with_confirmation_interval(mut self, interval: Duration) -> Self {
        self.confirmation_interval = interval;
        self
    }

    /// True while a non-terminal job exists for the node.
    pub fn is_in_flight(&self, node_id: NodeId) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .contains(&node_id)
    }

    /// Run one full bootstrap attempt for `node`.
    ///
    /// Returns the terminal job on success. On any failure the slot is
    /// released, the job is `Failed`, and the error names the phase.
    pub async fn bootstrap(
        &self,
        node: &Node,
        primary_address: &str,
    ) -> BootstrapResult<BootstrapJob> {
        let slot_name = node
            .slot_name
            .clone()
            .ok_or(BootstrapError::NoSlotAssigned(node.id))?;

        // Mutual exclusion per node, decided before anything is touched.
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(node.id) {
                return Err(BootstrapError::AlreadyInProgress(node.id));
            }
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            node_id: node.id,
        };

        self.metrics.increment_bootstraps_started();
        let node_id = node.id.to_string();
        Logger::info(
            "BOOTSTRAP_STARTED",
            &[
                ("node", node_id.as_str()),
                ("slot", slot_name.as_str()),
                ("primary", primary_address),
            ],
        );

        // The job is shared so the deadline path can read the phase it
        // expired in.
        let job = Arc::new(Mutex::new(BootstrapJob::new(node.id, slot_name.clone())));

        let attempt = self.run_phases(node, primary_address, &slot_name, &job);
        let outcome = match tokio::time::timeout(self.deadline, attempt).await {
            Ok(result) => result,
            Err(_) => {
                let phase = job.lock().expect("job poisoned").phase;
                Err(BootstrapError::DeadlineExceeded { phase })
            }
        };

        match outcome {
            Ok(()) => {
                let mut job = job.lock().expect("job poisoned");
                job.advance(BootstrapPhase::Done)?;
                self.metrics.increment_bootstraps_completed();
                Logger::info(
                    "BOOTSTRAP_COMPLETED",
                    &[("node", node_id.as_str()), ("slot", slot_name.as_str())],
                );
                Ok(job.clone())
            }
            Err(err) => {
                // Release unconditionally: on early failures the reservation
                // may not exist, and release is a no-op then.
                self.slots.release(&slot_name);
                self.metrics.increment_slots_released();
                self.metrics.increment_bootstraps_failed();
                {
                    let mut job = job.lock().expect("job poisoned");
                    if !job.phase.is_terminal() {
                        // Failed is reachable from every non-terminal phase
                        let _ = job.advance(BootstrapPhase::Failed);
                    }
                }
                let phase = err.phase().to_string();
                let message = err.to_string();
                Logger::error(
                    "BOOTSTRAP_FAILED",
                    &[
                        ("node", node_id.as_str()),
                        ("slot", slot_name.as_str()),
                        ("phase", phase.as_str()),
                        ("error", message.as_str()),
                    ],
                );
                Err(err)
            }
        }
    }

    async fn run_phases(
        &self,
        node: &Node,
        primary_address: &str,
        slot_name: &str,
        job: &Arc<Mutex<BootstrapJob>>,
    ) -> BootstrapResult<()> {
        let phase = |job: &Arc<Mutex<BootstrapJob>>| job.lock().expect("job poisoned").phase;
        let advance = |job: &Arc<Mutex<BootstrapJob>>, next| -> BootstrapResult<()> {
            job.lock().expect("job poisoned").advance(next)?;
            Ok(())
        };

        // Preparing: reserve the slot, stop the engine, wipe local state.
        self.slots
            .reserve(slot_name, node.id)
            .map_err(|source| BootstrapError::Slot {
                phase: phase(job),
                source,
            })?;
        self.metrics.increment_slots_reserved();
        self.provision_step(job, self.provisioner.stop_engine(node))
            .await?;
        self.provision_step(job, self.provisioner.wipe_data(node))
            .await?;

        // Copying: full physical copy, bound to the reserved slot.
        advance(job, BootstrapPhase::Copying)?;
        self.provision_step(
            job,
            self.provisioner.base_copy(node, primary_address, slot_name),
        )
        .await?;

        // AttachingToStream: point the copy at the primary.
        advance(job, BootstrapPhase::AttachingToStream)?;
        let settings = StandbySettings {
            primary_address: primary_address.to_string(),
            slot_name: slot_name.to_string(),
            replication_user: self.replication_user.clone(),
            replication_password: self.replication_password.clone(),
            allowed_subnet: self.allowed_subnet.clone(),
        };
        self.provision_step(job, self.provisioner.write_standby_config(node, &settings))
            .await?;

        // AwaitingConfirmation: start the engine and wait for proof.
        advance(job, BootstrapPhase::AwaitingConfirmation)?;
        self.provision_step(job, self.provisioner.start_engine(node))
            .await?;
        self.await_streaming(node, job).await?;

        self.slots
            .activate(slot_name, node.id)
            .map_err(|source| BootstrapError::Slot {
                phase: phase(job),
                source,
            })?;
        Ok(())
    }

    /// Run one provisioner operation, tagging failure with the current phase.
    async fn provision_step<T>(
        &self,
        job: &Arc<Mutex<BootstrapJob>>,
        operation: impl std::future::Future<Output = super::provisioner::ProvisionResult<T>>,
    ) -> BootstrapResult<T> {
        match operation.await {
            Ok(value) => Ok(value),
            Err(err) => Err(BootstrapError::Provision {
                phase: job.lock().expect("job poisoned").phase,
                message: err.0,
            }),
        }
    }

    /// Poll until the node proves it is a streaming replica, or the retry
    /// budget runs out.
    async fn await_streaming(
        &self,
        node: &Node,
        job: &Arc<Mutex<BootstrapJob>>,
    ) -> BootstrapResult<()> {
        for attempt in 1..=self.confirmation_retries {
            let probe_result = self.probe.probe(node).await;
            let stream = self
                .provision_step(job, self.provisioner.stream_state(node))
                .await?;

            if probe_result.is_healthy_as(ObservedRole::Replica)
                && stream == StreamState::Streaming
            {
                return Ok(());
            }

            if attempt < self.confirmation_retries {
                tokio::time::sleep(self.confirmation_interval).await;
            }
        }
        Err(BootstrapError::ConfirmationExhausted {
            attempts: self.confirmation_retries,
        })
    }
}
