//! Engine-side provisioning operations
//!
//! The bootstrapper drives the phase sequence; the provisioner is the seam
//! where those phases touch the actual database engine. `LocalProvisioner`
//! manages engine state under a local root directory and is what the
//! integration tests exercise; a deployment wires in its own implementation
//! for remote engines.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Result type for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Engine-side operation failure.
///
/// Carried as a message: the bootstrapper tags it with the phase it occurred
/// in, which is the part that matters for diagnosis and retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProvisionError(pub String);

impl From<io::Error> for ProvisionError {
    fn from(err: io::Error) -> Self {
        ProvisionError(err.to_string())
    }
}

/// Replication stream status as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Attached and receiving live changes
    Streaming,
    /// Attached but still replaying the copy backlog
    CatchingUp,
    /// Not attached to any stream
    NotStreaming,
}

/// Standby configuration written during `AttachingToStream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandbySettings {
    pub primary_address: String,
    pub slot_name: String,
    pub replication_user: String,
    pub replication_password: String,
    pub allowed_subnet: String,
}

/// Operations the bootstrapper needs from the engine.
///
/// Every operation is idempotent with respect to re-entry: stopping a
/// stopped engine, wiping an empty directory, and rewriting standby
/// configuration all succeed, which is what makes retrying a failed
/// bootstrap from the beginning safe.
pub trait ReplicaProvisioner: Send + Sync {
    /// Stop the node's engine if it is running.
    fn stop_engine(&self, node: &Node) -> impl Future<Output = ProvisionResult<()>> + Send;

    /// Remove the node's local data state.
    fn wipe_data(&self, node: &Node) -> impl Future<Output = ProvisionResult<()>> + Send;

    /// Stream a full physical copy of the primary, bound to `slot_name`.
    fn base_copy(
        &self,
        node: &Node,
        primary_address: &str,
        slot_name: &str,
    ) -> impl Future<Output = ProvisionResult<()>> + Send;

    /// Write standby configuration pointing the node at the primary.
    fn write_standby_config(
        &self,
        node: &Node,
        settings: &StandbySettings,
    ) -> impl Future<Output = ProvisionResult<()>> + Send;

    /// Start the node's engine.
    fn start_engine(&self, node: &Node) -> impl Future<Output = ProvisionResult<()>> + Send;

    /// Current replication stream status of the node.
    fn stream_state(&self, node: &Node) -> impl Future<Output = ProvisionResult<StreamState>> + Send;
}

/// Filesystem-backed provisioner for engines on the controller's own host.
///
/// Layout under `root`:
///
/// ```text
/// <root>/<node-id>/data/         physical data copied from the primary
/// <root>/<node-id>/standby.conf  standby settings, JSON
/// <root>/<node-id>/running       marker file while the engine is up
/// <root>/<node-id>/stream_state  engine-reported stream status
/// ```
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    root: PathBuf,
    primary_data: PathBuf,
}

impl LocalProvisioner {
    pub fn new(root: impl Into<PathBuf>, primary_data: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            primary_data: primary_data.into(),
        }
    }

    /// Root of this node's engine state, per the documented layout.
    pub fn node_dir(&self, node: &Node) -> PathBuf {
        self.root.join(node.id.to_string())
    }

    fn data_dir(&self, node: &Node) -> PathBuf {
        self.node_dir(node).join("data")
    }

    fn running_marker(&self, node: &Node) -> PathBuf {
        self.node_dir(node).join("running")
    }

    fn standby_conf(&self, node: &Node) -> PathBuf {
        self.node_dir(node).join("standby.conf")
    }

    fn stream_state_file(&self, node: &Node) -> PathBuf {
        self.node_dir(node).join("stream_state")
    }

    /// True while the engine's running marker exists.
    pub fn is_running(&self, node: &Node) -> bool {
        self.running_marker(node).exists()
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl ReplicaProvisioner for LocalProvisioner {
    async fn stop_engine(&self, node: &Node) -> ProvisionResult<()> {
        let marker = self.running_marker(node);
        let result = tokio::task::spawn_blocking(move || match std::fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        })
        .await
        .map_err(|err| ProvisionError(err.to_string()))?;
        result.map_err(ProvisionError::from)
    }

    async fn wipe_data(&self, node: &Node) -> ProvisionResult<()> {
        let dir = self.node_dir(node);
        let result = tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        })
        .await
        .map_err(|err| ProvisionError(err.to_string()))?;
        result.map_err(ProvisionError::from)
    }

    async fn base_copy(
        &self,
        node: &Node,
        _primary_address: &str,
        _slot_name: &str,
    ) -> ProvisionResult<()> {
        let src = self.primary_data.clone();
        let dst = self.data_dir(node);
        let result =
            tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
                .await
                .map_err(|err| ProvisionError(err.to_string()))?;
        result.map_err(ProvisionError::from)
    }

    async fn write_standby_config(
        &self,
        node: &Node,
        settings: &StandbySettings,
    ) -> ProvisionResult<()> {
        let path = self.standby_conf(node);
        let body = serde_json::to_vec_pretty(settings)
            .map_err(|err| ProvisionError(err.to_string()))?;
        let result = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, body)
        })
        .await
        .map_err(|err| ProvisionError(err.to_string()))?;
        result.map_err(ProvisionError::from)
    }

    async fn start_engine(&self, node: &Node) -> ProvisionResult<()> {
        let marker = self.running_marker(node);
        // Starting an engine whose data never arrived is a provisioning bug;
        // refuse rather than create a marker over nothing.
        if !self.data_dir(node).exists() {
            return Err(ProvisionError(format!(
                "no data directory for node {}",
                node.id
            )));
        }
        let result = tokio::task::spawn_blocking(move || std::fs::write(&marker, b""))
            .await
            .map_err(|err| ProvisionError(err.to_string()))?;
        result.map_err(ProvisionError::from)
    }

    async fn stream_state(&self, node: &Node) -> ProvisionResult<StreamState> {
        if !self.is_running(node) {
            return Ok(StreamState::NotStreaming);
        }
        let path = self.stream_state_file(node);
        let result = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path))
            .await
            .map_err(|err| ProvisionError(err.to_string()))?;
        match result {
            Ok(body) => match body.trim() {
                "streaming" => Ok(StreamState::Streaming),
                "catching_up" => Ok(StreamState::CatchingUp),
                _ => Ok(StreamState::NotStreaming),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(StreamState::NotStreaming),
            Err(err) => Err(ProvisionError::from(err)),
        }
    }
}
