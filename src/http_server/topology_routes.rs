//! Topology HTTP routes
//!
//! Node registration, deregistration, bootstrap triggering, and read-only
//! views of routing, slots, and the whole topology.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bootstrap::provisioner::ReplicaProvisioner;
use crate::controller::{ControllerError, TopologyController};
use crate::node::{DeclaredRole, NodeId};
use crate::observability::Logger;
use crate::probe::RoleProbe;

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub address: String,
    pub declared_role: DeclaredRole,
}

#[derive(Debug, Serialize)]
pub struct AddNodeResponse {
    pub node_id: NodeId,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16(),
        }),
    )
}

fn controller_error(err: ControllerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        ControllerError::UnknownNode(_) => StatusCode::NOT_FOUND,
        ControllerError::DuplicateAddress(_) => StatusCode::CONFLICT,
        ControllerError::NotAReplica(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControllerError::BootstrapInFlight(_) => StatusCode::CONFLICT,
        ControllerError::QuarantineStalled(_) => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::Bootstrap(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn parse_node_id(raw: &str) -> Result<NodeId, (StatusCode, Json<ErrorResponse>)> {
    raw.parse::<Uuid>()
        .map(NodeId::from_uuid)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid node id: {}", raw)))
}

/// Create topology routes over a shared controller.
pub fn topology_routes<Pr, P>(controller: Arc<TopologyController<Pr, P>>) -> Router
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    Router::new()
        .route("/topology", get(get_topology_handler::<Pr, P>))
        .route("/routing", get(get_routing_handler::<Pr, P>))
        .route("/slots", get(get_slots_handler::<Pr, P>))
        .route(
            "/nodes",
            get(list_nodes_handler::<Pr, P>).post(add_node_handler::<Pr, P>),
        )
        .route("/nodes/:id", get(get_node_handler::<Pr, P>))
        .route("/nodes/:id/remove", post(remove_node_handler::<Pr, P>))
        .route("/nodes/:id/bootstrap", post(bootstrap_node_handler::<Pr, P>))
        .with_state(controller)
}

async fn get_topology_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    (StatusCode::OK, Json(controller.current_topology().await))
}

async fn get_routing_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    (StatusCode::OK, Json((*controller.routing()).clone()))
}

async fn get_slots_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    (StatusCode::OK, Json(controller.current_topology().await.slots))
}

async fn list_nodes_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    (StatusCode::OK, Json(controller.current_topology().await.nodes))
}

async fn add_node_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
    Json(request): Json<AddNodeRequest>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    match controller
        .add_node(request.address, request.declared_role)
        .await
    {
        Ok(node_id) => (StatusCode::CREATED, Json(AddNodeResponse { node_id })).into_response(),
        Err(err) => controller_error(err).into_response(),
    }
}

async fn get_node_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    let node_id = match parse_node_id(&id) {
        Ok(node_id) => node_id,
        Err(response) => return response.into_response(),
    };
    match controller.node(node_id).await {
        Some(node) => (StatusCode::OK, Json(node)).into_response(),
        None => controller_error(ControllerError::UnknownNode(node_id)).into_response(),
    }
}

async fn remove_node_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    let node_id = match parse_node_id(&id) {
        Ok(node_id) => node_id,
        Err(response) => return response.into_response(),
    };
    match controller.remove_node(node_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: format!("node {} removed", node_id),
            }),
        )
            .into_response(),
        Err(err) => controller_error(err).into_response(),
    }
}

/// Starts a bootstrap in the background and returns immediately.
///
/// The bootstrap deadline can be minutes; a hanging HTTP request would help
/// nobody. Progress is visible through `/topology` and the logs.
async fn bootstrap_node_handler<Pr, P>(
    State(controller): State<Arc<TopologyController<Pr, P>>>,
    Path(id): Path<String>,
) -> impl IntoResponse
where
    Pr: ReplicaProvisioner + 'static,
    P: RoleProbe + 'static,
{
    let node_id = match parse_node_id(&id) {
        Ok(node_id) => node_id,
        Err(response) => return response.into_response(),
    };
    let node = match controller.node(node_id).await {
        Some(node) => node,
        None => return controller_error(ControllerError::UnknownNode(node_id)).into_response(),
    };
    if !node.is_declared_replica() {
        return controller_error(ControllerError::NotAReplica(node_id)).into_response();
    }
    if controller.bootstrap_in_flight(node_id) {
        return error_response(
            StatusCode::CONFLICT,
            format!("bootstrap already in progress for node {}", node_id),
        )
        .into_response();
    }

    tokio::spawn(async move {
        if let Err(err) = controller.trigger_bootstrap(node_id).await {
            let node = node_id.to_string();
            let message = err.to_string();
            Logger::error(
                "BOOTSTRAP_REQUEST_FAILED",
                &[("node", node.as_str()), ("error", message.as_str())],
            );
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: format!("bootstrap started for node {}", node_id),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_node_request_deserialization() {
        let json = r#"{"address": "10.0.1.4:5432", "declared_role": "replica"}"#;
        let request: AddNodeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.address, "10.0.1.4:5432");
        assert_eq!(request.declared_role, DeclaredRole::Replica);
    }

    #[test]
    fn test_error_response_serialization() {
        let (status, Json(body)) =
            controller_error(ControllerError::UnknownNode(NodeId::new()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, 404);
        assert!(body.error.contains("unknown node"));
    }

    #[test]
    fn test_parse_node_id_rejects_garbage() {
        assert!(parse_node_id("not-a-uuid").is_err());
        let id = NodeId::new();
        assert_eq!(parse_node_id(&id.to_string()).unwrap(), id);
    }
}
