//! The introspection HTTP server
//!
//! Combines the topology and observability routers into one axum server.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::bootstrap::provisioner::ReplicaProvisioner;
use crate::controller::TopologyController;
use crate::observability::{Logger, MetricsRegistry};
use crate::probe::RoleProbe;

use super::config::HttpServerConfig;
use super::observability_routes::{health_routes, observability_routes};
use super::topology_routes::topology_routes;

/// HTTP server for operators and dashboards
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Build the server over shared controller and metrics handles.
    pub fn new<Pr, P>(
        config: HttpServerConfig,
        controller: Arc<TopologyController<Pr, P>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self
    where
        Pr: ReplicaProvisioner + 'static,
        P: RoleProbe + 'static,
    {
        let router = Self::build_router(&config, controller, metrics);
        Self { config, router }
    }

    fn build_router<Pr, P>(
        config: &HttpServerConfig,
        controller: Arc<TopologyController<Pr, P>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Router
    where
        Pr: ReplicaProvisioner + 'static,
        P: RoleProbe + 'static,
    {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(health_routes())
            .nest("/observability", observability_routes(metrics))
            .nest("/cluster", topology_routes(controller))
            .layer(cors)
    }

    /// The socket address this server will bind.
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// The router (for testing).
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the owning task is dropped.
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        Logger::info("HTTP_SERVER_STARTED", &[("addr", addr.as_str())]);
        axum::serve(listener, self.router).await
    }
}
