//! Web server module exposing the status query API.

mod handlers;

pub use handlers::*;

use crate::aggregate::Aggregator;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::registry::TargetRegistry;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub registry: Arc<TargetRegistry>,
    pub aggregator: Arc<Aggregator>,
}

/// Web server for StatusWatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, registry: Arc<TargetRegistry>) -> Self {
        Self {
            state: AppState {
                config,
                aggregator: Arc::new(Aggregator::new(store.clone())),
                store,
                registry,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/status", get(handlers::handle_status))
            .route("/api/samples", get(handlers::handle_samples))
            .route("/api/samples/latest", get(handlers::handle_latest_samples))
            .route("/api/incidents", get(handlers::handle_incidents))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
