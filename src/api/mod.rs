//! HTTP surface for the remote storage protocol
//!
//! - `POST /receive` (and `/api/v1/write`): remote write
//! - `POST /read` (and `/api/v1/read`): remote read
//! - `GET /health`, `GET /ready`: liveness and table readiness

pub mod remote;
mod telemetry;

use crate::context::RequestContext;
use crate::ingester::Ingester;
use crate::query::QueryNode;
use crate::table::TableManager;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Maximum compressed request body size
    pub max_body_size: usize,
    /// Deadline applied to every request's store calls
    pub request_timeout: Option<Duration>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_port: 1234,
            max_body_size: 32 * 1024 * 1024, // 32MB
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub ingester: Arc<Ingester>,
    pub query_node: Arc<QueryNode>,
    pub tables: Arc<TableManager>,
    pub config: ApiServerConfig,
}

impl ApiState {
    /// Deadline scope for one request
    pub fn request_context(&self) -> RequestContext {
        match self.config.request_timeout {
            Some(timeout) => RequestContext::with_timeout(timeout),
            None => RequestContext::background(),
        }
    }
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let max_body_size = state.config.max_body_size;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))

        // Remote write
        .route("/receive", post(remote::handle_remote_write))
        .route("/api/v1/write", post(remote::handle_remote_write))

        // Remote read
        .route("/read", post(remote::handle_remote_read))
        .route("/api/v1/read", post(remote::handle_remote_read))

        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint: ready once the table is confirmed present
async fn ready_check(State(state): State<ApiState>) -> impl IntoResponse {
    if state.tables.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}
