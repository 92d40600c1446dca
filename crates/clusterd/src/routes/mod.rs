//! HTTP route handlers for clusterd.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use fleet_common::ClusterError;

use crate::state::AppState;

mod cluster;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))

        // Cluster status surface
        .nest("/cluster", cluster_routes())

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cluster_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(cluster::get_status))
        .route("/nodes", get(cluster::get_nodes))
        .route("/nodes/local", get(cluster::get_local_node))
        .route("/master", get(cluster::get_master))
        .route("/files", get(cluster::get_files))
        .route("/last-sync", get(cluster::get_last_sync))
}

/// Handler error, rendered as a JSON body
#[derive(Debug)]
pub struct ApiError(pub ClusterError);

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(status = code, error = %self.0, "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}
