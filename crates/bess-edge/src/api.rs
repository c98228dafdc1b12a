//! Local health/status HTTP server, grounded in the teacher's `api.rs`
//! (same route shape: `/health`, `/status`), repointed at BESS fields.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::control::{EdgeController, EdgeMode};
use crate::EdgeError;

/// Serve `/health` and `/status` on the configured local address until
/// the process shuts down.
pub async fn start_server(addr: &str, controller: Arc<EdgeController>) -> Result<(), EdgeError> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(controller);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| EdgeError::Api(e.to_string()))?;
    tracing::info!(addr, "edge local api listening");

    axum::serve(listener, app).await.map_err(|e| EdgeError::Api(e.to_string()))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatusResponse {
    mode: EdgeMode,
    version: &'static str,
}

async fn status(axum::extract::State(controller): axum::extract::State<Arc<EdgeController>>) -> Json<StatusResponse> {
    Json(StatusResponse { mode: controller.mode(), version: env!("CARGO_PKG_VERSION") })
}
