//! Cloud Coordinator error types, mirroring `bess_edge::EdgeError`'s
//! shape but mapped to the HTTP status codes spec §6/§7 name for each
//! failure scope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::ApiResponse;

/// Errors surfaced by the Cloud Coordinator's REST surface and
/// background provisioning/ingestion tasks.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Missing or invalid bearer token (spec §7: "Authorization").
    #[error("unauthorized")]
    Unauthorized,

    /// Target system does not exist (spec §6: 404).
    #[error("system not found")]
    SystemNotFound,

    /// Malformed request fields (spec §7: "Validation").
    #[error("validation error: {0}")]
    Validation(String),

    /// The cloud-side Safety Manager mirror would veto this command
    /// (spec §4.6, §7: "Safety").
    #[error("safety veto: {0}")]
    SafetyVeto(String),

    /// Per-client token bucket exhausted (spec §4.6, §7: "Capacity" -
    /// "never a 5xx").
    #[error("rate limited")]
    RateLimited,

    /// Message bus publish failed.
    #[error("bus error: {0}")]
    Bus(#[from] bess_bus::BusError),

    /// Storage read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed JSON payload on a bus message (spec §7: "Protocol").
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl IntoResponse for CloudError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CloudError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            CloudError::SystemNotFound => (StatusCode::NOT_FOUND, "not_found"),
            CloudError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            CloudError::SafetyVeto(_) => (StatusCode::BAD_REQUEST, "safety_veto"),
            CloudError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            CloudError::Bus(_) => (StatusCode::SERVICE_UNAVAILABLE, "transport_unavailable"),
            CloudError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            CloudError::Protocol(_) => (StatusCode::BAD_REQUEST, "protocol_error"),
        };
        let body = Json(ApiResponse::<()>::error(code, &self.to_string()));
        (status, body).into_response()
    }
}
