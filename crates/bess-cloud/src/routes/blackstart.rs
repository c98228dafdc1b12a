//! `/systems/{id}/black-start/status` (spec §4.7): a read-only mirror
//! of the FSM state the edge reports over the telemetry channel. The
//! FSM itself runs at the edge (`bess_control::blackstart`); the cloud
//! never drives transitions.

use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;
use crate::middleware::auth::AuthUser;
use crate::models::{ApiResponse, BlackStartStatusResponse};
use crate::ApiState;

#[utoipa::path(
    get,
    path = "/api/v1/systems/{id}/black-start/status",
    params(("id" = Uuid, Path, description = "System id")),
    responses(
        (status = 200, description = "Last reported FSM state", body = ApiResponse<BlackStartStatusResponse>),
        (status = 404, description = "No such system, or no state reported yet")
    ),
    tag = "black-start"
)]
pub async fn status(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>, _caller: AuthUser) -> Result<Json<ApiResponse<BlackStartStatusResponse>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    let (state_name, since) = state.store.get_blackstart_state(id).await?.ok_or(CloudError::SystemNotFound)?;
    Ok(Json(ApiResponse::success(BlackStartStatusResponse { state: state_name, since })))
}
