//! `/systems/{id}/alarms` (supplements the distillation - spec §7 names
//! severities but the REST surface needs a storable, queryable shape;
//! grounded in the teacher's `routes::alerts` list/get/acknowledge
//! shape, retargeted at `bess_common::Alarm`).

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;
use crate::middleware::auth::AuthUser;
use crate::models::{AlarmDto, AlarmQueryParams, ApiResponse, parse_severity};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/", get(list_alarms)).route("/:alarm_id/clear", post(clear_alarm))
}

#[utoipa::path(
    get,
    path = "/api/v1/systems/{id}/alarms",
    params(
        ("id" = Uuid, Path, description = "System id"),
        ("active" = Option<bool>, Query, description = "Filter by active state"),
        ("severity" = Option<String>, Query, description = "Filter by P1-P4 severity")
    ),
    responses(
        (status = 200, description = "Alarms for this system", body = ApiResponse<Vec<AlarmDto>>),
        (status = 400, description = "Unknown severity filter value"),
        (status = 404, description = "No such system")
    ),
    tag = "alarms"
)]
pub async fn list_alarms(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<AlarmQueryParams>,
    _caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<AlarmDto>>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    let severity = params.severity.map(|s| parse_severity(&s).ok_or_else(|| CloudError::Validation(format!("unknown severity {s}")))).transpose()?;
    let alarms = state.store.list_alarms(id, params.active, severity).await?;
    Ok(Json(ApiResponse::success(alarms.iter().map(AlarmDto::from).collect())))
}

#[utoipa::path(
    post,
    path = "/api/v1/systems/{id}/alarms/{alarm_id}/clear",
    params(("id" = Uuid, Path, description = "System id"), ("alarm_id" = Uuid, Path, description = "Alarm id")),
    responses((status = 200, description = "Alarm cleared")),
    tag = "alarms"
)]
pub async fn clear_alarm(State(state): State<Arc<ApiState>>, Path((_id, alarm_id)): Path<(Uuid, Uuid)>, _caller: AuthUser) -> Result<Json<ApiResponse<()>>, CloudError> {
    state.store.clear_alarm(alarm_id).await?;
    Ok(Json(ApiResponse::success(())))
}
