//! `/systems/{id}/events` - the audit log (spec §6).

use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use bess_common::AuditEventKind;

use crate::error::CloudError;
use crate::middleware::auth::AuthUser;
use crate::models::{ApiResponse, AuditEventDto, EventQueryParams};
use crate::ApiState;

fn parse_kind(s: &str) -> Option<AuditEventKind> {
    match s {
        "command" => Some(AuditEventKind::Command),
        "decision" => Some(AuditEventKind::Decision),
        "safety_veto" => Some(AuditEventKind::SafetyVeto),
        "fsm_transition" => Some(AuditEventKind::FsmTransition),
        "provisioning" => Some(AuditEventKind::Provisioning),
        "mode_change" => Some(AuditEventKind::ModeChange),
        _ => None,
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/systems/{id}/events",
    params(("id" = Uuid, Path, description = "System id"), ("type" = Option<String>, Query, description = "Filter by audit event kind")),
    responses(
        (status = 200, description = "Audit events, oldest first", body = ApiResponse<Vec<AuditEventDto>>),
        (status = 400, description = "Unknown `type` filter value"),
        (status = 404, description = "No such system")
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<EventQueryParams>,
    _caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<AuditEventDto>>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    let kind = params.kind.map(|k| parse_kind(&k).ok_or_else(|| CloudError::Validation(format!("unknown event type {k}")))).transpose()?;
    let events = state.store.list_events(id, kind).await?;
    Ok(Json(ApiResponse::success(events.iter().map(AuditEventDto::from).collect())))
}
