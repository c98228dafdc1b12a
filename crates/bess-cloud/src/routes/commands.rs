//! Command dispatch (spec §4.6: "auth -> validation -> cloud-side
//! safety mirror -> persistence -> publish -> 202").
//!
//! Every handler here assigns a fresh `command_id`, persists the
//! command, appends an audit record, and publishes at `EXACTLY_ONCE`
//! before returning 202 - idempotency for redelivery is keyed on that
//! `command_id` (spec §3, §8 Testable Property 4), never on the REST
//! call itself.

use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use bess_bus::{Publisher, Topic};
use bess_common::{AuditEventKind, Command, CommandKind, CommandParams, Qos};
use bess_control::safety::{self, LatchState};
use bess_common::{BmsMode, Intent};

use crate::error::CloudError;
use crate::middleware::auth::AuthUser;
use crate::models::{ApiResponse, ChargeCommandRequest, CommandAccepted, DischargeCommandRequest, EmergencyStopRequest};
use crate::ApiState;

const DEFAULT_TTL_SECONDS: i64 = 30;

/// Command cadence assumed by the cloud-side safety mirror's staleness
/// check - matches `bess_edge`'s default control loop interval, since
/// the cloud has no cadence of its own to reuse here.
const ASSUMED_SAMPLE_PERIOD: Duration = Duration::from_millis(200);

async fn veto_check(state: &ApiState, system_id: Uuid, mode: BmsMode, power_kw: f64) -> Result<(), CloudError> {
    let Some(telemetry) = state.telemetry.latest(system_id).await? else {
        // No telemetry observed yet; nothing to mirror against. The
        // edge's own Safety Manager is the backstop either way.
        return Ok(());
    };
    let system = state.store.get_system(system_id).await?.ok_or(CloudError::SystemNotFound)?;
    let verdict = safety::enforce(Intent::SelfConsume, mode, power_kw, &telemetry, &system.safety_profile, LatchState::default(), chrono::Utc::now(), ASSUMED_SAMPLE_PERIOD);
    if verdict.permitted_mode != mode || (verdict.permitted_power_kw - power_kw).abs() > f64::EPSILON {
        let reasons: Vec<String> = verdict.reasons.iter().map(|r| format!("{r:?}")).collect();
        return Err(CloudError::SafetyVeto(reasons.join("; ")));
    }
    Ok(())
}

async fn dispatch(state: &ApiState, system_id: Uuid, kind: CommandKind, params: CommandParams) -> Result<Uuid, CloudError> {
    state.store.get_system(system_id).await?.ok_or(CloudError::SystemNotFound)?;
    let command = Command { command_id: Uuid::new_v4(), system_id, kind, params, issued_by: "api".into(), issued_at: chrono::Utc::now(), ttl: chrono::Duration::seconds(DEFAULT_TTL_SECONDS) };
    state.store.record_command(command.clone()).await?;
    state
        .store
        .append_audit(system_id, AuditEventKind::Command, "dispatch", serde_json::json!({"command_id": command.command_id, "kind": format!("{:?}", command.kind)}))
        .await?;
    let payload = serde_json::to_vec(&command)?;
    state.bus.publish(&Topic::Commands { system_id: system_id.to_string() }.to_string(), payload, Qos::ExactlyOnce).await?;
    Ok(command.command_id)
}

#[utoipa::path(
    post,
    path = "/api/v1/systems/{id}/commands/charge",
    params(("id" = Uuid, Path, description = "System id")),
    request_body = ChargeCommandRequest,
    responses(
        (status = 202, description = "Command accepted", body = ApiResponse<CommandAccepted>),
        (status = 400, description = "Safety veto or validation error"),
        (status = 404, description = "No such system")
    ),
    tag = "commands"
)]
pub async fn charge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    _caller: AuthUser,
    Json(request): Json<ChargeCommandRequest>,
) -> Result<Json<ApiResponse<CommandAccepted>>, CloudError> {
    if !(0.0..=100.0).contains(&request.target_soc) || request.max_power_kw <= 0.0 {
        return Err(CloudError::Validation("target_soc must be within [0, 100] and max_power_kw must be positive".into()));
    }
    veto_check(&state, id, BmsMode::Charging, request.max_power_kw).await?;
    let params = CommandParams { target_soc: Some(request.target_soc), max_power_kw: Some(request.max_power_kw), mode: None, reason: None };
    let command_id = dispatch(&state, id, CommandKind::Charge, params).await?;
    Ok(Json(ApiResponse::success(CommandAccepted { command_id })))
}

#[utoipa::path(
    post,
    path = "/api/v1/systems/{id}/commands/discharge",
    params(("id" = Uuid, Path, description = "System id")),
    request_body = DischargeCommandRequest,
    responses(
        (status = 202, description = "Command accepted", body = ApiResponse<CommandAccepted>),
        (status = 400, description = "Safety veto or validation error"),
        (status = 404, description = "No such system")
    ),
    tag = "commands"
)]
pub async fn discharge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    _caller: AuthUser,
    Json(request): Json<DischargeCommandRequest>,
) -> Result<Json<ApiResponse<CommandAccepted>>, CloudError> {
    if !(0.0..=100.0).contains(&request.target_soc) || request.max_power_kw <= 0.0 {
        return Err(CloudError::Validation("target_soc must be within [0, 100] and max_power_kw must be positive".into()));
    }
    veto_check(&state, id, BmsMode::Discharging, request.max_power_kw).await?;
    let params = CommandParams { target_soc: Some(request.target_soc), max_power_kw: Some(request.max_power_kw), mode: None, reason: None };
    let command_id = dispatch(&state, id, CommandKind::Discharge, params).await?;
    Ok(Json(ApiResponse::success(CommandAccepted { command_id })))
}

#[utoipa::path(
    post,
    path = "/api/v1/systems/{id}/commands/idle",
    params(("id" = Uuid, Path, description = "System id")),
    responses(
        (status = 202, description = "Command accepted", body = ApiResponse<CommandAccepted>),
        (status = 404, description = "No such system")
    ),
    tag = "commands"
)]
pub async fn idle(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>, _caller: AuthUser) -> Result<Json<ApiResponse<CommandAccepted>>, CloudError> {
    let params = CommandParams { target_soc: None, max_power_kw: None, mode: None, reason: None };
    let command_id = dispatch(&state, id, CommandKind::Idle, params).await?;
    Ok(Json(ApiResponse::success(CommandAccepted { command_id })))
}

/// Fast-path emergency stop (spec §4.6, §8 S2: 500 ms end-to-end SLA).
/// Skips the safety-mirror veto check - stopping is always the safe
/// direction - and publishes directly.
#[utoipa::path(
    post,
    path = "/api/v1/systems/{id}/emergency-stop",
    params(("id" = Uuid, Path, description = "System id")),
    request_body = EmergencyStopRequest,
    responses(
        (status = 202, description = "Fast-path stop accepted", body = ApiResponse<CommandAccepted>),
        (status = 404, description = "No such system")
    ),
    tag = "commands"
)]
pub async fn emergency_stop(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    _caller: AuthUser,
    Json(request): Json<EmergencyStopRequest>,
) -> Result<Json<ApiResponse<CommandAccepted>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    let command = Command {
        command_id: Uuid::new_v4(),
        system_id: id,
        kind: CommandKind::EmergencyStop,
        params: CommandParams { target_soc: None, max_power_kw: None, mode: Some(BmsMode::EmergencyStop), reason: Some(request.reason.clone()) },
        issued_by: "api".into(),
        issued_at: chrono::Utc::now(),
        ttl: chrono::Duration::seconds(DEFAULT_TTL_SECONDS),
    };
    let payload = serde_json::to_vec(&command)?;
    state.bus.publish(&Topic::Commands { system_id: id.to_string() }.to_string(), payload, Qos::ExactlyOnce).await?;

    state.store.record_command(command.clone()).await?;
    state
        .store
        .append_audit(id, AuditEventKind::Command, "emergency_stop", serde_json::json!({"command_id": command.command_id, "reason": request.reason}))
        .await?;
    Ok(Json(ApiResponse::success(CommandAccepted { command_id: command.command_id })))
}
