//! REST request/response DTOs (spec §6).
//!
//! Kept from the teacher's `api::models`: the generic `ApiResponse<T>` /
//! `ErrorResponse` / `PaginatedResponse<T>` envelope shapes and the
//! `utoipa::ToSchema` derives driving the OpenAPI surface. The domain
//! payloads underneath are new - the teacher's `User`/`Policy`/`Site`
//! types have no counterpart here; these wrap `bess_common` records
//! instead of SASE tenancy resources.

use bess_common::{Alarm, AuditEvent, ProvisioningStatus, Severity, System};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard API response envelope.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorResponse { code: code.to_string(), message: message.to_string() }),
        }
    }
}

/// Error response body. Carries an explanatory `message` so safety
/// vetoes surfaced as HTTP 400 can name the violated limit (spec §7:
/// "an explanatory reason field").
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Paginated list response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

// ============ Auth ============

/// `POST /auth/login` request body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /auth/login` success response.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============ Systems ============

/// Wire shape of a `System` (spec §3), trimmed to the fields a REST
/// caller should see - the safety profile is managed through
/// provisioning, not re-sent on every list/get.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemDto {
    pub system_id: Uuid,
    pub edge_id: String,
    pub organization_id: Uuid,
    pub site_id: Uuid,
    pub status: ProvisioningStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub software_version: String,
    pub ip_address: Option<String>,
}

impl From<&System> for SystemDto {
    fn from(s: &System) -> Self {
        Self {
            system_id: s.system_id,
            edge_id: s.edge_id.clone(),
            organization_id: s.organization_id,
            site_id: s.site_id,
            status: s.status,
            last_seen: s.last_seen,
            software_version: s.software_version.clone(),
            ip_address: s.ip_address.clone(),
        }
    }
}

/// `GET/POST /systems/{id}/connection` body: the BMS link a particular
/// edge dials out to (spec §4.3 step 1's "Modbus TCP/RTU, MQTT, or
/// vendor HTTP").
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionConfig {
    pub protocol: String,
    pub endpoint: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `POST /systems/{id}/connection/test` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionTestResult {
    pub reachable: bool,
    pub message: String,
}

// ============ Commands ============

/// `POST /systems/{id}/commands/charge` body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChargeCommandRequest {
    pub target_soc: f64,
    pub max_power_kw: f64,
}

/// `POST /systems/{id}/commands/discharge` body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DischargeCommandRequest {
    pub target_soc: f64,
    pub max_power_kw: f64,
}

/// `POST /systems/{id}/emergency-stop` body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmergencyStopRequest {
    pub reason: String,
}

/// Response to any accepted command (spec §6: "Return HTTP 202 with the
/// `command_id`").
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandAccepted {
    pub command_id: Uuid,
}

// ============ Events & alarms ============

/// `GET /systems/{id}/events` query parameters.
#[derive(Debug, Deserialize)]
pub struct EventQueryParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Wire shape of an [`AuditEvent`].
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEventDto {
    pub event_id: Uuid,
    pub system_id: Uuid,
    pub kind: String,
    pub action: String,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl From<&AuditEvent> for AuditEventDto {
    fn from(e: &AuditEvent) -> Self {
        Self {
            event_id: e.event_id,
            system_id: e.system_id,
            kind: format!("{:?}", e.kind),
            action: e.action.clone(),
            detail: e.detail.clone(),
            recorded_at: e.recorded_at,
        }
    }
}

/// `GET /systems/{id}/alarms` query parameters.
#[derive(Debug, Deserialize)]
pub struct AlarmQueryParams {
    pub active: Option<bool>,
    pub severity: Option<String>,
}

/// Parse a `?severity=` query value into a [`Severity`], case-insensitive.
pub fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_uppercase().as_str() {
        "P1" => Some(Severity::P1),
        "P2" => Some(Severity::P2),
        "P3" => Some(Severity::P3),
        "P4" => Some(Severity::P4),
        _ => None,
    }
}

/// Wire shape of an [`Alarm`].
#[derive(Debug, Serialize, ToSchema)]
pub struct AlarmDto {
    pub id: Uuid,
    pub system_id: Uuid,
    pub severity: String,
    pub code: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl From<&Alarm> for AlarmDto {
    fn from(a: &Alarm) -> Self {
        Self {
            id: a.id,
            system_id: a.system_id,
            severity: format!("{:?}", a.severity),
            code: a.code.clone(),
            message: a.message.clone(),
            raised_at: a.raised_at,
            cleared_at: a.cleared_at,
            active: a.active,
        }
    }
}

/// `GET /systems/{id}/black-start/status` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct BlackStartStatusResponse {
    pub state: String,
    pub since: DateTime<Utc>,
}
