//! Cloud Coordinator (C6, spec §4.6)
//!
//! Central authority for provisioning, command dispatch, telemetry
//! ingestion, and the audit log for a fleet of `bess-edge` processes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        CLOUD COORDINATOR                          │
//! │                                                                   │
//! │  ┌───────────────────────────────────────────────────────────┐   │
//! │  │                       REST API (C6)                        │   │
//! │  │  OpenAPI 3.1 | JWT bearer auth | per-client rate limiting  │   │
//! │  └───────────────────────────────────────────────────────────┘   │
//! │                                                                   │
//! │  ┌────────────────┐   ┌────────────────┐   ┌───────────────────┐ │
//! │  │ ProvisioningHandler │ TelemetryIngester │ Store/TelemetryStore│ │
//! │  │  (register→config)  │ (dedup + audit)   │ (Mem or Postgres)  │ │
//! │  └────────────────┘   └────────────────┘   └───────────────────┘ │
//! │                             │                                     │
//! │                    bess-bus::Publisher/Subscriber                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod provisioning;
pub mod routes;
pub mod store;
pub mod telemetry_store;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bess_bus::Publisher;
use middleware::rate_limit::RateLimiter;
use store::SharedStore;
use telemetry_store::SharedTelemetryStore;

pub use models::{ApiResponse, ErrorResponse, PaginatedResponse};

/// Shared state threaded through every route handler.
pub struct ApiState {
    pub store: SharedStore,
    pub telemetry: SharedTelemetryStore,
    pub bus: Arc<dyn Publisher>,
    pub jwt_secret: String,
    pub operator_username: String,
    pub operator_password: String,
    pub rate_limiter: RateLimiter,
}

/// OpenAPI documentation for the Cloud Coordinator's REST surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "BESS Cloud Coordinator API",
        version = "1.0.0",
        description = "Provisioning, command dispatch, telemetry ingestion, and audit log for a fleet of battery energy storage systems",
        license(name = "Apache-2.0")
    ),
    paths(
        routes::health::health_check,
        routes::auth::login,
        routes::systems::list_systems,
        routes::systems::get_system,
        routes::commands::charge,
        routes::commands::discharge,
        routes::commands::idle,
        routes::commands::emergency_stop,
        routes::events::list_events,
        routes::alarms::list_alarms,
        routes::alarms::clear_alarm,
        routes::blackstart::status,
    ),
    components(
        schemas(
            ApiResponse, ErrorResponse, PaginatedResponse,
            models::LoginRequest, models::LoginResponse,
            models::SystemDto, models::ConnectionConfig, models::ConnectionTestResult,
            models::ChargeCommandRequest, models::DischargeCommandRequest, models::EmergencyStopRequest,
            models::CommandAccepted, models::AuditEventDto, models::AlarmDto, models::BlackStartStatusResponse
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Operator authentication"),
        (name = "systems", description = "System provisioning and identity"),
        (name = "commands", description = "Charge/discharge/idle/emergency-stop dispatch"),
        (name = "events", description = "Append-only audit log"),
        (name = "alarms", description = "Safety and connectivity alarms"),
        (name = "black-start", description = "Black-Start FSM status mirror")
    )
)]
pub struct ApiDoc;

/// Build the API router over a fully-constructed [`ApiState`].
pub fn build_router(state: ApiState) -> Router {
    let shared = Arc::new(state);
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1", api_routes())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn_with_state(shared.clone(), middleware::rate_limit::rate_limit_layer))
        .with_state(shared)
}

fn api_routes() -> Router<Arc<ApiState>> {
    Router::new().route("/auth/login", post(routes::auth::login)).nest("/systems", systems_routes())
}

fn systems_routes() -> Router<Arc<ApiState>> {
    Router::new()
        .merge(routes::systems::router())
        .route("/:id/commands/charge", post(routes::commands::charge))
        .route("/:id/commands/discharge", post(routes::commands::discharge))
        .route("/:id/commands/idle", post(routes::commands::idle))
        .route("/:id/emergency-stop", post(routes::commands::emergency_stop))
        .route("/:id/events", get(routes::events::list_events))
        .nest("/:id/alarms", routes::alarms::router())
        .route("/:id/black-start/status", get(routes::blackstart::status))
}
