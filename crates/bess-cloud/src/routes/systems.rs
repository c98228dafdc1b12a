//! `/systems` resource routes (spec §6).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;
use crate::middleware::auth::AuthUser;
use crate::models::{ApiResponse, ConnectionConfig, ConnectionTestResult, SystemDto};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_systems))
        .route("/:id", get(get_system))
        .route("/:id/connection", get(get_connection).put(set_connection))
        .route("/:id/connection/test", post(test_connection))
}

#[utoipa::path(
    get,
    path = "/api/v1/systems",
    responses((status = 200, description = "All provisioned systems", body = ApiResponse<Vec<SystemDto>>)),
    tag = "systems"
)]
pub async fn list_systems(State(state): State<Arc<ApiState>>, _caller: AuthUser) -> Result<Json<ApiResponse<Vec<SystemDto>>>, CloudError> {
    let systems = state.store.list_systems().await?;
    Ok(Json(ApiResponse::success(systems.iter().map(SystemDto::from).collect())))
}

#[utoipa::path(
    get,
    path = "/api/v1/systems/{id}",
    params(("id" = Uuid, Path, description = "System id")),
    responses(
        (status = 200, description = "System found", body = ApiResponse<SystemDto>),
        (status = 404, description = "No such system")
    ),
    tag = "systems"
)]
pub async fn get_system(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>, _caller: AuthUser) -> Result<Json<ApiResponse<SystemDto>>, CloudError> {
    let system = state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    Ok(Json(ApiResponse::success(SystemDto::from(&system))))
}

pub async fn get_connection(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>, _caller: AuthUser) -> Result<Json<ApiResponse<ConnectionConfig>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    let config = state.store.get_connection(id).await?.ok_or(CloudError::SystemNotFound)?;
    Ok(Json(ApiResponse::success(config)))
}

pub async fn set_connection(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    _caller: AuthUser,
    Json(config): Json<ConnectionConfig>,
) -> Result<Json<ApiResponse<ConnectionConfig>>, CloudError> {
    state.store.get_system(id).await?.ok_or(CloudError::SystemNotFound)?;
    state.store.set_connection(id, config.clone()).await?;
    Ok(Json(ApiResponse::success(config)))
}

/// Reachability probe for the configured BMS connection (spec §4.3 step
/// 1's transport set). This crate has no Modbus/vendor-HTTP client of
/// its own - that lives in `bess-edge` - so the cloud side reports
/// "configured" rather than dialing out itself.
pub async fn test_connection(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>, _caller: AuthUser) -> Result<Json<ApiResponse<ConnectionTestResult>>, CloudError> {
    let config = state.store.get_connection(id).await?;
    let result = match config {
        Some(c) => ConnectionTestResult { reachable: true, message: format!("connection configured: {} {}", c.protocol, c.endpoint) },
        None => ConnectionTestResult { reachable: false, message: "no connection configured".into() },
    };
    Ok(Json(ApiResponse::success(result)))
}
