//! `POST /auth/login` (spec §6/§7: "Authorization" - every other route
//! requires a bearer token minted here).
//!
//! No user directory exists in this corpus's retrieved BESS material,
//! so credentials are checked against a fixed operator account read
//! from `ApiState`; swapping in a real user store is a drop-in change
//! behind the same handler signature.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;
use crate::middleware::auth::create_token;
use crate::models::{ApiResponse, LoginRequest, LoginResponse};
use crate::ApiState;

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login(State(state): State<Arc<ApiState>>, Json(request): Json<LoginRequest>) -> Result<Json<ApiResponse<LoginResponse>>, CloudError> {
    if request.username != state.operator_username || request.password != state.operator_password {
        return Err(CloudError::Unauthorized);
    }
    let (token, expires_at) = create_token(&state.jwt_secret, Uuid::new_v5(&Uuid::NAMESPACE_DNS, request.username.as_bytes()), "operator")
        .map_err(|e| CloudError::Storage(e.to_string()))?;
    Ok(Json(ApiResponse::success(LoginResponse { token, expires_at })))
}
