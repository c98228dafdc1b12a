//! JWT authentication, grounded in the portal backend's `auth.rs`
//! `Claims`/`create_token`/`verify_token` pattern, generalized from a
//! single hardcoded secret to one read from `ApiState` and wired as a
//! real `axum` extractor instead of a stub that accepts any non-empty
//! token.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;
use crate::ApiState;

/// Claims embedded in tokens minted by `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub exp: usize,
}

/// Mint a signed token for `user_id`/`role`, valid for 8 hours (matches
/// the portal backend's session length).
pub fn create_token(secret: &str, user_id: Uuid, role: &str) -> Result<(String, chrono::DateTime<chrono::Utc>), jsonwebtoken::errors::Error> {
    let expires_at = chrono::Utc::now() + chrono::Duration::hours(8);
    let claims = Claims { sub: user_id, role: role.to_string(), exp: expires_at.timestamp() as usize };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok((token, expires_at))
}

/// Verify and decode a bearer token.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())?;
    Ok(data.claims)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// The authenticated caller, extracted from the `Authorization: Bearer`
/// header. Route handlers that need an authenticated caller take this
/// as a parameter; axum rejects the request with
/// [`CloudError::Unauthorized`] before the handler body runs if
/// extraction fails.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl FromRequestParts<Arc<ApiState>> for AuthUser {
    type Rejection = CloudError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ApiState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(CloudError::Unauthorized)?;
        let claims = verify_token(&state.jwt_secret, token).map_err(|_| CloudError::Unauthorized)?;
        Ok(AuthUser { user_id: claims.sub, role: claims.role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_token_recovers_claims() {
        let user_id = Uuid::new_v4();
        let (token, _) = create_token("test-secret", user_id, "operator").unwrap();
        let claims = verify_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "operator");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = create_token("test-secret", Uuid::new_v4(), "operator").unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }
}
