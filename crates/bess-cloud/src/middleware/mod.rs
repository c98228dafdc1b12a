//! Cross-cutting axum middleware.

pub mod auth;
pub mod rate_limit;
