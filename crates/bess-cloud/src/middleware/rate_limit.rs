//! Per-client token-bucket rate limiting (spec §4.6, §7: "Capacity -
//! never a 5xx").
//!
//! Keeps the teacher's real [`TokenBucket`]/[`RateLimiter`] logic
//! unchanged and replaces the stub `rate_limit_layer()` (which returned
//! `tower::util::Identity`, i.e. did nothing) with a real
//! `axum::middleware::from_fn_with_state` layer that returns
//! [`CloudError::RateLimited`] - mapped to HTTP 429, never a 5xx - once
//! a client's bucket is empty.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::CloudError;
use crate::ApiState;

/// Rate limiter keyed per client.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: RwLock::new(HashMap::new()), config }
    }

    /// Check if request is allowed, creating a fresh bucket for unseen
    /// keys.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| TokenBucket::new(self.config.requests_per_second, self.config.burst));

        if bucket.try_acquire() {
            RateLimitResult::Allowed { remaining: bucket.available, reset_at: bucket.reset_at }
        } else {
            RateLimitResult::Limited { retry_after: bucket.reset_at.saturating_duration_since(Instant::now()) }
        }
    }
}

/// Rate limit config.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_second: 100, burst: 200 }
    }
}

/// Token bucket.
struct TokenBucket {
    available: u32,
    max: u32,
    refill_rate: u32,
    last_refill: Instant,
    reset_at: Instant,
}

impl TokenBucket {
    fn new(rate: u32, burst: u32) -> Self {
        Self { available: burst, max: burst, refill_rate: rate, last_refill: Instant::now(), reset_at: Instant::now() + Duration::from_secs(1) }
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.available > 0 {
            self.available -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let tokens = (elapsed.as_secs_f64() * self.refill_rate as f64) as u32;

        if tokens > 0 {
            self.available = (self.available + tokens).min(self.max);
            self.last_refill = now;
            self.reset_at = now + Duration::from_secs(1);
        }
    }
}

/// Rate limit check outcome.
pub enum RateLimitResult {
    Allowed { remaining: u32, reset_at: Instant },
    Limited { retry_after: Duration },
}

/// `axum::middleware::from_fn_with_state` handler. Keys the bucket on
/// the caller's socket address; falls back to a shared "unknown" bucket
/// if the connection metadata is unavailable (e.g. behind a proxy that
/// doesn't forward `ConnectInfo`).
pub async fn rate_limit_layer(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Result<Response, CloudError> {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.rate_limiter.check(&key) {
        RateLimitResult::Allowed { .. } => Ok(next.run(request).await),
        RateLimitResult::Limited { .. } => Err(CloudError::RateLimited),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_limited() {
        let limiter = RateLimiter::new(RateLimitConfig { requests_per_second: 1, burst: 2 });
        assert!(matches!(limiter.check("client-a"), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check("client-a"), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check("client-a"), RateLimitResult::Limited { .. }));
    }

    #[test]
    fn distinct_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig { requests_per_second: 1, burst: 1 });
        assert!(matches!(limiter.check("client-a"), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check("client-b"), RateLimitResult::Allowed { .. }));
    }
}
