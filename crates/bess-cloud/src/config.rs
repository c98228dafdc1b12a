//! Cloud Coordinator configuration, mirroring `bess_edge::EdgeConfig`'s
//! shape for the cloud side: identity/connectivity knobs plus the
//! shared `bess_common::RuntimeConfig` cadence bundle.

use bess_common::RuntimeConfig;
use serde::{Deserialize, Serialize};

/// Identity, listen address, database, and auth configuration for the
/// Cloud Coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// REST API bind address.
    pub http_addr: String,
    /// `postgres://...` connection string, consumed by `PgStore`/
    /// `PgTelemetryStore`. `None` runs the in-memory stores instead
    /// (used by the integration test harness and local demos).
    pub database_url: Option<String>,
    /// Secret used to sign/verify JWTs minted by `POST /auth/login`.
    pub jwt_secret: String,
    /// Token-bucket rate limit applied per client (spec §4.6, §7:
    /// "Capacity").
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    /// Shared bus/cadence knobs.
    pub runtime: RuntimeConfig,
}

impl CloudConfig {
    /// Load from a JSON file at `path`.
    pub fn load(path: &str) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save as pretty JSON to `path`.
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".into(),
            database_url: None,
            jwt_secret: "change-me-in-production".into(),
            rate_limit_per_second: 100,
            rate_limit_burst: 200,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let config = CloudConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CloudConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.http_addr, config.http_addr);
    }
}
