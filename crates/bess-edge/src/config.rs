//! Edge Controller configuration.

use bess_common::{RuntimeConfig, SafetyProfile};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which transport the BMS adapter speaks (spec §4.3 step 1: "Modbus
/// TCP/RTU, MQTT, or vendor HTTP"). No Modbus crate exists anywhere in
/// this stack's dependency corpus, so that variant is a label on a
/// still-unimplemented transport rather than a fabricated dependency -
/// see `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum BmsTransport {
    /// Vendor REST/HTTP adapter, the one transport this crate actually
    /// implements (via `reqwest`).
    Http { base_url: String },
    /// Synthetic BMS for demos and integration tests; no network I/O.
    Simulated,
}

/// Identity, connectivity, and safety configuration for one edge
/// process (spec §3's `System` plus the ambient runtime knobs of
/// `bess_common::RuntimeConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Identity of the physical BESS this process controls.
    pub system_id: Uuid,
    /// Stable identifier presented during provisioning, before
    /// `system_id` is assigned by the cloud.
    pub edge_id: String,
    pub organization_id: Uuid,
    /// Cached safety-limit profile (refreshed from provisioning config).
    pub safety_profile: SafetyProfile,
    pub bms: BmsTransport,
    /// Local health/status HTTP listen address.
    pub local_api_addr: String,
    /// Shared cadence, bus, and buffer knobs.
    pub runtime: RuntimeConfig,
}

impl EdgeConfig {
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

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            system_id: Uuid::nil(),
            edge_id: String::new(),
            organization_id: Uuid::nil(),
            safety_profile: SafetyProfile::new(10.0, 90.0, -10.0, 45.0, 60.0, 40.0, 58.0, 100.0, 100.0, 50.0)
                .expect("default safety profile is internally consistent"),
            bms: BmsTransport::Simulated,
            local_api_addr: "0.0.0.0:8090".into(),
            runtime: RuntimeConfig::default(),
        }
    }
}
