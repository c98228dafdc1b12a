//! BMS adapter (spec §4.3 step 1: "Sample BMS via its physical adapter -
//! Modbus TCP/RTU, MQTT, or vendor HTTP").
//!
//! One narrow trait behind which any transport can sit, matching this
//! stack's habit of stubbing hardware-adjacent integration points (the
//! teacher's `ha.rs` logs the VRRP/state-sync steps it would take
//! without actually opening a socket) while keeping the calling code
//! real. No Modbus crate exists anywhere in this corpus, so that
//! transport is deliberately not implemented rather than invented as a
//! fake dependency; `HttpBmsAdapter` is the one real implementation,
//! `SimulatedBmsAdapter` the test/demo stand-in.

use async_trait::async_trait;
use bess_common::{BmsMode, CellBreakdown, TelemetrySample};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::EdgeError;

/// A command actually issued to the physical battery.
#[derive(Debug, Clone, Copy)]
pub struct Actuation {
    pub mode: BmsMode,
    pub power_kw: f64,
}

/// Transport-agnostic interface to one physical BMS.
#[async_trait]
pub trait BmsAdapter: Send + Sync {
    /// Sample the current state, normalized into a [`TelemetrySample`]
    /// (spec §4.3 steps 1-2).
    async fn sample(&self) -> Result<TelemetrySample, EdgeError>;

    /// Issue a vendor-specific actuation (spec §4.3 step 5).
    async fn actuate(&self, actuation: Actuation) -> Result<(), EdgeError>;
}

/// Vendor HTTP BMS adapter. Polls a `GET {base_url}/telemetry` for
/// readings and issues actuations as `POST {base_url}/actuate`.
pub struct HttpBmsAdapter {
    client: reqwest::Client,
    base_url: String,
    system_id: Uuid,
    next_seq: AtomicU64,
}

impl HttpBmsAdapter {
    pub fn new(base_url: String, system_id: Uuid) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .expect("reqwest client builds with static config"),
            base_url,
            system_id,
            next_seq: AtomicU64::new(0),
        }
    }
}

#[derive(serde::Deserialize)]
struct RawReading {
    mode: BmsMode,
    soc: f64,
    voltage: f64,
    current: f64,
    power: f64,
    temperature: f64,
    cell_breakdown: Option<CellBreakdown>,
}

#[async_trait]
impl BmsAdapter for HttpBmsAdapter {
    async fn sample(&self) -> Result<TelemetrySample, EdgeError> {
        let reading: RawReading = self
            .client
            .get(format!("{}/telemetry", self.base_url))
            .send()
            .await
            .map_err(|e| EdgeError::Bms(e.to_string()))?
            .json()
            .await
            .map_err(|e| EdgeError::Bms(e.to_string()))?;

        Ok(TelemetrySample {
            system_id: self.system_id,
            monotonic_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            wall_ts: chrono::Utc::now(),
            mode: reading.mode,
            soc: reading.soc,
            voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
            temperature: reading.temperature,
            cell_breakdown: reading.cell_breakdown,
        })
    }

    async fn actuate(&self, actuation: Actuation) -> Result<(), EdgeError> {
        #[derive(serde::Serialize)]
        struct ActuateRequest {
            mode: BmsMode,
            power_kw: f64,
        }

        self.client
            .post(format!("{}/actuate", self.base_url))
            .json(&ActuateRequest { mode: actuation.mode, power_kw: actuation.power_kw })
            .send()
            .await
            .map_err(|e| EdgeError::Bms(e.to_string()))?
            .error_for_status()
            .map_err(|e| EdgeError::Bms(e.to_string()))?;
        Ok(())
    }
}

struct SimState {
    mode: BmsMode,
    soc: f64,
    voltage: f64,
    current: f64,
    power: f64,
    temperature: f64,
}

/// In-process synthetic BMS. Applies actuations to its own state so
/// demos and integration tests see plausible feedback (SOC moving in
/// the direction of charge/discharge) without any network I/O.
pub struct SimulatedBmsAdapter {
    system_id: Uuid,
    state: RwLock<SimState>,
    next_seq: AtomicU64,
}

impl SimulatedBmsAdapter {
    pub fn new(system_id: Uuid, initial_soc: f64) -> Self {
        Self {
            system_id,
            state: RwLock::new(SimState {
                mode: BmsMode::Idle,
                soc: initial_soc,
                voltage: 48.0,
                current: 0.0,
                power: 0.0,
                temperature: 25.0,
            }),
            next_seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BmsAdapter for SimulatedBmsAdapter {
    async fn sample(&self) -> Result<TelemetrySample, EdgeError> {
        let state = self.state.read();
        Ok(TelemetrySample {
            system_id: self.system_id,
            monotonic_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            wall_ts: chrono::Utc::now(),
            mode: state.mode,
            soc: state.soc,
            voltage: state.voltage,
            current: state.current,
            power: state.power,
            temperature: state.temperature,
            cell_breakdown: None,
        })
    }

    async fn actuate(&self, actuation: Actuation) -> Result<(), EdgeError> {
        let mut state = self.state.write();
        state.mode = actuation.mode;
        state.power = actuation.power_kw;
        // Crude SOC integration: treat power_kw as a fraction-per-tick
        // drain/fill, enough to make a demo/test see movement.
        let delta = match actuation.mode {
            BmsMode::Charging => actuation.power_kw.abs() * 0.01,
            BmsMode::Discharging => -actuation.power_kw.abs() * 0.01,
            _ => 0.0,
        };
        state.soc = (state.soc + delta).clamp(0.0, 100.0);
        state.current = actuation.power_kw / state.voltage.max(1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_adapter_charges_soc_upward() {
        let adapter = SimulatedBmsAdapter::new(Uuid::new_v4(), 50.0);
        adapter
            .actuate(Actuation { mode: BmsMode::Charging, power_kw: 10.0 })
            .await
            .unwrap();
        let sample = adapter.sample().await.unwrap();
        assert!(sample.soc > 50.0);
        assert_eq!(sample.mode, BmsMode::Charging);
    }

    #[tokio::test]
    async fn simulated_adapter_discharges_soc_downward() {
        let adapter = SimulatedBmsAdapter::new(Uuid::new_v4(), 50.0);
        adapter
            .actuate(Actuation { mode: BmsMode::Discharging, power_kw: 10.0 })
            .await
            .unwrap();
        let sample = adapter.sample().await.unwrap();
        assert!(sample.soc < 50.0);
    }

    #[tokio::test]
    async fn monotonic_seq_increases_across_samples() {
        let adapter = SimulatedBmsAdapter::new(Uuid::new_v4(), 50.0);
        let a = adapter.sample().await.unwrap();
        let b = adapter.sample().await.unwrap();
        assert!(b.monotonic_seq > a.monotonic_seq);
    }
}
