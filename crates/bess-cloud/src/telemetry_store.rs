//! Time-series storage for telemetry samples (spec §4.6, §6).
//!
//! Separated from [`crate::store::Store`] because its access pattern
//! differs: high write volume, dedup on `(system_id, monotonic_seq)`
//! rather than primary-key upsert, and reads driven by "latest sample"
//! rather than by id. Mirrors the way `bess_edge::control` keeps its
//! buffer and its control-loop state in separate types rather than one
//! do-everything struct.

use async_trait::async_trait;
use bess_common::TelemetrySample;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CloudError;

/// Telemetry persistence surface.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert a sample if `(system_id, monotonic_seq)` has not been seen
    /// before. Returns `true` if it was newly inserted (spec §8,
    /// Testable Property 3: "telemetry conservation").
    async fn insert_if_new(&self, sample: TelemetrySample) -> Result<bool, CloudError>;

    /// Most recent sample for a system, used by the cloud-side decision
    /// mirror and by `GET /systems/{id}/telemetry/latest`.
    async fn latest(&self, system_id: Uuid) -> Result<Option<TelemetrySample>, CloudError>;

    /// Count of distinct samples stored for a system (used by tests to
    /// assert dedup held).
    async fn count_for_system(&self, system_id: Uuid) -> Result<u64, CloudError>;
}

/// In-memory `TelemetryStore`.
#[derive(Default)]
pub struct MemTelemetryStore {
    seen: DashMap<(Uuid, u64), ()>,
    latest: DashMap<Uuid, TelemetrySample>,
}

impl MemTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for MemTelemetryStore {
    async fn insert_if_new(&self, sample: TelemetrySample) -> Result<bool, CloudError> {
        let key = (sample.system_id, sample.monotonic_seq);
        if self.seen.contains_key(&key) {
            return Ok(false);
        }
        self.seen.insert(key, ());
        let is_newer = self.latest.get(&sample.system_id).map(|e| sample.monotonic_seq > e.monotonic_seq).unwrap_or(true);
        if is_newer {
            self.latest.insert(sample.system_id, sample);
        }
        Ok(true)
    }

    async fn latest(&self, system_id: Uuid) -> Result<Option<TelemetrySample>, CloudError> {
        Ok(self.latest.get(&system_id).map(|e| e.clone()))
    }

    async fn count_for_system(&self, system_id: Uuid) -> Result<u64, CloudError> {
        Ok(self.seen.iter().filter(|e| e.key().0 == system_id).count() as u64)
    }
}

/// `sqlx`/Postgres-backed `TelemetryStore`. Dedup is enforced by a unique
/// index on `(system_id, monotonic_seq)` plus `ON CONFLICT DO NOTHING`,
/// so concurrent ingesters racing on the same sample cannot double-count.
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry_samples (
                system_id UUID NOT NULL,
                monotonic_seq BIGINT NOT NULL,
                wall_ts TIMESTAMPTZ NOT NULL,
                mode TEXT NOT NULL,
                soc DOUBLE PRECISION NOT NULL,
                voltage DOUBLE PRECISION NOT NULL,
                current DOUBLE PRECISION NOT NULL,
                power DOUBLE PRECISION NOT NULL,
                temperature DOUBLE PRECISION NOT NULL,
                cell_breakdown JSONB,
                PRIMARY KEY (system_id, monotonic_seq)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn mode_str(m: bess_common::BmsMode) -> &'static str {
    use bess_common::BmsMode::*;
    match m {
        Idle => "idle",
        Charging => "charging",
        Discharging => "discharging",
        Standby => "standby",
        EmergencyStop => "emergency_stop",
    }
}

fn parse_mode(s: &str) -> Option<bess_common::BmsMode> {
    use bess_common::BmsMode::*;
    match s {
        "idle" => Some(Idle),
        "charging" => Some(Charging),
        "discharging" => Some(Discharging),
        "standby" => Some(Standby),
        "emergency_stop" => Some(EmergencyStop),
        _ => None,
    }
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    system_id: Uuid,
    monotonic_seq: i64,
    wall_ts: chrono::DateTime<chrono::Utc>,
    mode: String,
    soc: f64,
    voltage: f64,
    current: f64,
    power: f64,
    temperature: f64,
    cell_breakdown: Option<serde_json::Value>,
}

impl SampleRow {
    fn into_sample(self) -> Result<TelemetrySample, CloudError> {
        let mode = parse_mode(&self.mode).ok_or_else(|| CloudError::Storage(format!("unknown bms mode {}", self.mode)))?;
        let cell_breakdown = self
            .cell_breakdown
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(TelemetrySample {
            system_id: self.system_id,
            monotonic_seq: self.monotonic_seq as u64,
            wall_ts: self.wall_ts,
            mode,
            soc: self.soc,
            voltage: self.voltage,
            current: self.current,
            power: self.power,
            temperature: self.temperature,
            cell_breakdown,
        })
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert_if_new(&self, sample: TelemetrySample) -> Result<bool, CloudError> {
        let cell_breakdown = sample
            .cell_breakdown
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CloudError::Storage(e.to_string()))?;
        let result = sqlx::query(
            r#"INSERT INTO telemetry_samples
               (system_id, monotonic_seq, wall_ts, mode, soc, voltage, current, power, temperature, cell_breakdown)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (system_id, monotonic_seq) DO NOTHING"#,
        )
        .bind(sample.system_id)
        .bind(sample.monotonic_seq as i64)
        .bind(sample.wall_ts)
        .bind(mode_str(sample.mode))
        .bind(sample.soc)
        .bind(sample.voltage)
        .bind(sample.current)
        .bind(sample.power)
        .bind(sample.temperature)
        .bind(cell_breakdown)
        .execute(&self.pool)
        .await
        .map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn latest(&self, system_id: Uuid) -> Result<Option<TelemetrySample>, CloudError> {
        let row = sqlx::query_as::<_, SampleRow>(
            "SELECT * FROM telemetry_samples WHERE system_id = $1 ORDER BY monotonic_seq DESC LIMIT 1",
        )
        .bind(system_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CloudError::Storage(e.to_string()))?;
        row.map(SampleRow::into_sample).transpose()
    }

    async fn count_for_system(&self, system_id: Uuid) -> Result<u64, CloudError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM telemetry_samples WHERE system_id = $1")
            .bind(system_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}

/// Shared handle type route handlers take: any `TelemetryStore` impl
/// behind an `Arc`.
pub type SharedTelemetryStore = Arc<dyn TelemetryStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use bess_common::BmsMode;

    fn sample(system_id: Uuid, seq: u64) -> TelemetrySample {
        TelemetrySample {
            system_id,
            monotonic_seq: seq,
            wall_ts: fixed_timestamp(),
            mode: BmsMode::Idle,
            soc: 50.0,
            voltage: 400.0,
            current: 0.0,
            power: 0.0,
            temperature: 25.0,
            cell_breakdown: None,
        }
    }

    fn fixed_timestamp() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn duplicate_monotonic_seq_is_not_double_counted() {
        let store = MemTelemetryStore::new();
        let system_id = Uuid::new_v4();
        assert!(store.insert_if_new(sample(system_id, 1)).await.unwrap());
        assert!(!store.insert_if_new(sample(system_id, 1)).await.unwrap());
        assert_eq!(store.count_for_system(system_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_tracks_highest_monotonic_seq_regardless_of_arrival_order() {
        let store = MemTelemetryStore::new();
        let system_id = Uuid::new_v4();
        store.insert_if_new(sample(system_id, 5)).await.unwrap();
        store.insert_if_new(sample(system_id, 2)).await.unwrap();
        let latest = store.latest(system_id).await.unwrap().unwrap();
        assert_eq!(latest.monotonic_seq, 5);
    }
}
