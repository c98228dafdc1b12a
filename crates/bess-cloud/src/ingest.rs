//! Telemetry ingester (spec §4.6: "consume every message on
//! `lifo4/+/telemetry`, deduplicate on `(system_id, monotonic_seq)`,
//! and write to a time-series store").
//!
//! Also demuxes the edge-originated [`bess_common::TelemetryEnvelope::Event`]
//! variant (mode changes, FSM transitions piggybacked on the telemetry
//! channel per `bess_common::model`'s doc comment) into the audit log,
//! and updates the cloud's mirrored Black-Start state when an
//! `FsmTransition` event arrives.

use bess_bus::{Subscriber, TELEMETRY_WILDCARD};
use bess_common::{AuditEventKind, TelemetryEnvelope};
use std::sync::Arc;
use tracing::warn;

use crate::store::Store;
use crate::telemetry_store::TelemetryStore;

/// Subscribes `lifo4/+/telemetry` and demuxes samples/events into the
/// telemetry store and audit log.
pub struct TelemetryIngester<S: Store, T: TelemetryStore> {
    store: Arc<S>,
    telemetry: Arc<T>,
    subscriber: Arc<dyn Subscriber>,
}

impl<S: Store + 'static, T: TelemetryStore + 'static> TelemetryIngester<S, T> {
    pub fn new(store: Arc<S>, telemetry: Arc<T>, subscriber: Arc<dyn Subscriber>) -> Self {
        Self { store, telemetry, subscriber }
    }

    /// Subscribe and process deliveries until the bus channel closes.
    pub async fn run(self) -> Result<(), bess_bus::BusError> {
        let mut rx = self.subscriber.subscribe(TELEMETRY_WILDCARD).await?;
        while let Some(delivery) = rx.recv().await {
            let envelope: TelemetryEnvelope = match serde_json::from_slice(&delivery.payload) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, topic = %delivery.topic, "malformed telemetry envelope, dropping");
                    continue;
                }
            };
            if let Err(e) = self.handle_envelope(envelope).await {
                warn!(error = %e, "failed to ingest telemetry envelope");
            }
        }
        Ok(())
    }

    async fn handle_envelope(&self, envelope: TelemetryEnvelope) -> Result<(), crate::error::CloudError> {
        match envelope {
            TelemetryEnvelope::Sample(sample) => {
                self.telemetry.insert_if_new(sample.clone()).await?;
                self.store.touch_last_seen(sample.system_id).await?;
            }
            TelemetryEnvelope::Event(event) => {
                if event.kind == AuditEventKind::FsmTransition {
                    if let Some(state) = event.detail.get("to_state").and_then(|v| v.as_str()) {
                        self.store.set_blackstart_state(event.system_id, state.to_string(), event.recorded_at).await?;
                    }
                }
                self.store.append_audit_from_edge(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::telemetry_store::MemTelemetryStore;
    use bess_bus::local::LocalBus;
    use bess_bus::Publisher;
    use bess_common::{AuditEvent, BmsMode, Qos, TelemetrySample};
    use uuid::Uuid;

    fn sample(system_id: Uuid, seq: u64) -> TelemetrySample {
        TelemetrySample {
            system_id,
            monotonic_seq: seq,
            wall_ts: chrono::Utc::now(),
            mode: BmsMode::Idle,
            soc: 50.0,
            voltage: 400.0,
            current: 0.0,
            power: 0.0,
            temperature: 25.0,
            cell_breakdown: None,
        }
    }

    #[tokio::test]
    async fn duplicate_sample_is_ingested_once() {
        let store = Arc::new(MemStore::new());
        let telemetry = Arc::new(MemTelemetryStore::new());
        let bus = Arc::new(LocalBus::new());
        let ingester = TelemetryIngester::new(store.clone(), telemetry.clone(), bus.clone());
        let system_id = Uuid::new_v4();

        ingester.handle_envelope(TelemetryEnvelope::Sample(sample(system_id, 1))).await.unwrap();
        ingester.handle_envelope(TelemetryEnvelope::Sample(sample(system_id, 1))).await.unwrap();

        assert_eq!(telemetry.count_for_system(system_id).await.unwrap(), 1);
        let _ = bus;
    }

    #[tokio::test]
    async fn fsm_transition_event_updates_blackstart_mirror() {
        let store = Arc::new(MemStore::new());
        let telemetry = Arc::new(MemTelemetryStore::new());
        let bus = Arc::new(LocalBus::new());
        let ingester = TelemetryIngester::new(store.clone(), telemetry, bus);
        let system_id = Uuid::new_v4();

        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            system_id,
            kind: AuditEventKind::FsmTransition,
            action: "transition".into(),
            detail: serde_json::json!({"from_state": "Blackout", "to_state": "Sync"}),
            producer_seq: 0,
            recorded_at: chrono::Utc::now(),
        };
        ingester.handle_envelope(TelemetryEnvelope::Event(event)).await.unwrap();

        let (state, _) = store.get_blackstart_state(system_id).await.unwrap().unwrap();
        assert_eq!(state, "Sync");
    }

    #[tokio::test]
    async fn run_consumes_deliveries_from_the_wildcard_subscription() {
        let store = Arc::new(MemStore::new());
        let telemetry = Arc::new(MemTelemetryStore::new());
        let bus = Arc::new(LocalBus::new());
        let ingester = TelemetryIngester::new(store.clone(), telemetry.clone(), bus.clone());
        let system_id = Uuid::new_v4();

        let handle = tokio::spawn(ingester.run());
        let payload = serde_json::to_vec(&TelemetryEnvelope::Sample(sample(system_id, 1))).unwrap();
        bus.publish(&format!("lifo4/{system_id}/telemetry"), payload, Qos::AtLeastOnce).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(telemetry.count_for_system(system_id).await.unwrap(), 1);
        handle.abort();
    }
}
