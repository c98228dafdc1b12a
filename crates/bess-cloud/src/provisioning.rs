//! Provisioning handler (spec §4.6, §6: "on receipt of
//! `lifo4/provisioning/register`, the coordinator (a) locates or
//! creates the `System` record keyed by `edge_id`, (b) re-emits (never
//! duplicates), (c) publishes the per-edge config ... at-least-once").

use bess_bus::{Publisher, Subscriber, Topic};
use bess_common::{AuditEventKind, Qos};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Store, SystemRegistration, UpsertOutcome};

/// Wire shape of `lifo4/provisioning/register` (spec §6 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMessage {
    pub edge_id: String,
    pub mac_address: String,
    pub hardware: String,
    pub software_version: String,
    pub ip_address: Option<String>,
    pub serial_number: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Wire shape of `lifo4/provisioning/{edge_id}/config` (spec §6 table).
/// `operational_policy` rides along in the table's trailing "..." -
/// tariff, demand limits, and grid-services/self-consumption inputs the
/// Decision Engine needs alongside `safety_limits` (spec §4.3 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub site_id: Uuid,
    pub system_id: Uuid,
    pub organization_id: Uuid,
    pub safety_limits: bess_common::SafetyProfile,
    #[serde(default)]
    pub operational_policy: bess_control::decision::OperationalPolicy,
}

/// Subscribes `lifo4/provisioning/register` and drives new-system
/// onboarding.
pub struct ProvisioningHandler<S: Store> {
    store: Arc<S>,
    bus: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
}

impl<S: Store + 'static> ProvisioningHandler<S> {
    pub fn new(store: Arc<S>, bus: Arc<dyn Publisher>, subscriber: Arc<dyn Subscriber>) -> Self {
        Self { store, bus, subscriber }
    }

    /// Subscribe and process registrations until the bus channel closes.
    pub async fn run(self) -> Result<(), bess_bus::BusError> {
        let mut rx = self.subscriber.subscribe(&Topic::ProvisioningRegister.to_string()).await?;
        while let Some(delivery) = rx.recv().await {
            let message: RegisterMessage = match serde_json::from_slice(&delivery.payload) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "malformed registration message, dropping");
                    continue;
                }
            };
            if let Err(e) = self.handle_register(message).await {
                warn!(error = %e, "failed to process registration");
            }
        }
        Ok(())
    }

    /// Locate-or-create, then publish per-edge config. Idempotent:
    /// re-registration of a known `edge_id` never creates a second
    /// `System` row (spec §8, Testable Property 5).
    pub async fn handle_register(&self, message: RegisterMessage) -> Result<(), crate::error::CloudError> {
        let edge_id = message.edge_id.clone();
        let (system, outcome) = self
            .store
            .upsert_system(SystemRegistration { edge_id: message.edge_id, software_version: message.software_version, ip_address: message.ip_address })
            .await?;

        let detail = serde_json::json!({
            "edge_id": edge_id,
            "mac_address": message.mac_address,
            "hardware": message.hardware,
            "serial_number": message.serial_number,
            "capabilities": message.capabilities,
            "outcome": matches!(outcome, UpsertOutcome::Created),
        });
        self.store.append_audit(system.system_id, AuditEventKind::Provisioning, "register", detail).await?;

        let config = ConfigMessage {
            site_id: system.site_id,
            system_id: system.system_id,
            organization_id: system.organization_id,
            safety_limits: system.safety_profile,
            operational_policy: bess_control::decision::OperationalPolicy::default(),
        };
        let payload = serde_json::to_vec(&config)?;
        self.bus.publish(&Topic::ProvisioningConfig { edge_id: system.edge_id.clone() }.to_string(), payload, Qos::AtLeastOnce).await?;

        self.store.mark_operational(system.system_id).await?;
        info!(system_id = %system.system_id, edge_id = %system.edge_id, created = outcome == UpsertOutcome::Created, "provisioned system");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use bess_bus::local::LocalBus;

    fn register(edge_id: &str) -> RegisterMessage {
        RegisterMessage {
            edge_id: edge_id.to_string(),
            mac_address: "00:11:22:33:44:55".into(),
            hardware: "lifo4-rack-v2".into(),
            software_version: "1.0.0".into(),
            ip_address: Some("10.0.0.10".into()),
            serial_number: "SN-0001".into(),
            capabilities: vec!["black_start".into()],
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn re_registration_does_not_duplicate_the_system() {
        let store = Arc::new(MemStore::new());
        let bus = Arc::new(LocalBus::new());
        let handler = ProvisioningHandler::new(store.clone(), bus.clone(), bus.clone());

        handler.handle_register(register("edge-7")).await.unwrap();
        handler.handle_register(register("edge-7")).await.unwrap();

        assert_eq!(store.list_systems().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registration_publishes_config_and_marks_operational() {
        let store = Arc::new(MemStore::new());
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("lifo4/provisioning/+/config").await.unwrap();
        let handler = ProvisioningHandler::new(store.clone(), bus.clone(), bus.clone());

        handler.handle_register(register("edge-9")).await.unwrap();

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let config: ConfigMessage = serde_json::from_slice(&delivery.payload).unwrap();
        let systems = store.list_systems().await.unwrap();
        assert_eq!(config.system_id, systems[0].system_id);
        assert_eq!(systems[0].status, bess_common::ProvisioningStatus::Operational);
    }
}
