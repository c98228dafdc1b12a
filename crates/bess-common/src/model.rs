//! Core data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provisioning status of a `System`, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningStatus {
    Unregistered,
    Provisioning,
    Operational,
    Quarantined,
}

impl ProvisioningStatus {
    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Quarantine can be entered from any state and is cleared back to
    /// `Operational` only explicitly; `Unregistered` is the only state a
    /// system starts in and can never be re-entered.
    pub fn can_transition_to(self, next: ProvisioningStatus) -> bool {
        use ProvisioningStatus::*;
        match (self, next) {
            (_, Unregistered) => false,
            (Unregistered, Provisioning) => true,
            (Provisioning, Operational) => true,
            (Provisioning, Quarantined) => true,
            (Operational, Quarantined) => true,
            (Quarantined, Operational) => true,
            (same, next) if same == next => true,
            _ => false,
        }
    }
}

/// Identity and provisioning record for one physical BESS (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub system_id: Uuid,
    pub edge_id: String,
    pub organization_id: Uuid,
    pub site_id: Uuid,
    pub status: ProvisioningStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub software_version: String,
    pub ip_address: Option<String>,
    pub safety_profile: SafetyProfile,
    pub created_at: DateTime<Utc>,
}

/// Safety-limit profile for one system (spec §3).
///
/// Invariants (`soc_min < soc_max`, `temp_min < temp_max < temp_critical`,
/// all currents positive) are checked once at construction via
/// [`SafetyProfile::new`] rather than at every call site that reads a
/// field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafetyProfile {
    pub soc_min: f64,
    pub soc_max: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub temp_critical: f64,
    pub voltage_min: f64,
    pub voltage_max: f64,
    pub current_max_charge: f64,
    pub current_max_discharge: f64,
    pub power_max: f64,
}

/// Error returned when a [`SafetyProfile`] would violate its invariants.
#[derive(Debug, thiserror::Error)]
pub enum SafetyProfileError {
    #[error("soc_min ({0}) must be < soc_max ({1})")]
    SocRange(f64, f64),
    #[error("temp_min ({0}) must be < temp_max ({1}) must be < temp_critical ({2})")]
    TempRange(f64, f64, f64),
    #[error("voltage_min ({0}) must be < voltage_max ({1})")]
    VoltageRange(f64, f64),
    #[error("currents and power_max must be positive")]
    NonPositiveLimit,
}

impl SafetyProfile {
    /// Construct a profile, validating all invariants from spec §3.
    pub fn new(
        soc_min: f64,
        soc_max: f64,
        temp_min: f64,
        temp_max: f64,
        temp_critical: f64,
        voltage_min: f64,
        voltage_max: f64,
        current_max_charge: f64,
        current_max_discharge: f64,
        power_max: f64,
    ) -> Result<Self, SafetyProfileError> {
        if soc_min >= soc_max {
            return Err(SafetyProfileError::SocRange(soc_min, soc_max));
        }
        if !(temp_min < temp_max && temp_max < temp_critical) {
            return Err(SafetyProfileError::TempRange(temp_min, temp_max, temp_critical));
        }
        if voltage_min >= voltage_max {
            return Err(SafetyProfileError::VoltageRange(voltage_min, voltage_max));
        }
        if current_max_charge <= 0.0 || current_max_discharge <= 0.0 || power_max <= 0.0 {
            return Err(SafetyProfileError::NonPositiveLimit);
        }
        Ok(Self {
            soc_min,
            soc_max,
            temp_min,
            temp_max,
            temp_critical,
            voltage_min,
            voltage_max,
            current_max_charge,
            current_max_discharge,
            power_max,
        })
    }
}

/// BMS operating mode, part of a [`TelemetrySample`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmsMode {
    Idle,
    Charging,
    Discharging,
    Standby,
    EmergencyStop,
}

/// Per-cell voltage/temperature breakdown, attached to a telemetry
/// sample when the BMS adapter can supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellBreakdown {
    pub cell_voltages: Vec<f64>,
    pub cell_temperatures: Vec<f64>,
}

/// Telemetry sample (spec §3).
///
/// `monotonic_seq` is strictly increasing per system; duplicates must be
/// discarded by every downstream consumer (edge buffer drain, cloud
/// ingestion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub system_id: Uuid,
    pub monotonic_seq: u64,
    pub wall_ts: DateTime<Utc>,
    pub mode: BmsMode,
    pub soc: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub cell_breakdown: Option<CellBreakdown>,
}

/// Command kind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Charge,
    Discharge,
    Idle,
    EmergencyStop,
    SetMode,
}

/// Command parameters, shaped as a tagged union so unknown/malformed
/// variants are rejected at deserialization rather than partially parsed
/// (per the design notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    pub target_soc: Option<f64>,
    pub max_power_kw: Option<f64>,
    pub mode: Option<BmsMode>,
    pub reason: Option<String>,
}

/// A command issued to one system (spec §3).
///
/// Idempotency is keyed on `command_id`: re-delivery of the same id must
/// yield exactly one actuation and exactly one audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub system_id: Uuid,
    pub kind: CommandKind,
    pub params: CommandParams,
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: chrono::Duration,
}

/// Source of a [`Decision`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    Cloud,
    Cached,
    Local,
    Safety,
}

/// Selected intent (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    GridService,
    PeakShave,
    Arbitrage,
    SelfConsume,
    Idle,
    SafetyHold,
}

/// A decision produced by the Decision Engine and trimmed by the Safety
/// Manager (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub intent: Intent,
    pub target_power_kw: f64,
    pub source: DecisionSource,
    pub reason: String,
    pub generated_at: DateTime<Utc>,
}

/// Kind of audit-logged occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Command,
    Decision,
    SafetyVeto,
    FsmTransition,
    Provisioning,
    ModeChange,
}

/// Append-only audit record (spec §3).
///
/// Every accepted command, safety veto/trim, FSM transition, decision
/// applied, and provisioning outcome produces exactly one of these
/// (Testable Property 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub system_id: Uuid,
    pub kind: AuditEventKind,
    pub action: String,
    pub detail: serde_json::Value,
    pub producer_seq: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Kind of payload stored in a [`BufferEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferEntryKind {
    Telemetry,
    Event,
}

/// One durable-buffer entry (spec §3, §4.2).
///
/// FIFO by `seq`; deleted only after the cloud ingestion layer
/// acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferEntry {
    pub seq: u64,
    pub kind: BufferEntryKind,
    pub payload_bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Alarm record (supplements the distillation - spec §7 names severities
/// but never gives them a storable shape; `/systems/{id}/alarms` needs
/// one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Uuid,
    pub system_id: Uuid,
    pub severity: crate::error::Severity,
    pub code: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Quality of service level for a bus publish (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Envelope for everything an edge process drains out of its Durable
/// Buffer onto the `telemetry` topic (spec §6 names no separate
/// edge-originated event channel, so buffered audit events piggyback
/// on the one outbound data channel the edge has; the cloud ingester
/// demuxes on this tag before writing to the time-series store or the
/// audit log respectively).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEnvelope {
    /// A normal telemetry sample, written to the time-series store.
    Sample(TelemetrySample),
    /// An edge-originated occurrence (mode change, FSM transition),
    /// written to the audit log.
    Event(AuditEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_profile_rejects_inverted_soc_range() {
        let err = SafetyProfile::new(80.0, 20.0, 0.0, 45.0, 60.0, 40.0, 58.0, 100.0, 100.0, 50.0)
            .unwrap_err();
        assert!(matches!(err, SafetyProfileError::SocRange(_, _)));
    }

    #[test]
    fn safety_profile_rejects_nonpositive_current() {
        let err = SafetyProfile::new(20.0, 80.0, 0.0, 45.0, 60.0, 40.0, 58.0, -1.0, 100.0, 50.0)
            .unwrap_err();
        assert!(matches!(err, SafetyProfileError::NonPositiveLimit));
    }

    #[test]
    fn safety_profile_accepts_valid_ranges() {
        assert!(SafetyProfile::new(20.0, 80.0, 0.0, 45.0, 60.0, 40.0, 58.0, 100.0, 100.0, 50.0).is_ok());
    }

    #[test]
    fn provisioning_status_cannot_revert_to_unregistered() {
        assert!(!ProvisioningStatus::Operational.can_transition_to(ProvisioningStatus::Unregistered));
    }

    #[test]
    fn provisioning_status_quarantine_clears_to_operational() {
        assert!(ProvisioningStatus::Quarantined.can_transition_to(ProvisioningStatus::Operational));
    }

    proptest::proptest! {
        /// `SafetyProfile::new` must classify every input the same way
        /// its documented invariants describe, for arbitrary (not just
        /// hand-picked) bounds - the validation a `SafetyProfile` carries
        /// for the rest of the crate is only as good as this constructor.
        #[test]
        fn safety_profile_construction_matches_its_invariants(
            soc_min in -50.0..150.0_f64,
            soc_max in -50.0..150.0_f64,
            temp_min in -50.0..150.0_f64,
            temp_max in -50.0..150.0_f64,
            temp_critical in -50.0..150.0_f64,
            voltage_min in -50.0..150.0_f64,
            voltage_max in -50.0..150.0_f64,
            current_max_charge in -10.0..200.0_f64,
            current_max_discharge in -10.0..200.0_f64,
            power_max in -10.0..200.0_f64,
        ) {
            let result = SafetyProfile::new(
                soc_min, soc_max, temp_min, temp_max, temp_critical,
                voltage_min, voltage_max, current_max_charge, current_max_discharge, power_max,
            );
            let expect_ok = soc_min < soc_max
                && temp_min < temp_max
                && temp_max < temp_critical
                && voltage_min < voltage_max
                && current_max_charge > 0.0
                && current_max_discharge > 0.0
                && power_max > 0.0;
            proptest::prop_assert_eq!(result.is_ok(), expect_ok);
        }
    }
}
