//! The fixed-cadence control loop (spec §4.3).
//!
//! Three independent tickers share one [`EdgeController`]: control
//! decisions at `runtime.control_loop_interval` (5 Hz), telemetry
//! publication at `runtime.telemetry_interval` (0.2 Hz), and heartbeats
//! at `runtime.heartbeat_publish_interval` (1 Hz). Grounded in the
//! teacher's `OpenSASEEdge::run`, which raced a fixed set of
//! long-lived tasks with `tokio::select!`; here the three cadences race
//! inside one task instead of three, since they all read the same
//! mutable state (telemetry cache, mode, latch).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bess_bus::{Publisher, Subscriber, Topic};
use bess_buffer::DurableBuffer;
use bess_common::{
    AuditEvent, AuditEventKind, BmsMode, BufferEntryKind, Command, CommandKind, DecisionSource,
    Intent, Qos, TelemetryEnvelope, TelemetrySample,
};
use bess_control::blackstart::{BlackStartFsm, GridReading};
use bess_control::decision::{decide, DecisionInputs, GridPresence, GridServiceEvent, OperationalPolicy};
use bess_control::safety::{enforce, LatchState};
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::bms::{Actuation, BmsAdapter};
use crate::config::EdgeConfig;
use crate::EdgeError;

/// Edge operating mode (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    Online,
    Autonomous,
    SafeMode,
    Error,
}

/// Nominal grid frequency assumed for all sites (spec §4.7 gives no
/// per-site override point, only the ±0.1 Hz tolerance band).
const NOMINAL_FREQUENCY_HZ: f64 = 60.0;

/// Wire shape of `lifo4/{system_id}/grid/event` (spec §6).
#[derive(Debug, serde::Deserialize)]
struct GridEventMessage {
    event: GridEventKind,
    grid_voltage: f64,
    grid_frequency: f64,
}

#[derive(Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum GridEventKind {
    Blackout,
    GridRestored,
}

fn parse_grid_event(payload: &[u8]) -> Result<GridReading, serde_json::Error> {
    let msg: GridEventMessage = serde_json::from_slice(payload)?;
    let grid_present = msg.event == GridEventKind::GridRestored;
    let voltage_nominal = (207.0..=253.0).contains(&msg.grid_voltage);
    let frequency_nominal = (msg.grid_frequency - NOMINAL_FREQUENCY_HZ).abs() <= bess_control::blackstart::FREQUENCY_TOLERANCE_HZ;
    Ok(GridReading {
        grid_present,
        grid_voltage_nominal: voltage_nominal,
        grid_frequency_nominal: frequency_nominal,
        output_frequency_hz: msg.grid_frequency,
        nominal_frequency_hz: NOMINAL_FREQUENCY_HZ,
        timestamp: Utc::now(),
    })
}

/// Wire shape of `lifo4/{system_id}/demand` (spec §6, meter → edge).
#[derive(Debug, serde::Deserialize)]
struct DemandMessage {
    demand_kw: f64,
}

fn parse_demand(payload: &[u8]) -> Result<f64, serde_json::Error> {
    let msg: DemandMessage = serde_json::from_slice(payload)?;
    Ok(msg.demand_kw)
}

/// Wire shape of `lifo4/provisioning/{edge_id}/config` (spec §6) that
/// this crate cares about. Mirrors `bess-cloud`'s `ConfigMessage`
/// without depending on that binary crate; `#[serde(default)]` keeps
/// this tolerant of a cloud build that predates `operational_policy`.
#[derive(Debug, serde::Deserialize)]
struct ProvisioningConfigMessage {
    #[serde(default)]
    operational_policy: OperationalPolicy,
}

/// How many recently-applied `command_id`s to remember for dedup (spec
/// §3, Testable Property 4: a redelivered command must not actuate
/// twice). Bounded so a long-lived process doesn't grow this set
/// unboundedly; redelivery past this many distinct commands is not
/// expected to happen given the bus's QoS and the command TTL.
const RECENT_COMMAND_CAPACITY: usize = 256;

struct Inner {
    mode: EdgeMode,
    latch: LatchState,
    cached_policy: OperationalPolicy,
    /// Most recent meter reading off `lifo4/{system_id}/demand`. Stays at
    /// the last-known value across cloud outages, same as `cached_policy`
    /// (spec §4.3: decisions run against "last-known-good" inputs).
    latest_demand_kw: f64,
    /// Most recent grid-presence observation, fed to the Decision
    /// Engine's step-2 black-start check (spec §4.5) independently of
    /// the Black-Start FSM's own hysteresis-gated state machine.
    grid_present: bool,
    last_cloud_contact: chrono::DateTime<Utc>,
    last_telemetry: Option<TelemetrySample>,
    missed_heartbeats: u32,
    recent_command_ids: VecDeque<Uuid>,
}

/// One control instance per physical BESS (spec §4.3).
pub struct EdgeController {
    config: EdgeConfig,
    bms: Arc<dyn BmsAdapter>,
    publisher: Arc<dyn Publisher>,
    buffer: Arc<DurableBuffer>,
    blackstart: BlackStartFsm,
    inner: RwLock<Inner>,
}

impl EdgeController {
    pub fn new(config: EdgeConfig, bms: Arc<dyn BmsAdapter>, publisher: Arc<dyn Publisher>, buffer: Arc<DurableBuffer>) -> Self {
        Self {
            config,
            bms,
            publisher,
            buffer,
            blackstart: BlackStartFsm::new(),
            inner: RwLock::new(Inner {
                mode: EdgeMode::Online,
                latch: LatchState::default(),
                cached_policy: OperationalPolicy::default(),
                latest_demand_kw: 0.0,
                grid_present: true,
                last_cloud_contact: Utc::now(),
                last_telemetry: None,
                missed_heartbeats: 0,
                recent_command_ids: VecDeque::with_capacity(RECENT_COMMAND_CAPACITY),
            }),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> EdgeMode {
        self.inner.read().mode
    }

    /// Run all three cadences until the commands subscription closes or
    /// an unrecoverable error terminates the loop.
    pub async fn run(self: Arc<Self>, subscriber: Arc<dyn Subscriber>) -> Result<(), EdgeError> {
        let commands_topic = Topic::Commands { system_id: self.config.system_id.to_string() }.to_string();
        let mut commands_rx = subscriber.subscribe(&commands_topic).await?;

        let grid_topic = Topic::GridEvent { system_id: self.config.system_id.to_string() }.to_string();
        let mut grid_rx = subscriber.subscribe(&grid_topic).await?;

        let demand_topic = Topic::Demand { system_id: self.config.system_id.to_string() }.to_string();
        let mut demand_rx = subscriber.subscribe(&demand_topic).await?;

        let config_topic = Topic::ProvisioningConfig { edge_id: self.config.edge_id.clone() }.to_string();
        let mut config_rx = subscriber.subscribe(&config_topic).await?;

        let mut control_tick = tokio::time::interval(self.config.runtime.control_loop_interval);
        let mut telemetry_tick = tokio::time::interval(self.config.runtime.telemetry_interval);
        let mut heartbeat_tick = tokio::time::interval(self.config.runtime.heartbeat_publish_interval);

        loop {
            tokio::select! {
                _ = control_tick.tick() => {
                    if let Err(e) = self.control_tick().await {
                        tracing::error!(error = %e, "control tick failed");
                        self.enter_safe_mode("control_tick_failed").await;
                    }
                }
                _ = telemetry_tick.tick() => {
                    if let Err(e) = self.telemetry_tick().await {
                        tracing::warn!(error = %e, "telemetry publish failed, buffering");
                    }
                }
                _ = heartbeat_tick.tick() => {
                    self.heartbeat_tick().await;
                }
                delivery = commands_rx.recv() => {
                    match delivery {
                        Some(d) => {
                            if let Ok(command) = serde_json::from_slice::<Command>(&d.payload) {
                                self.handle_command(command).await;
                            }
                        }
                        None => break,
                    }
                }
                delivery = grid_rx.recv() => {
                    match delivery {
                        Some(d) => {
                            if let Ok(reading) = parse_grid_event(&d.payload) {
                                self.on_grid_reading(reading).await;
                            }
                        }
                        None => break,
                    }
                }
                delivery = demand_rx.recv() => {
                    match delivery {
                        Some(d) => {
                            match parse_demand(&d.payload) {
                                Ok(demand_kw) => self.inner.write().latest_demand_kw = demand_kw,
                                Err(e) => tracing::warn!(error = %e, "malformed demand reading, ignoring"),
                            }
                        }
                        None => break,
                    }
                }
                delivery = config_rx.recv() => {
                    match delivery {
                        Some(d) => self.on_config_update(&d.payload).await,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a freshly-pushed `lifo4/provisioning/{edge_id}/config`
    /// message (spec §4.6), refreshing the cached operational policy the
    /// Decision Engine runs against in AUTONOMOUS mode. Only the
    /// `operational_policy` field is consumed here; `safety_limits` is
    /// provisioned once at startup via [`EdgeConfig`] and is out of
    /// scope for hot reload.
    async fn on_config_update(&self, payload: &[u8]) {
        let config: ProvisioningConfigMessage = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "malformed provisioning config, ignoring");
                return;
            }
        };
        self.inner.write().cached_policy = config.operational_policy;
        tracing::info!("cached operational policy refreshed from provisioning config");
    }

    async fn control_tick(&self) -> Result<(), EdgeError> {
        let sample = self.bms.sample().await?;

        let (mode, latch, cached_policy, latest_demand_kw, grid_present) = {
            let inner = self.inner.read();
            (inner.mode, inner.latch, inner.cached_policy.clone(), inner.latest_demand_kw, inner.grid_present)
        };

        if mode == EdgeMode::SafeMode {
            // Safety monitoring stays live even in SAFE_MODE (spec §4.3:
            // "keeps safety monitoring live"), but the desired action is
            // fixed at IDLE rather than run through the Decision Engine.
            let verdict = enforce(
                Intent::Idle,
                BmsMode::Idle,
                0.0,
                &sample,
                &self.config.safety_profile,
                latch,
                Utc::now(),
                self.config.runtime.control_loop_interval,
            );
            self.apply_verdict(verdict.permitted_mode, verdict.permitted_power_kw, verdict.latch).await?;
            self.inner.write().last_telemetry = Some(sample);
            return Ok(());
        }

        let source = if mode == EdgeMode::Autonomous { DecisionSource::Cached } else { DecisionSource::Cloud };
        let inputs = DecisionInputs {
            telemetry: &sample,
            source,
            grid: GridPresence { grid_present },
            grid_service: GridServiceEvent {
                active: cached_policy.grid_service_active,
                requested_power_kw: cached_policy.grid_service_requested_power_kw,
            },
            facility_demand_kw: latest_demand_kw,
            demand_limit_kw: cached_policy.demand_limit_kw,
            peak_shave_trigger_percent: cached_policy.peak_shave_trigger_percent,
            max_discharge_kw: cached_policy.max_discharge_kw,
            tariff: cached_policy.tariff,
            solar_generation_kw: cached_policy.solar_generation_kw,
            facility_load_kw: cached_policy.facility_load_kw,
            soc_min: self.config.safety_profile.soc_min,
            soc_max: self.config.safety_profile.soc_max,
            soc_margin: cached_policy.soc_margin,
            safety_would_veto_nonidle: false,
        };
        let decision = decide(&inputs);

        let desired_mode = match decision.intent {
            Intent::Idle | Intent::SafetyHold => BmsMode::Idle,
            _ if decision.target_power_kw > 0.0 => BmsMode::Discharging,
            _ if decision.target_power_kw < 0.0 => BmsMode::Charging,
            _ => BmsMode::Idle,
        };

        let verdict = enforce(
            decision.intent,
            desired_mode,
            decision.target_power_kw,
            &sample,
            &self.config.safety_profile,
            latch,
            Utc::now(),
            self.config.runtime.control_loop_interval,
        );

        if verdict.was_altered() {
            tracing::warn!(reasons = ?verdict.reasons, "safety manager altered decision");
        }

        self.apply_verdict(verdict.permitted_mode, verdict.permitted_power_kw, verdict.latch).await?;
        self.inner.write().last_telemetry = Some(sample);
        Ok(())
    }

    async fn apply_verdict(&self, mode: BmsMode, power_kw: f64, latch: LatchState) -> Result<(), EdgeError> {
        let latched_before = self.inner.read().latch.emergency_stop_latched;
        self.bms.actuate(Actuation { mode, power_kw }).await?;
        self.inner.write().latch = latch;
        if latch.emergency_stop_latched && !latched_before {
            self.record_event(AuditEventKind::SafetyVeto, "emergency_stop_latched", serde_json::json!({})).await;
        }
        Ok(())
    }

    async fn telemetry_tick(&self) -> Result<(), EdgeError> {
        let sample = match self.inner.read().last_telemetry.clone() {
            Some(s) => s,
            None => return Ok(()),
        };
        let envelope = TelemetryEnvelope::Sample(sample.clone());
        let payload = serde_json::to_vec(&envelope).map_err(|e| EdgeError::Config(e.to_string()))?;
        let topic = Topic::Telemetry { system_id: self.config.system_id.to_string() }.to_string();

        match tokio::time::timeout(Duration::from_millis(500), self.publisher.publish(&topic, payload.clone(), Qos::AtLeastOnce)).await {
            Ok(Ok(())) => {
                self.update_cloud_contact().await;
            }
            _ => {
                if let Err(e) = self.buffer.append(BufferEntryKind::Telemetry, payload) {
                    tracing::error!(error = %e, "durable buffer append failed");
                    self.enter_safe_mode("buffer_io_error").await;
                }
            }
        }
        Ok(())
    }

    async fn heartbeat_tick(&self) {
        let mode = self.mode();
        let heartbeat = serde_json::json!({
            "mode": mode,
            "version": env!("CARGO_PKG_VERSION"),
            "control_loop_hz": 1000.0 / self.config.runtime.control_loop_interval.as_millis() as f64,
        });
        let topic = Topic::Telemetry { system_id: self.config.system_id.to_string() }.to_string();
        let _ = tokio::time::timeout(
            Duration::from_millis(500),
            self.publisher.publish(&topic, heartbeat.to_string().into_bytes(), Qos::AtMostOnce),
        )
        .await;

        let timeout_ticks = (self.config.runtime.heartbeat_timeout().as_millis()
            / self.config.runtime.heartbeat_publish_interval.as_millis().max(1)) as u32;
        let mut inner = self.inner.write();
        inner.missed_heartbeats += 1;
        if inner.mode == EdgeMode::Online && inner.missed_heartbeats >= timeout_ticks {
            inner.mode = EdgeMode::Autonomous;
            tracing::warn!("cloud unreachable past heartbeat timeout, entering AUTONOMOUS");
            drop(inner);
            self.record_event(AuditEventKind::ModeChange, "online_to_autonomous", serde_json::json!({})).await;
        }
    }

    async fn update_cloud_contact(&self) {
        let was_autonomous = {
            let mut inner = self.inner.write();
            inner.last_cloud_contact = Utc::now();
            inner.missed_heartbeats = 0;
            inner.mode == EdgeMode::Autonomous
        };
        if was_autonomous {
            self.drain_buffer().await;
        }
    }

    /// Republish buffered entries to the cloud in sequence order, ack'ing
    /// each contiguous prefix that lands, and return to ONLINE once the
    /// buffer is fully drained (spec §4.3: "requires ... C2 fully
    /// drained"). Runs one bounded batch per call; a buffer deeper than
    /// `DRAIN_BATCH` drains over several telemetry ticks rather than
    /// blocking the control loop on a single pass.
    async fn drain_buffer(&self) {
        const DRAIN_BATCH: usize = 256;

        let entries = match self.buffer.peek(DRAIN_BATCH) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "durable buffer peek failed during drain");
                return;
            }
        };
        if entries.is_empty() {
            self.leave_autonomous_if_drained().await;
            return;
        }

        let topic = Topic::Telemetry { system_id: self.config.system_id.to_string() }.to_string();
        let mut acked_through = None;
        for entry in &entries {
            match self.publisher.publish(&topic, entry.payload_bytes.clone(), Qos::AtLeastOnce).await {
                Ok(()) => acked_through = Some(entry.seq),
                Err(e) => {
                    tracing::warn!(error = %e, seq = entry.seq, "buffer drain republish failed, resuming next tick");
                    break;
                }
            }
        }
        if let Some(seq) = acked_through {
            if let Err(e) = self.buffer.ack(seq) {
                tracing::error!(error = %e, "durable buffer ack failed during drain");
            }
        }
        self.leave_autonomous_if_drained().await;
    }

    async fn leave_autonomous_if_drained(&self) {
        if self.buffer.size().unwrap_or(1) != 0 {
            return;
        }
        let mut inner = self.inner.write();
        if inner.mode == EdgeMode::Autonomous {
            inner.mode = EdgeMode::Online;
            drop(inner);
            tracing::info!("cloud reachable and buffer drained, returning to ONLINE");
            self.record_event(AuditEventKind::ModeChange, "autonomous_to_online", serde_json::json!({})).await;
        }
    }

    async fn enter_safe_mode(&self, reason: &str) {
        let mut inner = self.inner.write();
        if inner.mode != EdgeMode::SafeMode {
            inner.mode = EdgeMode::SafeMode;
            drop(inner);
            tracing::error!(reason, "entering SAFE_MODE");
            self.record_event(AuditEventKind::ModeChange, reason, serde_json::json!({"to": "safe_mode"})).await;
        }
    }

    async fn handle_command(&self, command: Command) {
        {
            let mut inner = self.inner.write();
            if inner.recent_command_ids.contains(&command.command_id) {
                tracing::debug!(command_id = %command.command_id, "duplicate command_id, skipping redelivery");
                return;
            }
            if inner.recent_command_ids.len() >= RECENT_COMMAND_CAPACITY {
                inner.recent_command_ids.pop_front();
            }
            inner.recent_command_ids.push_back(command.command_id);
        }

        tracing::info!(command_id = %command.command_id, kind = ?command.kind, "command received");
        let (mode, power_kw) = match command.kind {
            CommandKind::Charge => (BmsMode::Charging, command.params.max_power_kw.unwrap_or(0.0)),
            CommandKind::Discharge => (BmsMode::Discharging, -command.params.max_power_kw.unwrap_or(0.0)),
            CommandKind::Idle => (BmsMode::Idle, 0.0),
            CommandKind::EmergencyStop => (BmsMode::EmergencyStop, 0.0),
            CommandKind::SetMode => (command.params.mode.unwrap_or(BmsMode::Idle), 0.0),
        };
        let sample = match self.bms.sample().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "command rejected: bms unreachable");
                return;
            }
        };
        let latch = self.inner.read().latch;
        let verdict = enforce(
            Intent::Idle,
            mode,
            power_kw,
            &sample,
            &self.config.safety_profile,
            latch,
            Utc::now(),
            self.config.runtime.control_loop_interval,
        );
        if let Err(e) = self.apply_verdict(verdict.permitted_mode, verdict.permitted_power_kw, verdict.latch).await {
            tracing::error!(error = %e, "command actuation failed");
        }
        self.record_event(
            AuditEventKind::Command,
            "command_applied",
            serde_json::json!({"command_id": command.command_id, "kind": command.kind}),
        )
        .await;
    }

    async fn record_event(&self, kind: AuditEventKind, action: &str, detail: serde_json::Value) {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            system_id: self.config.system_id,
            kind,
            action: action.to_string(),
            detail,
            producer_seq: 0,
            recorded_at: Utc::now(),
        };
        let envelope = TelemetryEnvelope::Event(event);
        if let Ok(payload) = serde_json::to_vec(&envelope) {
            if let Err(e) = self.buffer.append(BufferEntryKind::Event, payload) {
                tracing::error!(error = %e, "event append to durable buffer failed");
            }
        }
    }

    /// Feed a fresh grid reading into the Black-Start FSM (spec §4.7),
    /// recording any resulting transition as an event.
    pub async fn on_grid_reading(&self, reading: GridReading) {
        self.inner.write().grid_present = reading.grid_present;
        if let Some(transition) = self.blackstart.on_grid_reading(reading) {
            self.record_event(
                AuditEventKind::FsmTransition,
                "blackstart_transition",
                serde_json::json!({"from": transition.from, "to": transition.to, "trigger": transition.trigger}),
            )
            .await;
        }
    }
}
