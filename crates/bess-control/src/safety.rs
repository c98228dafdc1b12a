//! Safety Manager (C4, spec §4.4).
//!
//! `enforce` is the last stop before actuation and outranks every other
//! component. It is a pure function: given a desired action, the latest
//! telemetry, the safety-limit profile, and the current latch state, it
//! returns the permitted action and the (possibly unchanged) latch
//! state. It never reaches outside its arguments - no shared mutable
//! state, no I/O - so it is trivially unit-testable and its verdict can
//! always be replayed from an audit record.

use bess_common::{BmsMode, Intent, SafetyProfile, TelemetrySample};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// How long an over-temperature condition must stay below `temp_max`
/// before an operator's clear command is honored (spec §4.4: "hysteresis
/// window").
pub const EMERGENCY_CLEAR_HYSTERESIS: ChronoDuration = ChronoDuration::seconds(30);

/// Tracks the one piece of state `enforce` needs across calls: whether
/// EMERGENCY_STOP is latched, and since when the underlying condition
/// has been back in a safe range (for hysteresis).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatchState {
    pub emergency_stop_latched: bool,
    /// Set the instant temperature first reads back at or below
    /// `temp_max` while latched; cleared if it spikes again.
    pub safe_since: Option<DateTime<Utc>>,
}

impl Default for LatchState {
    fn default() -> Self {
        Self {
            emergency_stop_latched: false,
            safe_since: None,
        }
    }
}

impl LatchState {
    /// Whether an operator clear command issued `now` would be honored:
    /// latched, and the hysteresis window has elapsed since conditions
    /// returned to safe range.
    pub fn clearable_at(&self, now: DateTime<Utc>) -> bool {
        self.emergency_stop_latched
            && self
                .safe_since
                .is_some_and(|since| now - since >= EMERGENCY_CLEAR_HYSTERESIS)
    }

    /// Apply an operator's clear command, given a fresh command id was
    /// presented (the caller is responsible for checking idempotency on
    /// that id before calling this). No-op if not yet clearable.
    pub fn clear(&self, now: DateTime<Utc>) -> LatchState {
        if self.clearable_at(now) {
            LatchState {
                emergency_stop_latched: false,
                safe_since: None,
            }
        } else {
            *self
        }
    }
}

/// Why the Safety Manager altered the desired action, for the audit
/// trail (spec §4.4: "every veto or trim yields an audit event carrying
/// the pre- and post-enforcement action").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VetoReason {
    SocBelowMin { soc: f64, soc_min: f64 },
    SocAboveMax { soc: f64, soc_max: f64 },
    OverTemperature { temperature: f64, temp_max: f64 },
    CriticalTemperature { temperature: f64, temp_critical: f64 },
    CurrentTrimmed { projected: f64, limit: f64 },
    VoltageOutOfRange { voltage: f64, voltage_min: f64, voltage_max: f64 },
    StaleTelemetry { age_seconds: f64, max_age_seconds: f64 },
    LatchedEmergencyStop,
}

/// Verdict returned by [`enforce`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub permitted_intent: Intent,
    pub permitted_mode: BmsMode,
    pub permitted_power_kw: f64,
    pub reasons: Vec<VetoReason>,
    pub latch: LatchState,
}

impl Verdict {
    /// Whether the permitted action differs from what was asked for.
    pub fn was_altered(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Evaluate a desired action against the safety envelope (spec §4.4's
/// table, evaluated top to bottom; later rows can compound with earlier
/// ones - e.g. a trimmed current on telemetry that is also stale still
/// ends up forced to IDLE).
pub fn enforce(
    desired_intent: Intent,
    desired_mode: BmsMode,
    desired_power_kw: f64,
    telemetry: &TelemetrySample,
    profile: &SafetyProfile,
    latch: LatchState,
    now: DateTime<Utc>,
    sample_period: std::time::Duration,
) -> Verdict {
    let mut reasons = Vec::new();
    let mut intent = desired_intent;
    let mut mode = desired_mode;
    let mut power_kw = desired_power_kw;

    // Latched EMERGENCY_STOP outranks everything until explicitly cleared.
    if latch.emergency_stop_latched {
        reasons.push(VetoReason::LatchedEmergencyStop);
        return Verdict {
            permitted_intent: Intent::SafetyHold,
            permitted_mode: BmsMode::EmergencyStop,
            permitted_power_kw: 0.0,
            reasons,
            latch,
        };
    }

    let mut next_latch = latch;

    // Critical temperature: forced EMERGENCY_STOP, latches.
    if telemetry.temperature > profile.temp_critical {
        reasons.push(VetoReason::CriticalTemperature {
            temperature: telemetry.temperature,
            temp_critical: profile.temp_critical,
        });
        next_latch = LatchState {
            emergency_stop_latched: true,
            safe_since: None,
        };
        return Verdict {
            permitted_intent: Intent::SafetyHold,
            permitted_mode: BmsMode::EmergencyStop,
            permitted_power_kw: 0.0,
            reasons,
            latch: next_latch,
        };
    }

    // Temperature back in safe range: start/continue the hysteresis clock.
    // Only relevant once an operator has cleared a prior latch; tracked
    // here so a clear decision made moments later has an accurate window.
    if telemetry.temperature <= profile.temp_max && next_latch.safe_since.is_none() {
        next_latch.safe_since = Some(now);
    } else if telemetry.temperature > profile.temp_max {
        next_latch.safe_since = None;
    }

    // Stale telemetry: force IDLE.
    let age = (now - telemetry.wall_ts).to_std().unwrap_or_default();
    let max_age = sample_period * 2;
    if age > max_age {
        reasons.push(VetoReason::StaleTelemetry {
            age_seconds: age.as_secs_f64(),
            max_age_seconds: max_age.as_secs_f64(),
        });
        intent = Intent::SafetyHold;
        mode = BmsMode::Idle;
        power_kw = 0.0;
    }

    // Over (non-critical) temperature: all actuation vetoed to IDLE.
    if telemetry.temperature > profile.temp_max {
        reasons.push(VetoReason::OverTemperature {
            temperature: telemetry.temperature,
            temp_max: profile.temp_max,
        });
        intent = Intent::SafetyHold;
        mode = BmsMode::Idle;
        power_kw = 0.0;
    }

    // Voltage out of range: veto to IDLE.
    if telemetry.voltage < profile.voltage_min || telemetry.voltage > profile.voltage_max {
        reasons.push(VetoReason::VoltageOutOfRange {
            voltage: telemetry.voltage,
            voltage_min: profile.voltage_min,
            voltage_max: profile.voltage_max,
        });
        intent = Intent::SafetyHold;
        mode = BmsMode::Idle;
        power_kw = 0.0;
    }

    // SOC bounds: discharging below soc_min or charging above soc_max is
    // vetoed to IDLE (but doesn't by itself force a lower-priority hold
    // on an otherwise-idle decision).
    if mode == BmsMode::Discharging && telemetry.soc < profile.soc_min {
        reasons.push(VetoReason::SocBelowMin {
            soc: telemetry.soc,
            soc_min: profile.soc_min,
        });
        intent = Intent::SafetyHold;
        mode = BmsMode::Idle;
        power_kw = 0.0;
    }
    if mode == BmsMode::Charging && telemetry.soc > profile.soc_max {
        reasons.push(VetoReason::SocAboveMax {
            soc: telemetry.soc,
            soc_max: profile.soc_max,
        });
        intent = Intent::SafetyHold;
        mode = BmsMode::Idle;
        power_kw = 0.0;
    }

    // Current projection: trimmed, not vetoed.
    let max_current = if mode == BmsMode::Charging {
        profile.current_max_charge
    } else {
        profile.current_max_discharge
    };
    let projected_current = if telemetry.voltage > 0.0 {
        (power_kw * 1000.0) / telemetry.voltage
    } else {
        0.0
    };
    if mode != BmsMode::Idle && projected_current.abs() > max_current {
        let limit_power_kw = (max_current * telemetry.voltage) / 1000.0;
        reasons.push(VetoReason::CurrentTrimmed {
            projected: projected_current,
            limit: max_current,
        });
        power_kw = power_kw.signum() * limit_power_kw;
    }

    Verdict {
        permitted_intent: intent,
        permitted_mode: mode,
        permitted_power_kw: power_kw,
        reasons,
        latch: next_latch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bess_common::SafetyProfile;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn profile() -> SafetyProfile {
        SafetyProfile::new(20.0, 80.0, 0.0, 45.0, 60.0, 40.0, 58.0, 100.0, 100.0, 50.0).unwrap()
    }

    fn telemetry(soc: f64, temperature: f64, voltage: f64) -> TelemetrySample {
        TelemetrySample {
            system_id: Uuid::new_v4(),
            monotonic_seq: 1,
            wall_ts: Utc::now(),
            mode: BmsMode::Idle,
            soc,
            voltage,
            current: 0.0,
            power: 0.0,
            temperature,
            cell_breakdown: None,
        }
    }

    #[test]
    fn vetoes_discharge_below_soc_min() {
        let verdict = enforce(
            Intent::Arbitrage,
            BmsMode::Discharging,
            10.0,
            &telemetry(19.0, 25.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::Idle);
        assert!(matches!(verdict.reasons[0], VetoReason::SocBelowMin { .. }));
    }

    #[test]
    fn vetoes_charge_above_soc_max() {
        let verdict = enforce(
            Intent::SelfConsume,
            BmsMode::Charging,
            10.0,
            &telemetry(81.0, 25.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::Idle);
        assert!(matches!(verdict.reasons[0], VetoReason::SocAboveMax { .. }));
    }

    #[test]
    fn over_temperature_vetoes_to_idle() {
        let verdict = enforce(
            Intent::Arbitrage,
            BmsMode::Discharging,
            10.0,
            &telemetry(50.0, 46.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::Idle);
        assert!(!verdict.latch.emergency_stop_latched);
    }

    #[test]
    fn critical_temperature_latches_emergency_stop() {
        let verdict = enforce(
            Intent::Arbitrage,
            BmsMode::Discharging,
            10.0,
            &telemetry(50.0, 61.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::EmergencyStop);
        assert!(verdict.latch.emergency_stop_latched);
    }

    #[test]
    fn latched_emergency_stop_cannot_be_cleared_before_hysteresis_elapses() {
        let now = Utc::now();
        let latch = LatchState {
            emergency_stop_latched: true,
            safe_since: Some(now - ChronoDuration::seconds(5)),
        };
        assert!(!latch.clearable_at(now));
        let cleared = latch.clear(now);
        assert!(cleared.emergency_stop_latched);
    }

    #[test]
    fn latched_emergency_stop_clears_after_hysteresis() {
        let now = Utc::now();
        let latch = LatchState {
            emergency_stop_latched: true,
            safe_since: Some(now - ChronoDuration::seconds(31)),
        };
        assert!(latch.clearable_at(now));
        let cleared = latch.clear(now);
        assert!(!cleared.emergency_stop_latched);
    }

    #[test]
    fn current_is_trimmed_not_vetoed() {
        let verdict = enforce(
            Intent::Arbitrage,
            BmsMode::Discharging,
            1000.0, // absurd power request at 50V => way above current_max_discharge
            &telemetry(50.0, 25.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::Discharging);
        assert!(matches!(verdict.reasons[0], VetoReason::CurrentTrimmed { .. }));
        assert!(verdict.permitted_power_kw < 1000.0);
    }

    #[test]
    fn stale_telemetry_forces_idle() {
        let mut sample = telemetry(50.0, 25.0, 50.0);
        sample.wall_ts = Utc::now() - ChronoDuration::seconds(10);
        let verdict = enforce(
            Intent::Arbitrage,
            BmsMode::Discharging,
            10.0,
            &sample,
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert_eq!(verdict.permitted_mode, BmsMode::Idle);
        assert!(verdict.reasons.iter().any(|r| matches!(r, VetoReason::StaleTelemetry { .. })));
    }

    #[test]
    fn fresh_idle_request_within_envelope_passes_unaltered() {
        let verdict = enforce(
            Intent::Idle,
            BmsMode::Idle,
            0.0,
            &telemetry(50.0, 25.0, 50.0),
            &profile(),
            LatchState::default(),
            Utc::now(),
            Duration::from_millis(200),
        );
        assert!(!verdict.was_altered());
        assert_eq!(verdict.permitted_mode, BmsMode::Idle);
    }

    proptest::proptest! {
        /// Testable Property 1: safety monotonicity. No matter what is
        /// requested or what telemetry shows, `enforce` must never permit
        /// discharging at or below `soc_min`, never permit charging at or
        /// above `soc_max`, and never permit non-idle actuation above
        /// `temp_max` - the safety envelope is a hard backstop, not a
        /// heuristic.
        #[test]
        fn enforce_never_permits_unsafe_actuation(
            desired_mode in proptest::prop_oneof![
                proptest::strategy::Just(BmsMode::Idle),
                proptest::strategy::Just(BmsMode::Charging),
                proptest::strategy::Just(BmsMode::Discharging),
            ],
            desired_power_kw in -50.0..50.0_f64,
            soc in 0.0..100.0_f64,
            temperature in -10.0..70.0_f64,
            voltage in 0.0..80.0_f64,
        ) {
            let telem = telemetry(soc, temperature, voltage);
            let verdict = enforce(
                Intent::Arbitrage,
                desired_mode,
                desired_power_kw,
                &telem,
                &profile(),
                LatchState::default(),
                telem.wall_ts,
                Duration::from_millis(200),
            );

            prop_assert!(!(verdict.permitted_mode == BmsMode::Discharging && telem.soc <= profile().soc_min));
            prop_assert!(!(verdict.permitted_mode == BmsMode::Charging && telem.soc >= profile().soc_max));
            prop_assert!(!(verdict.permitted_mode != BmsMode::Idle && verdict.permitted_mode != BmsMode::EmergencyStop && temperature > profile().temp_max));
        }
    }
}
