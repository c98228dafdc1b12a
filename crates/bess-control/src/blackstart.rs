//! Black-Start FSM (C7, spec §4.7).
//!
//! A six-state machine driven by grid presence and BMS readiness. Every
//! transition is timestamped and returned to the caller so it can be
//! appended to the audit log exactly once (Testable Property 2, and
//! scenario S6's "audit log contains each of the five transitions
//! exactly once").
//!
//! Grounded in `sase-resilience::failover::FailoverOrchestrator`: the
//! same shape of an `Arc<RwLock<...>>`-held state plus a bounded
//! transition history, `&self` methods driving the machine instead of
//! taking `&mut self` so the FSM can be shared across the edge
//! controller's tasks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Grid condition persistence required before STANDBY/NORMAL ->
/// ENERGIZING (spec §4.7: "> 2 s").
pub const BLACKOUT_PERSISTENCE: ChronoDuration = ChronoDuration::seconds(2);
/// Output frequency stability required before SYNCHRONIZING -> ISLANDED
/// (spec §4.7: "stable for 5 s").
pub const SYNC_STABILITY_WINDOW: ChronoDuration = ChronoDuration::seconds(5);
/// Grid presence/stability required before ISLANDED -> RECONNECTING
/// (spec §4.7: "stable for 30 s").
pub const GRID_RESTORE_STABILITY_WINDOW: ChronoDuration = ChronoDuration::seconds(30);
/// Settling window on restart before the FSM accepts any actuation (spec
/// §4.7: "a brief settling window before accepting any actuation" - the
/// spec does not give a concrete duration, resolved here as 3s; see
/// DESIGN.md).
pub const RESTART_SETTLING_WINDOW: ChronoDuration = ChronoDuration::seconds(3);

/// Nominal output frequency band, spec §4.7: "within ±0.1 Hz of nominal".
pub const FREQUENCY_TOLERANCE_HZ: f64 = 0.1;

/// One of the six Black-Start FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlackStartState {
    Standby,
    Energizing,
    Synchronizing,
    Islanded,
    Reconnecting,
    Normal,
}

/// A single grid observation fed to the FSM.
#[derive(Debug, Clone, Copy)]
pub struct GridReading {
    pub grid_present: bool,
    pub grid_voltage_nominal: bool,
    pub grid_frequency_nominal: bool,
    pub output_frequency_hz: f64,
    pub nominal_frequency_hz: f64,
    pub timestamp: DateTime<Utc>,
}

impl GridReading {
    fn grid_stable(&self) -> bool {
        self.grid_present && self.grid_voltage_nominal && self.grid_frequency_nominal
    }

    fn output_frequency_in_band(&self) -> bool {
        (self.output_frequency_hz - self.nominal_frequency_hz).abs() <= FREQUENCY_TOLERANCE_HZ
    }
}

/// One FSM transition, ready to be appended to the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackStartTransition {
    pub from: BlackStartState,
    pub to: BlackStartState,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

struct Inner {
    state: BlackStartState,
    /// Instant grid presence was first observed lost, for the 2s
    /// blackout-persistence check.
    blackout_since: Option<DateTime<Utc>>,
    /// Instant output frequency first read in-band, for the 5s
    /// sync-stability check.
    freq_in_band_since: Option<DateTime<Utc>>,
    /// Instant grid was first observed stable again while islanded, for
    /// the 30s grid-restore-stability check.
    grid_stable_since: Option<DateTime<Utc>>,
    settling_until: Option<DateTime<Utc>>,
    history: VecDeque<BlackStartTransition>,
}

const MAX_HISTORY: usize = 256;

/// The Black-Start FSM.
pub struct BlackStartFsm {
    inner: RwLock<Inner>,
}

impl BlackStartFsm {
    /// Cold-start a new FSM in STANDBY (grid assumed present until told
    /// otherwise).
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: BlackStartState::Standby,
                blackout_since: None,
                freq_in_band_since: None,
                grid_stable_since: None,
                settling_until: None,
                history: VecDeque::new(),
            }),
        }
    }

    /// Re-infer state after a process restart from the last known state
    /// and grid reading (spec §4.7: "on boot, it re-infers state from
    /// the last known grid reading and a brief settling window before
    /// accepting any actuation").
    pub fn restore(last_state: BlackStartState, last_reading: GridReading, now: DateTime<Utc>) -> Self {
        let fsm = Self::new();
        {
            let mut inner = fsm.inner.write();
            inner.state = if last_reading.grid_stable() {
                match last_state {
                    BlackStartState::Islanded | BlackStartState::Reconnecting => last_state,
                    _ => BlackStartState::Normal,
                }
            } else {
                BlackStartState::Standby
            };
            inner.settling_until = Some(now + RESTART_SETTLING_WINDOW);
        }
        fsm
    }

    /// Current state.
    pub fn state(&self) -> BlackStartState {
        self.inner.read().state
    }

    /// Whether the FSM is still within its post-restart settling window
    /// and must not accept actuation commands yet.
    pub fn is_settling(&self, now: DateTime<Utc>) -> bool {
        self.inner.read().settling_until.is_some_and(|until| now < until)
    }

    /// Whether non-critical loads may be energized in the current state.
    /// Spec §4.7: never during ENERGIZING/SYNCHRONIZING; only once NORMAL.
    pub fn non_critical_loads_allowed(&self) -> bool {
        self.inner.read().state == BlackStartState::Normal
    }

    /// Bounded transition history, most recent last.
    pub fn history(&self) -> Vec<BlackStartTransition> {
        self.inner.read().history.iter().cloned().collect()
    }

    fn push_transition(inner: &mut Inner, to: BlackStartState, trigger: &str, at: DateTime<Utc>) -> BlackStartTransition {
        let transition = BlackStartTransition {
            from: inner.state,
            to,
            trigger: trigger.to_string(),
            at,
        };
        inner.state = to;
        inner.history.push_back(transition.clone());
        while inner.history.len() > MAX_HISTORY {
            inner.history.pop_front();
        }
        tracing::warn!(from = ?transition.from, to = ?transition.to, trigger, "black-start FSM transition");
        transition
    }

    /// Feed a fault condition (BMS fault or SOC below the islanding
    /// minimum). Any state but STANDBY transitions immediately; the
    /// operator must clear it before the FSM proceeds (spec §4.7: "any
    /// -> STANDBY (fault) ... Exit criteria: Operator clears").
    pub fn on_fault(&self, reason: &str, now: DateTime<Utc>) -> Option<BlackStartTransition> {
        let mut inner = self.inner.write();
        if inner.state == BlackStartState::Standby {
            return None;
        }
        inner.blackout_since = None;
        inner.freq_in_band_since = None;
        inner.grid_stable_since = None;
        Some(Self::push_transition(&mut inner, BlackStartState::Standby, reason, now))
    }

    /// Feed a grid reading; returns the transition that fired, if any.
    pub fn on_grid_reading(&self, reading: GridReading) -> Option<BlackStartTransition> {
        let now = reading.timestamp;
        let mut inner = self.inner.write();

        match inner.state {
            BlackStartState::Standby | BlackStartState::Normal => {
                if !reading.grid_stable() {
                    let since = *inner.blackout_since.get_or_insert(now);
                    if now - since >= BLACKOUT_PERSISTENCE {
                        inner.blackout_since = None;
                        return Some(Self::push_transition(
                            &mut inner,
                            BlackStartState::Energizing,
                            "grid voltage/frequency loss persisting > 2s",
                            now,
                        ));
                    }
                } else {
                    inner.blackout_since = None;
                }
                None
            }
            BlackStartState::Energizing => {
                // Exit criteria: output frequency within tolerance of
                // nominal. Non-critical loads stay disconnected the
                // entire time (enforced by `non_critical_loads_allowed`).
                if reading.output_frequency_in_band() {
                    return Some(Self::push_transition(
                        &mut inner,
                        BlackStartState::Synchronizing,
                        "critical bus energized, output frequency within band",
                        now,
                    ));
                }
                None
            }
            BlackStartState::Synchronizing => {
                if reading.output_frequency_in_band() {
                    let since = *inner.freq_in_band_since.get_or_insert(now);
                    if now - since >= SYNC_STABILITY_WINDOW {
                        inner.freq_in_band_since = None;
                        return Some(Self::push_transition(
                            &mut inner,
                            BlackStartState::Islanded,
                            "frequency/voltage stable for 5s",
                            now,
                        ));
                    }
                } else {
                    inner.freq_in_band_since = None;
                }
                None
            }
            BlackStartState::Islanded => {
                if reading.grid_stable() {
                    let since = *inner.grid_stable_since.get_or_insert(now);
                    if now - since >= GRID_RESTORE_STABILITY_WINDOW {
                        inner.grid_stable_since = None;
                        return Some(Self::push_transition(
                            &mut inner,
                            BlackStartState::Reconnecting,
                            "grid voltage present and stable for 30s",
                            now,
                        ));
                    }
                } else {
                    inner.grid_stable_since = None;
                }
                None
            }
            BlackStartState::Reconnecting => {
                // Exit criteria: closed-transition sync complete, i.e.
                // phase/frequency alignment achieved and grid stable.
                if reading.grid_stable() && reading.output_frequency_in_band() {
                    return Some(Self::push_transition(
                        &mut inner,
                        BlackStartState::Normal,
                        "closed-transition sync complete",
                        now,
                    ));
                }
                None
            }
        }
    }
}

impl Default for BlackStartFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(grid_present: bool, now: DateTime<Utc>) -> GridReading {
        GridReading {
            grid_present,
            grid_voltage_nominal: grid_present,
            grid_frequency_nominal: grid_present,
            output_frequency_hz: if grid_present { 60.0 } else { 59.5 },
            nominal_frequency_hz: 60.0,
            timestamp: now,
        }
    }

    #[test]
    fn starts_in_standby() {
        let fsm = BlackStartFsm::new();
        assert_eq!(fsm.state(), BlackStartState::Standby);
    }

    #[test]
    fn blackout_must_persist_past_two_seconds() {
        let fsm = BlackStartFsm::new();
        let t0 = Utc::now();
        assert!(fsm.on_grid_reading(reading(false, t0)).is_none());
        assert!(fsm
            .on_grid_reading(reading(false, t0 + ChronoDuration::milliseconds(500)))
            .is_none());
        assert_eq!(fsm.state(), BlackStartState::Standby);
        let transition = fsm
            .on_grid_reading(reading(false, t0 + ChronoDuration::seconds(3)))
            .expect("should transition after blackout persists");
        assert_eq!(transition.to, BlackStartState::Energizing);
    }

    #[test]
    fn full_sequence_to_islanded_and_back_to_normal() {
        let fsm = BlackStartFsm::new();
        let t0 = Utc::now();
        fsm.on_grid_reading(reading(false, t0));
        fsm.on_grid_reading(reading(false, t0 + ChronoDuration::seconds(3)));
        assert_eq!(fsm.state(), BlackStartState::Energizing);
        assert!(!fsm.non_critical_loads_allowed());

        let mut synced = reading(false, t0 + ChronoDuration::seconds(4));
        synced.output_frequency_hz = 60.05; // within ±0.1Hz of 60.0
        fsm.on_grid_reading(synced);
        assert_eq!(fsm.state(), BlackStartState::Synchronizing);
        assert!(!fsm.non_critical_loads_allowed());

        let mut stable = synced;
        stable.timestamp = t0 + ChronoDuration::seconds(10);
        fsm.on_grid_reading(stable);
        assert_eq!(fsm.state(), BlackStartState::Islanded);

        let mut grid_back = reading(true, t0 + ChronoDuration::seconds(11));
        grid_back.output_frequency_hz = 60.0;
        fsm.on_grid_reading(grid_back);
        assert_eq!(fsm.state(), BlackStartState::Islanded); // not yet 30s stable

        let mut grid_stable_long = grid_back;
        grid_stable_long.timestamp = t0 + ChronoDuration::seconds(42);
        fsm.on_grid_reading(grid_stable_long);
        assert_eq!(fsm.state(), BlackStartState::Reconnecting);

        let mut closed_sync = grid_stable_long;
        closed_sync.timestamp = t0 + ChronoDuration::seconds(43);
        fsm.on_grid_reading(closed_sync);
        assert_eq!(fsm.state(), BlackStartState::Normal);
        assert!(fsm.non_critical_loads_allowed());

        let transitions = fsm.history();
        assert_eq!(transitions.len(), 5);
    }

    #[test]
    fn fault_forces_standby_from_any_state() {
        let fsm = BlackStartFsm::new();
        let t0 = Utc::now();
        fsm.on_grid_reading(reading(false, t0));
        fsm.on_grid_reading(reading(false, t0 + ChronoDuration::seconds(3)));
        assert_eq!(fsm.state(), BlackStartState::Energizing);

        let transition = fsm
            .on_fault("SOC below minimum-for-islanding", t0 + ChronoDuration::seconds(4))
            .unwrap();
        assert_eq!(transition.to, BlackStartState::Standby);
        assert_eq!(fsm.state(), BlackStartState::Standby);
    }

    #[test]
    fn restart_settling_window_blocks_actuation_briefly() {
        let now = Utc::now();
        let fsm = BlackStartFsm::restore(BlackStartState::Normal, reading(true, now), now);
        assert!(fsm.is_settling(now));
        assert!(!fsm.is_settling(now + RESTART_SETTLING_WINDOW + ChronoDuration::seconds(1)));
    }
}
