//! Shared error scope taxonomy
//!
//! Every component crate defines its own `thiserror` enum (`EdgeError`,
//! `CloudError`, `BusError`, `BufferError`) for its local failure modes,
//! but classifies each variant under one of the scopes below so that
//! propagation and alarm routing stay consistent across the control
//! plane (see spec §7).

use serde::{Deserialize, Serialize};

/// Error scope, per the propagation rules in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorScope {
    /// Bus disconnect, HTTP timeout - always recoverable, never fatal.
    Transport,
    /// Malformed message, unknown topic - log, drop, count.
    Protocol,
    /// Bad token, missing role.
    Authorization,
    /// Invalid command fields, unknown system.
    Validation,
    /// Safety veto or trim.
    Safety,
    /// Buffer full, rate limit exceeded.
    Capacity,
    /// Disk I/O lost, BMS unreachable - requires operator intervention.
    FatalLocal,
}

/// Alarm severity, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Safety-critical, requires immediate action.
    P1,
    /// Operational degradation.
    P2,
    /// Advisory.
    P3,
    /// Informational.
    P4,
}

impl ErrorScope {
    /// Default alarm severity this scope escalates to, when it does escalate.
    ///
    /// Transport and Protocol errors are absorbed locally with retries and
    /// do not raise an alarm on their own.
    pub fn default_severity(self) -> Option<Severity> {
        match self {
            ErrorScope::Transport | ErrorScope::Protocol => None,
            ErrorScope::Authorization | ErrorScope::Validation => None,
            ErrorScope::Safety => Some(Severity::P2),
            ErrorScope::Capacity => Some(Severity::P2),
            ErrorScope::FatalLocal => Some(Severity::P1),
        }
    }
}
