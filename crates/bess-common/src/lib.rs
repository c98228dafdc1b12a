//! BESS Control Plane - Common Data Model
//!
//! Shared types for the battery energy storage system control plane:
//! system/telemetry/command/decision/audit records, the safety-limit
//! profile, and the runtime configuration bundle passed into every
//! component constructor (no process-wide globals, per the control
//! plane's design notes).

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod model;

pub use config::RuntimeConfig;
pub use error::{ErrorScope, Severity};
pub use model::*;
