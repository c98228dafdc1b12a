//! Edge Controller (C3, spec §4.3).
//!
//! One [`control::EdgeController`] instance runs per physical BESS: a
//! fixed-cadence control loop (sample -> normalize -> decide -> gate ->
//! actuate -> publish/buffer -> heartbeat) driving a [`bms::BmsAdapter`],
//! gated by the pure functions in `bess-control`, with unacknowledged
//! telemetry and events spilling into a `bess-buffer::DurableBuffer` on
//! publish failure.
//!
//! Transformed from the teacher's `opensase-edge` crate: the
//! `OpenSASEEdge`/`EdgeConfig`/`EdgeError` shapes and the
//! `tokio::select!`-driven run loop survive, repointed from SD-WAN
//! interface/tunnel/security management at a BESS's control loop.

#![warn(missing_docs)]

pub mod api;
pub mod bms;
pub mod config;
pub mod control;
pub mod error;

pub use config::EdgeConfig;
pub use control::{EdgeController, EdgeMode};
pub use error::EdgeError;
