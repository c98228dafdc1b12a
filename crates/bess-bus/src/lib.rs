//! Message Bus Adapter (C1, spec §4.1).
//!
//! Defines narrow [`Publisher`]/[`Subscriber`] traits (per the control
//! plane's design notes: components depend on interfaces, never on each
//! other or on a concrete broker client) plus two implementations:
//!
//! - [`mqtt::MqttBus`] - a real client built on `rumqttc`, run as a
//!   long-lived worker task with inbound/outbound queues. The source's
//!   callback-driven reconnection timer becomes a separate timer task
//!   that signals the worker over a control channel, per the design
//!   notes' "task + channel" translation.
//! - [`local::LocalBus`] - an in-process broadcast-channel bus used by
//!   both services' test suites and by a standalone edge simulator,
//!   grounded in this stack's existing habit of stubbing
//!   hardware/infra-adjacent integration points (e.g. `ha.rs`'s
//!   `start_vrrp`) while keeping the orchestration logic real.

#![warn(missing_docs)]

pub mod error;
pub mod local;
pub mod mqtt;
pub mod topics;

pub use error::BusError;
pub use topics::{Topic, TELEMETRY_WILDCARD};

use async_trait::async_trait;
use bess_common::Qos;

/// Publish side of the Message Bus Adapter (spec §4.1).
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `topic` at the given QoS. Returns once the
    /// broker has accepted the payload; fails with
    /// [`BusError::TransportUnavailable`] when disconnected.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), BusError>;
}

/// One message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Subscribe side of the Message Bus Adapter (spec §4.1).
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to `topic_filter`; deliveries arrive on the returned
    /// channel. Duplicate deliveries at `AT_LEAST_ONCE` are expected;
    /// callers must be idempotent.
    async fn subscribe(&self, topic_filter: &str) -> Result<tokio::sync::mpsc::Receiver<Delivery>, BusError>;
}
