//! Bus error types.

use thiserror::Error;

/// Errors surfaced by the Message Bus Adapter.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport unavailable")]
    TransportUnavailable,
    #[error("connect error: {0}")]
    Connect(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("subscribe error: {0}")]
    Subscribe(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
