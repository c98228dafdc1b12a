//! Edge Controller error types.

use thiserror::Error;

/// Errors surfaced by the Edge Controller.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// BMS adapter could not be reached or returned malformed data.
    #[error("bms error: {0}")]
    Bms(String),
    /// Message bus publish/subscribe failure.
    #[error("bus error: {0}")]
    Bus(#[from] bess_bus::BusError),
    /// Durable buffer failure. Per spec §4.2, fatal to the control loop:
    /// the caller must degrade to SAFE_MODE.
    #[error("buffer error: {0}")]
    Buffer(#[from] bess_buffer::BufferError),
    /// Local configuration could not be loaded or saved.
    #[error("config error: {0}")]
    Config(String),
    /// Local health/status API failure.
    #[error("api error: {0}")]
    Api(String),
}
