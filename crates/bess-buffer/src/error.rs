//! Durable Buffer error types.

use thiserror::Error;

/// Errors surfaced by the Durable Buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Capacity reached and there was nothing evictable (an event-only
    /// backlog). Surfaced as a P2 alarm at the call site (spec §4.2).
    #[error("buffer full")]
    BufferFull,

    /// Storage I/O failure. Fatal: the caller must degrade to SAFE_MODE
    /// and raise a P1 alarm (spec §4.2).
    #[error("buffer storage error: {0}")]
    Io(#[from] sled::Error),

    /// Entry failed to serialize before being written.
    #[error("buffer entry encode error: {0}")]
    Encode(serde_json::Error),

    /// Stored bytes failed to deserialize back into a `BufferEntry`.
    #[error("buffer entry decode error: {0}")]
    Decode(serde_json::Error),
}
