//! Engine error kinds.
//!
//! The compute loop treats [`EngineError::StoreIo`] and
//! [`EngineError::Interrupted`] as fatal and fails the task; the remaining
//! kinds surface operator mistakes with actionable messages. There is no
//! retry at this layer: message redelivery belongs to the transport, and the
//! engine does not tolerate lost messages.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A single vertex's inbound buffer outgrew the configured cap.
    #[error(
        "message buffer for a single vertex exceeded {limit} bytes; \
         enable `use_big_buffers` to lift the per-vertex cap"
    )]
    PayloadTooLarge { limit: usize },

    /// Encoding or decoding of a stored payload failed.
    #[error("message store I/O fault: {0}")]
    StoreIo(String),

    /// A blocking wait was torn down underneath the waiter. Fatal.
    #[error("blocking wait interrupted: {0}")]
    Interrupted(String),

    /// The philosophers table saw the same neighbour twice for one
    /// philosopher. Indicates corrupt partitioning. Fatal.
    #[error("philosopher {philosopher} already tracks neighbour {neighbour}; partitioning is corrupt")]
    DuplicateNeighbour { philosopher: u64, neighbour: u64 },

    /// The configuration combines options the engine cannot honour.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// A wire payload failed structural validation.
    #[error("malformed wire payload: {0}")]
    WireFormat(String),

    /// The transport refused or lost a request.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<bincode::error::EncodeError> for EngineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        EngineError::StoreIo(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        EngineError::StoreIo(e.to_string())
    }
}
