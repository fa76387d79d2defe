//! Error types for the fileshare wire protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match the message shape.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Frame carried a `type` tag this protocol does not define.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Serializing an outbound frame failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A string could not be parsed as a connection identifier.
    #[error("invalid connection id: {0}")]
    InvalidConnectionId(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
