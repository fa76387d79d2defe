//! Error types for fileshare-relay.

use fileshare_types::ConnectionId;

/// Main error type for fileshare-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Registry invariant violated.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] fileshare_types::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection registry errors.
///
/// These indicate a bug in identity allocation and are never shown to
/// clients.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An identifier was registered while already present.
    #[error("duplicate connection identifier: {id}")]
    DuplicateIdentifier {
        /// The identifier that was already registered.
        id: ConnectionId,
    },
}

/// Failure to hand a message to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's writer has already stopped.
    #[error("connection closed")]
    Closed,

    /// The connection's queue is full; it has been told to disconnect.
    #[error("connection stalled (outbound queue full)")]
    Congested,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
