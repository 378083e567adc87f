//! Network error types

use thiserror::Error;

use crate::wire::CodecError;

/// Failures surfaced by framing, connections and dispatch
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Bad magic, bad checksum or an oversized frame; the connection is closed
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A well-framed message with a command outside the catalog
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A dispatched handler returned an error
    #[error("Handler for '{command}' failed: {reason}")]
    HandlerFailure { command: String, reason: String },

    /// Operation needs an established connection
    #[error("Connection is not established")]
    NotConnected,

    /// No connection registered under this id
    #[error("Unknown connection {0}")]
    UnknownConnection(u64),

    /// Message body could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Whether this error must tear the connection down
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetworkError::ProtocolViolation(_) | NetworkError::Io(_))
    }
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;
