//! Error types for iterm2-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The connection could not be established (bad cookie, refused upgrade,
    /// malformed authorization response).
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// A request could not be serialized. Aborts only that call.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An inbound frame could not be deserialized.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Writing a message to the transport failed.
    #[error("Write error: {0}")]
    Write(String),

    /// Reading from the transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A response arrived for an ID with no live pending call.
    #[error("No pending call for response ID {0}")]
    UnroutableResponse(u64),

    /// A call with the same ID is already in flight.
    #[error("Duplicate request ID: {0}")]
    DuplicateId(u64),

    /// The server answered the call with an error string.
    #[error("Error from server: {0}")]
    Remote(String),

    /// The connection was closed before or during the call.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived before the call deadline.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error during socket or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Whether this error came from the remote side answering the call,
    /// as opposed to a local or transport failure.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RpcError::Remote("busted".into()).to_string(),
            "Error from server: busted"
        );
        assert_eq!(RpcError::ConnectionClosed.to_string(), "Connection closed");
        assert_eq!(
            RpcError::UnroutableResponse(7).to_string(),
            "No pending call for response ID 7"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no socket");
        let err: RpcError = io.into();
        assert!(matches!(err, RpcError::Io(_)));
        assert!(!err.is_remote());
    }
}
