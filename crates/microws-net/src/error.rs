//! Transport error types

use microws_proto::{Exception, ProtocolError};
use thiserror::Error;
use std::io;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing a peer failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket handshake or socket failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Dial did not finish in time
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The same protocol/command pair was bound twice
    #[error("Duplicate binding for '{protocol}:{cmd}'")]
    DuplicateBinding {
        /// Protocol of the colliding route
        protocol: String,
        /// Command of the colliding route
        cmd: String,
    },

    /// The fabric is not listening yet
    #[error("Fabric is not listening")]
    NotListening,

    /// The fabric has been closed
    #[error("Fabric closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::from(err))
    }
}

impl From<TransportError> for Exception {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(e) => Exception::from(e),
            TransportError::Closed => Exception::abort_with("Fabric closed"),
            other => Exception::internal(other.to_string()),
        }
    }
}
