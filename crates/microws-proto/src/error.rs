//! Error types for protocol operations

use thiserror::Error;
use crate::message::{status, Exception};

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid frame format
    #[error("Invalid frame format: {0}")]
    InvalidFrame(String),

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize
    },

    /// The outbound side of the channel is gone
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ProtocolError> for Exception {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::ChannelClosed => Exception::abort_with("Channel closed"),
            ProtocolError::Serialization(msg) | ProtocolError::InvalidFrame(msg) => {
                Exception::new(status::BAD_REQUEST, msg)
            }
            err @ ProtocolError::FrameTooLarge { .. } => {
                Exception::new(status::INTERNAL, err.to_string())
            }
        }
    }
}
