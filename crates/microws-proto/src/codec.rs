//! JSON frame codec
//!
//! One frame travels as one text message. Binary messages carrying UTF-8
//! JSON are accepted on the decode side as well.

use crate::{Frame, ProtocolError};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for encoding/decoding frames as JSON text
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum frame size this codec accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame to its JSON text form
    pub fn encode_frame(&self, frame: &Frame) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(frame)?;
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Decode a frame from a text message
    pub fn decode_text(&self, text: &str) -> Result<Frame, ProtocolError> {
        self.check_size(text.len())?;
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    /// Decode a frame from a binary message
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Frame, ProtocolError> {
        self.check_size(bytes.len())?;
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}
