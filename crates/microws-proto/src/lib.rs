//! # Microws Protocol
//!
//! Wire frames, the JSON frame codec, and the correlation-based request
//! multiplexer shared by every microws peer.

#![warn(missing_docs)]

/// Frame structure and modes
pub mod frame;

/// Call payloads, response envelopes and exceptions
pub mod message;

/// JSON frame codec
pub mod codec;

/// Request/response/abort multiplexing
pub mod multiplexer;

/// Error types for protocol operations
pub mod error;

pub use frame::{Frame, Mode};
pub use message::{directory, status, CallPayload, Exception, ResponseEnvelope, Status};
pub use codec::FrameCodec;
pub use multiplexer::{AbortHandle, Call, Executor, Multiplexer, DEFAULT_TIMEOUT, MAX_SAFE_ID};
pub use error::ProtocolError;
