//! Call payloads, response envelopes and exceptions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Well-known status codes
pub mod status {
    /// Successful call
    pub const OK: i64 = 200;
    /// No procedure bound for the requested protocol/command
    pub const UNBOUND: i64 = 104;
    /// Request payload or arguments could not be decoded
    pub const BAD_REQUEST: i64 = 400;
    /// Unknown namespace
    pub const NOT_FOUND: i64 = 404;
    /// The directory link is currently down
    pub const DIRECTORY_UNAVAILABLE: i64 = 414;
    /// Address scheme is not `ws`
    pub const PROTOCOL_UNACCEPTED: i64 = 461;
    /// Untagged handler failure
    pub const INTERNAL: i64 = 500;
    /// Local timeout code
    pub const TIMEOUT: &str = "ETIMEDOUT";
    /// Local or remote abort code
    pub const ABORT: &str = "ECONNABORTED";
}

/// Commands served by the namespace registry
pub mod directory {
    /// Protocol the registry commands are bound under
    pub const PROTOCOL: &str = "ws";
    /// Announce `namespace -> caller host`
    pub const ONLINE: &str = "online";
    /// Resolve a namespace to a host, or null
    pub const WHERE: &str = "where";
}

/// Status carried by a response, numeric or symbolic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Status {
    /// Numeric code such as 200 or 404
    Code(i64),
    /// Symbolic code such as `ETIMEDOUT`
    Text(String),
}

impl Status {
    /// Whether this is the success status
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Code(status::OK))
    }
}

impl From<i64> for Status {
    fn from(code: i64) -> Self {
        Status::Code(code)
    }
}

impl From<&str> for Status {
    fn from(code: &str) -> Self {
        Status::Text(code.to_string())
    }
}

impl From<String> for Status {
    fn from(code: String) -> Self {
        Status::Text(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Code(code) => write!(f, "{}", code),
            Status::Text(code) => f.write_str(code),
        }
    }
}

/// Error outcome of a call, round-tripped opaquely between peers
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{status}] {message}")]
pub struct Exception {
    /// Status code
    pub status: Status,
    /// Human-readable message
    pub message: String,
}

impl Exception {
    /// Create an exception with an arbitrary status
    pub fn new(status: impl Into<Status>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }

    /// Local timeout
    pub fn timeout() -> Self {
        Self::new(status::TIMEOUT, "Timeout")
    }

    /// Caller- or timeout-initiated abort
    pub fn abort() -> Self {
        Self::abort_with("Abort")
    }

    /// Abort with a specific message
    pub fn abort_with(message: impl Into<String>) -> Self {
        Self::new(status::ABORT, message)
    }

    /// 404-class error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(status::NOT_FOUND, message)
    }

    /// Untagged failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(status::INTERNAL, message)
    }

    /// Whether this exception reports a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(&self.status, Status::Text(code) if code == status::TIMEOUT)
    }

    /// Whether this exception reports an abort
    pub fn is_abort(&self) -> bool {
        matches!(&self.status, Status::Text(code) if code == status::ABORT)
    }
}

/// Payload of a REQUEST frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    /// Protocol namespace of the procedure
    pub protocol: String,
    /// Command within the protocol
    pub cmd: String,
    /// Positional arguments
    #[serde(default)]
    pub props: Vec<Value>,
}

impl CallPayload {
    /// Create a call payload
    pub fn new(protocol: impl Into<String>, cmd: impl Into<String>, props: Vec<Value>) -> Self {
        Self {
            protocol: protocol.into(),
            cmd: cmd.into(),
            props,
        }
    }
}

/// Payload of a RESPONSE frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// 200 on success, anything else is an error
    pub status: Status,
    /// Result value (null on error)
    #[serde(default)]
    pub data: Value,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    /// Successful envelope
    pub fn ok(data: Value) -> Self {
        Self {
            status: Status::Code(status::OK),
            data,
            message: None,
        }
    }

    /// Error envelope built from an exception
    pub fn error(exception: &Exception) -> Self {
        Self {
            status: exception.status.clone(),
            data: Value::Null,
            message: Some(exception.message.clone()),
        }
    }

    /// Convert into the caller-side outcome
    pub fn into_result(self) -> Result<Value, Exception> {
        if self.status.is_ok() {
            Ok(self.data)
        } else {
            Err(Exception {
                status: self.status,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}
