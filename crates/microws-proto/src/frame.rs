//! Frame structure and modes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What a frame asks of the receiving multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    /// Invoke a procedure
    Request,
    /// Settle an earlier request
    Response,
    /// Cancel an earlier request
    Abort,
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Request => 0,
            Mode::Response => 1,
            Mode::Abort => 2,
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Request),
            1 => Ok(Mode::Response),
            2 => Ok(Mode::Abort),
            other => Err(format!("unknown frame mode {}", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Request => write!(f, "REQUEST"),
            Mode::Response => write!(f, "RESPONSE"),
            Mode::Abort => write!(f, "ABORT"),
        }
    }
}

/// Protocol frame structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Correlation id, unique among outstanding ids of one channel
    pub id: u64,
    /// Frame mode
    pub mode: Mode,
    /// Whether the sender expects a correlated reply
    pub twoway: bool,
    /// Mode specific payload
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Create a new frame
    pub fn new(id: u64, mode: Mode, twoway: bool, data: Value) -> Self {
        Self {
            id,
            mode,
            twoway,
            data,
        }
    }

    /// Create a two-way request frame
    pub fn request(id: u64, data: Value) -> Self {
        Self::new(id, Mode::Request, true, data)
    }

    /// Create a response frame
    pub fn response(id: u64, data: Value) -> Self {
        Self::new(id, Mode::Response, false, data)
    }

    /// Create an abort frame targeting the request `target`
    pub fn abort(id: u64, target: u64) -> Self {
        Self::new(id, Mode::Abort, false, Value::from(target))
    }

    /// Request id an abort frame points at
    pub fn abort_target(&self) -> Option<u64> {
        match self.mode {
            Mode::Abort => self.data.as_u64(),
            _ => None,
        }
    }
}
