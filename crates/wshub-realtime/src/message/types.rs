//! Outbound/inbound message shapes and close arguments.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Close status codes used by the registry.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// The endpoint is going away (server shutdown, registration refused).
    pub const AWAY: u16 = 1001;
    /// Protocol error.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status code was present.
    pub const NO_STATUS: u16 = 1005;
    /// The connection was closed without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// The client expected an extension the server did not negotiate.
    pub const MANDATORY_EXTENSION: u16 = 1010;
    /// The server hit an unexpected condition.
    pub const SERVER_ERROR: u16 = 1011;
}

/// Data frame opcode of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    /// Opcode this message is sent with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the message into its raw bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

/// How a payload is handed to the transport.
///
/// Payloads at or below the fragment threshold go out as a single buffer;
/// larger ones are delivered as a stream of fragments so the transport never
/// has to frame the whole message at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Delivered as one frame.
    Single(Bytes),
    /// Delivered as consecutive fragments of at most `fragment_size` bytes.
    Stream {
        /// Full message data.
        data: Bytes,
        /// Maximum fragment length.
        fragment_size: usize,
    },
}

impl Payload {
    /// Choose the delivery path for `data` given the fragment threshold.
    pub fn new(data: Bytes, fragment_size: usize) -> Self {
        if fragment_size == 0 || data.len() <= fragment_size {
            Self::Single(data)
        } else {
            Self::Stream {
                data,
                fragment_size,
            }
        }
    }

    /// Whether this payload takes the stream delivery path.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// The full message data.
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Single(data) | Self::Stream { data, .. } => data,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Split into the frames the transport should write, in order.
    pub fn fragments(&self) -> Vec<Bytes> {
        match self {
            Self::Single(data) => vec![data.clone()],
            Self::Stream {
                data,
                fragment_size,
            } => {
                let mut out = Vec::with_capacity(data.len().div_ceil(*fragment_size));
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + fragment_size).min(data.len());
                    out.push(data.slice(offset..end));
                    offset = end;
                }
                out
            }
        }
    }
}

/// Status code and reason carried by a close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseArgs {
    /// Close status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseArgs {
    /// Create close arguments.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure without a reason.
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    /// Going-away closure.
    pub fn away(reason: impl Into<String>) -> Self {
        Self::new(close_code::AWAY, reason)
    }

    /// Abnormal closure (no close frame is exchanged).
    pub fn abnormal() -> Self {
        Self::new(close_code::ABNORMAL, "")
    }

    /// Close payload as it appears on the wire: big-endian code then reason.
    ///
    /// A `NO_STATUS` close without a reason has an empty payload.
    pub fn to_payload(&self) -> Bytes {
        if self.code == close_code::NO_STATUS && self.reason.is_empty() {
            return Bytes::new();
        }
        let mut buf = Vec::with_capacity(2 + self.reason.len());
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(self.reason.as_bytes());
        Bytes::from(buf)
    }
}

impl Default for CloseArgs {
    fn default() -> Self {
        Self::normal()
    }
}
