//! The per-connection transport seam.
//!
//! The registry never speaks the wire protocol itself. Every connection it
//! tracks is reached through a [`Transport`], which owns framing, masking,
//! compression and the close handshake.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::cache::SendCache;
use crate::message::types::{CloseArgs, Opcode, Payload};

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// Handshake not yet complete.
    Connecting,
    /// Open for sending and receiving.
    Open,
    /// A close handshake is in flight.
    Closing,
    /// Closed.
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Failure reported by a transport send.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not open.
    #[error("connection is not open (state: {0})")]
    NotOpen(ReadyState),
    /// The underlying socket failed.
    #[error("connection failed: {0}")]
    Io(String),
}

/// Capability exposing one live WebSocket connection.
///
/// `close` and `close_with_frame` only *initiate* a close and must return
/// without calling back into the registry: the registry invokes them while
/// holding its mutation lock. The close hook runs later, from the
/// connection's own task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a data message. `cache` is shared by every recipient of the
    /// same fan-out call.
    async fn send(
        &self,
        opcode: Opcode,
        payload: &Payload,
        cache: &SendCache,
    ) -> Result<(), TransportError>;

    /// Send a ping and wait up to `timeout` for the pong.
    ///
    /// Returns `false` on timeout or when the connection is not open.
    async fn ping(&self, payload: Bytes, timeout: Duration) -> bool;

    /// Initiate a close with the given status.
    fn close(&self, args: CloseArgs);

    /// Initiate a close using a pre-built close frame, waiting at most
    /// `timeout` for the peer's reply in the background.
    fn close_with_frame(&self, args: CloseArgs, frame: Option<Bytes>, timeout: Duration);

    /// Current state, read live.
    fn ready_state(&self) -> ReadyState;

    /// Negotiated subprotocol.
    fn protocol(&self) -> Option<String>;

    /// Set the subprotocol. Only honoured before the connection opens;
    /// returns whether the value was accepted.
    fn set_protocol(&self, protocol: String) -> bool;
}
