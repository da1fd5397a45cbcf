//! A registered session.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wshub_core::types::SessionId;

use crate::transport::{ReadyState, Transport};

/// One registered connection plus its identity and metadata.
///
/// A `Session` only exists once registration succeeded, so its id and start
/// time are always set. The ready state is never cached; it is read from the
/// transport on every call.
pub struct Session {
    id: SessionId,
    transport: Arc<dyn Transport>,
    protocol: Option<String>,
    start_time: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: SessionId, transport: Arc<dyn Transport>) -> Self {
        let protocol = transport.protocol();
        Self {
            id,
            transport,
            protocol,
            start_time: Utc::now(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The connection's transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Subprotocol negotiated before open.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// When registration succeeded.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Live ready state of the transport.
    pub fn ready_state(&self) -> ReadyState {
        self.transport.ready_state()
    }

    /// Serializable snapshot.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            protocol: self.protocol.clone(),
            start_time: self.start_time,
            ready_state: self.ready_state(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("start_time", &self.start_time)
            .finish()
    }
}

/// Snapshot of a session (serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: SessionId,
    /// Subprotocol
    pub protocol: Option<String>,
    /// Registered at
    pub start_time: DateTime<Utc>,
    /// Ready state at snapshot time
    pub ready_state: ReadyState,
}
