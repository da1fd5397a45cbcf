//! What a behavior sees of its own session.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use wshub_core::types::SessionId;

use crate::error::RegistryError;
use crate::message::cache::SendCache;
use crate::message::types::{CloseArgs, Message, Payload};
use crate::registry::SessionRegistry;
use crate::transport::{ReadyState, Transport};

use super::handle::Session;

/// Handle passed to every [`SessionBehavior`](super::SessionBehavior) hook
/// after a successful open.
#[derive(Clone)]
pub struct SessionContext {
    session: Arc<Session>,
    sessions: SessionRegistry,
}

impl SessionContext {
    pub(crate) fn new(session: Arc<Session>, sessions: SessionRegistry) -> Self {
        Self { session, sessions }
    }

    /// Assigned session id.
    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// When the session was registered.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.session.start_time()
    }

    /// Negotiated subprotocol.
    pub fn protocol(&self) -> Option<&str> {
        self.session.protocol()
    }

    /// Live ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.session.ready_state()
    }

    /// The registry this session belongs to.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.session.transport()
    }

    /// Send a message to this session only.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), RegistryError> {
        let message = message.into();
        let opcode = message.opcode();
        let payload = Payload::new(message.into_bytes(), self.sessions.fragment_size());
        let cache = SendCache::new();
        self.session
            .transport()
            .send(opcode, &payload, &cache)
            .await
            .map_err(RegistryError::from)
    }

    /// Initiate a close of this session.
    pub fn close(&self, args: CloseArgs) {
        self.session.transport().close(args);
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session", &self.session)
            .finish()
    }
}
