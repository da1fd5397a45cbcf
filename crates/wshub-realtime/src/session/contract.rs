//! Per-connection lifecycle contract.
//!
//! A [`Connection`] drives one transport through
//! `open → (message | error)* → close`. Taking `&mut self` on every hook
//! means the hooks of a single connection can never overlap, while
//! different connections run their hooks concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use wshub_core::types::SessionId;

use crate::message::types::{CloseArgs, Message};
use crate::registry::SessionRegistry;
use crate::transport::{Transport, TransportError};

use super::context::SessionContext;

/// User-supplied behavior for one connection.
///
/// Every hook has an empty default.
#[async_trait]
pub trait SessionBehavior: Send + 'static {
    /// Called once after the session has been registered.
    async fn on_open(&mut self, _ctx: &SessionContext) {}

    /// Called for every data message received.
    async fn on_message(&mut self, _ctx: &SessionContext, _message: Message) {}

    /// Called when the transport reports an error.
    async fn on_error(&mut self, _ctx: &SessionContext, _error: &TransportError) {}

    /// Called once after the session has been unregistered.
    async fn on_close(&mut self, _ctx: &SessionContext, _close: &CloseArgs) {}
}

#[async_trait]
impl SessionBehavior for Box<dyn SessionBehavior> {
    async fn on_open(&mut self, ctx: &SessionContext) {
        (**self).on_open(ctx).await
    }

    async fn on_message(&mut self, ctx: &SessionContext, message: Message) {
        (**self).on_message(ctx, message).await
    }

    async fn on_error(&mut self, ctx: &SessionContext, error: &TransportError) {
        (**self).on_error(ctx, error).await
    }

    async fn on_close(&mut self, ctx: &SessionContext, close: &CloseArgs) {
        (**self).on_close(ctx, close).await
    }
}

/// One connection participating in a [`SessionRegistry`].
pub struct Connection<B> {
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    behavior: B,
    context: Option<SessionContext>,
    closed: bool,
}

impl<B: SessionBehavior> Connection<B> {
    /// Bind a transport and a behavior to a registry.
    pub fn new(registry: SessionRegistry, transport: Arc<dyn Transport>, behavior: B) -> Self {
        Self {
            registry,
            transport,
            behavior,
            context: None,
            closed: false,
        }
    }

    /// Assigned id, once open succeeded.
    pub fn id(&self) -> Option<&SessionId> {
        self.context.as_ref().map(|ctx| ctx.id())
    }

    /// Registration time; `None` until open succeeded.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.context.as_ref().map(|ctx| ctx.start_time())
    }

    /// Session context, once open succeeded.
    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    /// The wrapped behavior.
    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Open hook: register, then run the behavior's open.
    ///
    /// If the registry refuses the session the transport is closed with
    /// "going away" and the behavior never sees an open.
    pub async fn open(&mut self) -> bool {
        if self.context.is_some() || self.closed {
            warn!("Open hook invoked more than once");
            return false;
        }

        let Some(session) = self.registry.register_session(self.transport.clone()) else {
            self.transport
                .close(CloseArgs::away("The service is unavailable"));
            return false;
        };

        let ctx = SessionContext::new(session, self.registry.clone());
        info!(session_id = %ctx.id(), "Session opened");
        self.behavior.on_open(&ctx).await;
        self.context = Some(ctx);
        true
    }

    /// Message hook.
    pub async fn message(&mut self, message: Message) {
        match self.context.as_ref() {
            Some(ctx) => self.behavior.on_message(ctx, message).await,
            None => debug!("Dropping message for a connection that never opened"),
        }
    }

    /// Error hook.
    pub async fn error(&mut self, error: TransportError) {
        match self.context.as_ref() {
            Some(ctx) => self.behavior.on_error(ctx, &error).await,
            None => debug!(error = %error, "Error on a connection that never opened"),
        }
    }

    /// Close hook: unregister exactly once, then run the behavior's close.
    ///
    /// A no-op if the connection never opened or was already closed.
    pub async fn close(&mut self, args: CloseArgs) {
        if self.closed {
            return;
        }
        self.closed = true;

        let Some(ctx) = self.context.as_ref() else {
            return;
        };

        self.registry.unregister(ctx.id().as_str());
        info!(session_id = %ctx.id(), code = args.code, "Session closed");
        self.behavior.on_close(ctx, &args).await;
    }

    /// Consume the connection, returning the behavior.
    pub fn into_behavior(self) -> B {
        self.behavior
    }
}
