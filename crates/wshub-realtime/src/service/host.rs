//! One WebSocket service mounted at a path.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use wshub_core::config::SessionsConfig;

use crate::message::types::CloseArgs;
use crate::registry::SessionRegistry;
use crate::session::contract::{Connection, SessionBehavior};
use crate::transport::Transport;

/// Produces a fresh behavior for every accepted connection.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn SessionBehavior> + Send + Sync>;

/// A service: its path, its registry, and how to build per-connection
/// behavior.
pub struct ServiceHost {
    path: String,
    sessions: SessionRegistry,
    factory: BehaviorFactory,
    protocols: Vec<String>,
}

impl ServiceHost {
    /// Create a host for `path` whose connections run behaviors built by
    /// `factory`.
    pub fn new<F, B>(path: impl Into<String>, config: &SessionsConfig, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: SessionBehavior,
    {
        let path = path.into();
        Self {
            sessions: SessionRegistry::new(path.clone(), config),
            path,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn SessionBehavior>),
            protocols: Vec::new(),
        }
    }

    /// Subprotocols this service accepts, in preference order.
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Mount path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The service's session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Accepted subprotocols.
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Pick the first requested subprotocol this service accepts.
    pub fn negotiate_protocol<'a, I>(&self, requested: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        requested
            .into_iter()
            .map(str::trim)
            .find(|p| self.protocols.iter().any(|accepted| accepted == p))
            .map(str::to_string)
    }

    /// Bind a freshly handshaken transport to this service.
    pub fn connect(&self, transport: Arc<dyn Transport>) -> Connection<Box<dyn SessionBehavior>> {
        Connection::new(self.sessions.clone(), transport, (self.factory)())
    }

    /// Start accepting sessions.
    pub fn start(&self) -> bool {
        self.sessions.start()
    }

    /// Stop the service, sending `code`/`reason` to every session.
    pub fn stop(&self, code: u16, reason: &str) -> bool {
        info!(path = %self.path, code, "Stopping service");
        self.sessions.stop(CloseArgs::new(code, reason), true)
    }

    /// Forwarded to the registry.
    pub fn keep_clean(&self) -> bool {
        self.sessions.keep_clean()
    }

    /// Forwarded to the registry.
    pub fn set_keep_clean(&self, value: bool) {
        self.sessions.set_keep_clean(value);
    }

    /// Forwarded to the registry.
    pub fn wait_time(&self) -> Duration {
        self.sessions.wait_time()
    }

    /// Forwarded to the registry.
    pub fn set_wait_time(&self, wait_time: Duration) -> bool {
        self.sessions.set_wait_time(wait_time)
    }
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("path", &self.path)
            .field("protocols", &self.protocols)
            .finish()
    }
}
