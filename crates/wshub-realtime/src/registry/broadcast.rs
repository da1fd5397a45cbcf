//! Fan-out to every registered session, and lockstep liveness probes.
//!
//! A broadcast iterates a snapshot and stops as soon as the registry
//! leaves `Started`. It is best-effort: a concurrent `stop` can leave some
//! recipients with the message and others without.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use wshub_core::types::SessionId;

use crate::error::RegistryError;
use crate::message::cache::SendCache;
use crate::message::stream::read_for_send;
use crate::message::types::{Message, Opcode, Payload};
use crate::message::validator::{validate_data, validate_ping_message};
use crate::metrics::RegistryMetrics;

use super::manager::SessionRegistry;
use super::state::ServerState;

impl SessionRegistry {
    /// Broadcast binary data to every session.
    ///
    /// Returns the number of sessions the transport accepted the message for.
    pub async fn broadcast(&self, data: impl Into<Bytes>) -> Result<usize, RegistryError> {
        self.broadcast_raw(Opcode::Binary, data.into()).await
    }

    /// Broadcast text to every session.
    pub async fn broadcast_text(&self, text: &str) -> Result<usize, RegistryError> {
        self.broadcast_raw(Opcode::Text, Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    /// Broadcast a [`Message`] to every session.
    pub async fn broadcast_message(&self, message: Message) -> Result<usize, RegistryError> {
        let opcode = message.opcode();
        self.broadcast_raw(opcode, message.into_bytes()).await
    }

    /// Broadcast raw data with an explicit opcode.
    ///
    /// Text data must be valid UTF-8.
    pub async fn broadcast_raw(&self, opcode: Opcode, data: Bytes) -> Result<usize, RegistryError> {
        let payload = self.prepare_broadcast(opcode, data)?;
        let cache = SendCache::new();
        let sent = self.fan_out(opcode, &payload, &cache).await;
        cache.clear();
        Ok(sent)
    }

    /// Schedule a broadcast on the runtime and return immediately.
    ///
    /// State and payload are checked before scheduling; on failure nothing is
    /// scheduled and `None` is returned. Once scheduled, any failure or panic
    /// during the fan-out is logged and swallowed, the cache is released, and
    /// `on_complete` is invoked.
    pub fn broadcast_async<F>(&self, message: Message, on_complete: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let opcode = message.opcode();
        let payload = self.prepare_broadcast(opcode, message.into_bytes()).ok()?;

        let registry = self.clone();
        Some(tokio::spawn(async move {
            registry.fan_out_guarded(opcode, payload).await;
            on_complete();
        }))
    }

    /// Read `length` bytes from `stream`, then broadcast them as binary.
    ///
    /// Zero bytes read aborts the broadcast without calling `on_complete`;
    /// a short read logs a warning and broadcasts what was read.
    pub fn broadcast_stream_async<R, F>(
        &self,
        mut stream: R,
        length: usize,
        on_complete: F,
    ) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let state = self.state();
        if state != ServerState::Started {
            error!(registry = %self.name(), "{}", RegistryError::NotStarted(state));
            return None;
        }
        if length == 0 {
            error!(registry = %self.name(), "Stream length must be greater than zero");
            return None;
        }

        let registry = self.clone();
        Some(tokio::spawn(async move {
            let data = match read_for_send(&mut stream, length, registry.stream_read_chunk()).await
            {
                Ok(data) => data,
                Err(e) => {
                    error!(registry = %registry.name(), fatal = true, "{e}");
                    return;
                }
            };
            let payload = Payload::new(data, registry.fragment_size());
            registry.fan_out_guarded(Opcode::Binary, payload).await;
            on_complete();
        }))
    }

    /// Ping every session with an empty payload.
    ///
    /// Returns id → whether a pong arrived within the wait time. Sessions
    /// are probed one after another, so a pass can take up to one wait time
    /// per unresponsive session.
    pub async fn broadping(&self) -> HashMap<SessionId, bool> {
        let state = self.state();
        if state != ServerState::Started {
            error!(registry = %self.name(), "{}", RegistryError::NotStarted(state));
            return HashMap::new();
        }
        self.probe(Bytes::new()).await
    }

    /// Ping every session with a text payload.
    ///
    /// An empty message behaves like [`broadping`](Self::broadping). A
    /// message that does not fit a control frame yields an empty mapping.
    pub async fn broadping_message(&self, message: &str) -> HashMap<SessionId, bool> {
        if message.is_empty() {
            return self.broadping().await;
        }
        let payload = match validate_ping_message(message) {
            Ok(p) => p,
            Err(e) => {
                error!(registry = %self.name(), "{e}");
                return HashMap::new();
            }
        };
        let state = self.state();
        if state != ServerState::Started {
            error!(registry = %self.name(), "{}", RegistryError::NotStarted(state));
            return HashMap::new();
        }
        self.probe(payload).await
    }

    /// Ids of sessions that answered a fresh probe.
    ///
    /// Not a cheap accessor: this pings every session.
    pub async fn active_ids(&self) -> Vec<SessionId> {
        self.broadping()
            .await
            .into_iter()
            .filter_map(|(id, alive)| alive.then_some(id))
            .collect()
    }

    /// Ids of sessions that did not answer a fresh probe.
    ///
    /// Not a cheap accessor: this pings every session.
    pub async fn inactive_ids(&self) -> Vec<SessionId> {
        self.broadping()
            .await
            .into_iter()
            .filter_map(|(id, alive)| (!alive).then_some(id))
            .collect()
    }

    pub(super) async fn probe(&self, payload: Bytes) -> HashMap<SessionId, bool> {
        let mut results = HashMap::new();
        for session in self.sessions() {
            if self.state() != ServerState::Started {
                error!(registry = %self.name(), "The service is shutting down");
                break;
            }
            let alive = self.ping_session(&session, payload.clone()).await;
            results.insert(session.id().clone(), alive);
        }
        results
    }

    fn prepare_broadcast(&self, opcode: Opcode, data: Bytes) -> Result<Payload, RegistryError> {
        let state = self.state();
        if state != ServerState::Started {
            let err = RegistryError::NotStarted(state);
            error!(registry = %self.name(), "{err}");
            return Err(err);
        }
        if let Err(e) = validate_data(opcode, &data) {
            error!(registry = %self.name(), "{e}");
            return Err(e);
        }
        Ok(Payload::new(data, self.fragment_size()))
    }

    /// Fan-out with every failure contained: panics are caught and logged,
    /// and the cache is released on all paths.
    async fn fan_out_guarded(&self, opcode: Opcode, payload: Payload) {
        let cache = SendCache::new();
        let outcome = AssertUnwindSafe(self.fan_out(opcode, &payload, &cache))
            .catch_unwind()
            .await;
        cache.clear();

        if outcome.is_err() {
            error!(registry = %self.name(), fatal = true, "Broadcast aborted by a panic");
        }
    }

    async fn fan_out(&self, opcode: Opcode, payload: &Payload, cache: &SendCache) -> usize {
        RegistryMetrics::inc(&self.metrics().broadcasts);

        let mut sent = 0usize;
        for session in self.sessions() {
            if self.state() != ServerState::Started {
                error!(registry = %self.name(), "The service is shutting down");
                break;
            }
            match session.transport().send(opcode, payload, cache).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    RegistryMetrics::inc(&self.metrics().send_failures);
                    warn!(
                        registry = %self.name(),
                        session_id = %session.id(),
                        error = %e,
                        "Broadcast send failed"
                    );
                }
            }
        }

        RegistryMetrics::add(&self.metrics().messages_sent, sent as u64);
        debug!(
            registry = %self.name(),
            opcode = %opcode,
            bytes = payload.len(),
            stream = payload.is_stream(),
            sent,
            "Broadcast complete"
        );
        sent
    }
}
