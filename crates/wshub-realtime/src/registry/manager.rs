//! Registry core: registration, lookup, lifecycle, and per-session
//! operations.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wshub_core::config::SessionsConfig;
use wshub_core::types::SessionId;

use crate::error::RegistryError;
use crate::message::cache::SendCache;
use crate::message::stream::read_for_send;
use crate::message::types::{CloseArgs, Message, Payload};
use crate::message::validator::{
    build_close_frame, validate_close_args, validate_ping_message, validate_wait_time,
};
use crate::metrics::RegistryMetrics;
use crate::session::handle::Session;
use crate::transport::Transport;

use super::state::ServerState;

/// State guarded by the registry mutex.
struct Guarded {
    sessions: HashMap<SessionId, Arc<Session>>,
    state: ServerState,
    keep_clean: bool,
    wait_time: Duration,
    sweep_timer: Option<CancellationToken>,
}

pub(super) struct RegistryInner {
    name: String,
    guarded: Mutex<Guarded>,
    pub(super) sweeping: AtomicBool,
    sweep_interval: Duration,
    fragment_size: usize,
    stream_read_chunk: usize,
    metrics: RegistryMetrics,
}

/// Concurrent map of session id → [`Session`] with a lifecycle gate.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    pub(super) inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry in the `Ready` state.
    ///
    /// `name` identifies the registry in logs (usually the service path).
    pub fn new(name: impl Into<String>, config: &SessionsConfig) -> Self {
        let wait_time = if config.wait_time_ms == 0 {
            warn!("Configured wait time is zero, using 1000 ms");
            Duration::from_millis(1000)
        } else {
            config.wait_time()
        };

        Self {
            inner: Arc::new(RegistryInner {
                name: name.into(),
                guarded: Mutex::new(Guarded {
                    sessions: HashMap::new(),
                    state: ServerState::Ready,
                    keep_clean: config.keep_clean,
                    wait_time,
                    sweep_timer: None,
                }),
                sweeping: AtomicBool::new(false),
                sweep_interval: config.sweep_interval(),
                fragment_size: config.fragment_size,
                stream_read_chunk: config.stream_read_chunk,
                metrics: RegistryMetrics::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.inner
            .guarded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// Payloads longer than this are delivered as a stream.
    pub fn fragment_size(&self) -> usize {
        self.inner.fragment_size
    }

    pub(super) fn stream_read_chunk(&self) -> usize {
        self.inner.stream_read_chunk
    }

    /// Registry counters.
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.inner.metrics
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// `Ready → Started`. Arms the sweep timer when keep-clean is on.
    pub fn start(&self) -> bool {
        let mut guard = self.lock();
        if guard.state != ServerState::Ready {
            warn!(registry = %self.inner.name, state = %guard.state, "Registry cannot be started");
            return false;
        }

        if guard.keep_clean {
            self.arm_sweep_timer(&mut guard);
        }
        guard.state = ServerState::Started;

        info!(registry = %self.inner.name, keep_clean = guard.keep_clean, "Session registry started");
        true
    }

    /// `Started → ShuttingDown → Stopped`, initiating a close on every
    /// registered session.
    ///
    /// Runs entirely under the registry lock. It only guarantees that a close
    /// was *initiated* on every session present when it was called; it does
    /// not wait for the peers. When `send_close_frame` is set, one close frame
    /// is built and shared by every session.
    pub fn stop(&self, args: CloseArgs, send_close_frame: bool) -> bool {
        let mut guard = self.lock();
        match guard.state {
            ServerState::ShuttingDown | ServerState::Stopped => {
                warn!(registry = %self.inner.name, state = %guard.state, "Registry is already stopping");
                return false;
            }
            ServerState::Ready | ServerState::Started => {}
        }

        guard.state = ServerState::ShuttingDown;
        if let Some(timer) = guard.sweep_timer.take() {
            timer.cancel();
        }

        let frame = send_close_frame.then(|| build_close_frame(&args));
        let wait_time = guard.wait_time;
        let count = guard.sessions.len();
        for session in guard.sessions.values() {
            session
                .transport()
                .close_with_frame(args.clone(), frame.clone(), wait_time);
        }

        guard.state = ServerState::Stopped;
        info!(
            registry = %self.inner.name,
            closed = count,
            code = args.code,
            "Session registry stopped"
        );
        true
    }

    /// Whether the periodic sweep is enabled.
    pub fn keep_clean(&self) -> bool {
        self.lock().keep_clean
    }

    /// Enable or disable the periodic sweep.
    ///
    /// Takes effect immediately when started; otherwise at the next start.
    pub fn set_keep_clean(&self, value: bool) {
        let mut guard = self.lock();
        if guard.keep_clean == value {
            return;
        }
        guard.keep_clean = value;

        if guard.state != ServerState::Started {
            return;
        }
        if value {
            self.arm_sweep_timer(&mut guard);
        } else if let Some(timer) = guard.sweep_timer.take() {
            timer.cancel();
        }
        debug!(registry = %self.inner.name, keep_clean = value, "Keep-clean toggled");
    }

    /// Ping timeout used by probes and sweeps.
    pub fn wait_time(&self) -> Duration {
        self.lock().wait_time
    }

    /// Change the ping timeout. Only allowed while `Ready` or `Stopped`.
    pub fn set_wait_time(&self, wait_time: Duration) -> bool {
        if let Err(e) = validate_wait_time(wait_time) {
            error!(registry = %self.inner.name, "{e}");
            return false;
        }

        let mut guard = self.lock();
        if !guard.state.is_idle() {
            error!(
                registry = %self.inner.name,
                state = %guard.state,
                "Wait time can only be changed while the registry is idle"
            );
            return false;
        }
        guard.wait_time = wait_time;
        true
    }

    fn arm_sweep_timer(&self, guard: &mut Guarded) {
        if guard.sweep_timer.is_some() {
            return;
        }
        if self.inner.sweep_interval.is_zero() {
            warn!(registry = %self.inner.name, "Sweep interval is zero, periodic sweep disabled");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(registry = %self.inner.name, "No async runtime, periodic sweep disabled");
            return;
        };

        let token = CancellationToken::new();
        runtime.spawn(run_sweep_timer(
            Arc::downgrade(&self.inner),
            self.inner.sweep_interval,
            token.clone(),
        ));
        guard.sweep_timer = Some(token);
    }

    // ── Registration ─────────────────────────────────────────────

    /// Register a transport, returning its new id.
    ///
    /// Returns `None` unless the registry is started; the caller is then
    /// expected to close the transport.
    pub fn register(&self, transport: Arc<dyn Transport>) -> Option<SessionId> {
        self.register_session(transport)
            .map(|session| session.id().clone())
    }

    /// Register a transport, returning the new [`Session`].
    pub fn register_session(&self, transport: Arc<dyn Transport>) -> Option<Arc<Session>> {
        let mut guard = self.lock();
        if guard.state != ServerState::Started {
            RegistryMetrics::inc(&self.inner.metrics.sessions_rejected);
            error!(
                registry = %self.inner.name,
                "{}",
                RegistryError::NotStarted(guard.state)
            );
            return None;
        }

        let mut id = SessionId::generate();
        while guard.sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let session = Arc::new(Session::new(id.clone(), transport));
        guard.sessions.insert(id.clone(), session.clone());
        drop(guard);

        RegistryMetrics::inc(&self.inner.metrics.sessions_opened);
        debug!(registry = %self.inner.name, session_id = %id, "Session registered");
        Some(session)
    }

    /// Remove a session. Returns whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.lock().sessions.remove(id).is_some();
        if removed {
            RegistryMetrics::inc(&self.inner.metrics.sessions_closed);
            debug!(registry = %self.inner.name, session_id = %id, "Session unregistered");
        }
        removed
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Look up a started session by id.
    pub fn try_get_session(&self, id: &str) -> Option<Arc<Session>> {
        let guard = self.lock();
        if guard.state != ServerState::Started {
            error!(registry = %self.inner.name, "{}", RegistryError::NotStarted(guard.state));
            return None;
        }
        if id.is_empty() {
            error!(registry = %self.inner.name, "Session id is empty");
            return None;
        }
        let session = guard.sessions.get(id).cloned();
        if session.is_none() {
            error!(
                registry = %self.inner.name,
                "{}",
                RegistryError::SessionNotFound(id.to_string())
            );
        }
        session
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Snapshot of registered ids.
    pub fn ids(&self) -> Vec<SessionId> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Snapshot of registered sessions. Empty once shutdown has begun.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let guard = self.lock();
        if matches!(
            guard.state,
            ServerState::ShuttingDown | ServerState::Stopped
        ) {
            return Vec::new();
        }
        guard.sessions.values().cloned().collect()
    }

    /// Runs `f` against the current state and session map under the lock.
    pub(super) fn with_locked<T>(
        &self,
        f: impl FnOnce(ServerState, &mut HashMap<SessionId, Arc<Session>>) -> T,
    ) -> T {
        let mut guard = self.lock();
        let state = guard.state;
        f(state, &mut guard.sessions)
    }

    // ── Per-session operations ───────────────────────────────────

    /// Initiate a normal close of one session.
    pub fn close_session(&self, id: &str) -> Result<(), RegistryError> {
        let session = self.require_session(id)?;
        session.transport().close(CloseArgs::normal());
        Ok(())
    }

    /// Initiate a close of one session with a status and reason.
    pub fn close_session_with(
        &self,
        id: &str,
        code: u16,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let args = CloseArgs::new(code, reason);
        if let Err(e) = validate_close_args(&args) {
            error!(registry = %self.inner.name, session_id = %id, "{e}");
            return Err(e);
        }
        let session = self.require_session(id)?;
        session.transport().close(args);
        Ok(())
    }

    /// Ping one session with an empty payload.
    pub async fn ping_to(&self, id: &str) -> bool {
        let Ok(session) = self.require_session(id) else {
            return false;
        };
        self.ping_session(&session, Bytes::new()).await
    }

    /// Ping one session with a text payload.
    pub async fn ping_to_with(&self, id: &str, message: &str) -> bool {
        if message.is_empty() {
            return self.ping_to(id).await;
        }
        let payload = match validate_ping_message(message) {
            Ok(p) => p,
            Err(e) => {
                error!(registry = %self.inner.name, session_id = %id, "{e}");
                return false;
            }
        };
        let Ok(session) = self.require_session(id) else {
            return false;
        };
        self.ping_session(&session, payload).await
    }

    pub(super) async fn ping_session(&self, session: &Session, payload: Bytes) -> bool {
        RegistryMetrics::inc(&self.inner.metrics.pings_sent);
        let alive = session
            .transport()
            .ping(payload, self.wait_time())
            .await;
        if !alive {
            RegistryMetrics::inc(&self.inner.metrics.pings_missed);
        }
        alive
    }

    /// Send a message to one session.
    pub async fn send_to(&self, id: &str, message: impl Into<Message>) -> Result<(), RegistryError> {
        let session = self.require_session(id)?;
        let message = message.into();
        let opcode = message.opcode();
        let payload = Payload::new(message.into_bytes(), self.inner.fragment_size);
        let cache = SendCache::new();

        let result = session.transport().send(opcode, &payload, &cache).await;
        cache.clear();
        match result {
            Ok(()) => {
                RegistryMetrics::inc(&self.inner.metrics.messages_sent);
                Ok(())
            }
            Err(e) => {
                RegistryMetrics::inc(&self.inner.metrics.send_failures);
                warn!(registry = %self.inner.name, session_id = %id, error = %e, "Send failed");
                Err(e.into())
            }
        }
    }

    /// Send a message to one session without waiting.
    ///
    /// `on_complete` receives whether the send succeeded. Returns `None`
    /// (and never calls `on_complete`) if the session cannot be found.
    pub fn send_to_async<F>(
        &self,
        id: &str,
        message: impl Into<Message>,
        on_complete: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.require_session(id).ok()?;

        let registry = self.clone();
        let id = id.to_string();
        let message = message.into();
        Some(tokio::spawn(async move {
            let sent = registry.send_to(&id, message).await.is_ok();
            on_complete(sent);
        }))
    }

    /// Read `length` bytes from `stream` and send them as binary to one
    /// session without waiting.
    ///
    /// Zero bytes read aborts without calling `on_complete`; a short read
    /// logs a warning and sends what was read.
    pub fn send_stream_to_async<R, F>(
        &self,
        id: &str,
        mut stream: R,
        length: usize,
        on_complete: F,
    ) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnOnce(bool) + Send + 'static,
    {
        if length == 0 {
            error!(registry = %self.inner.name, "Stream length must be greater than zero");
            return None;
        }
        self.require_session(id).ok()?;

        let registry = self.clone();
        let id = id.to_string();
        Some(tokio::spawn(async move {
            let data = match read_for_send(&mut stream, length, registry.stream_read_chunk()).await
            {
                Ok(data) => data,
                Err(e) => {
                    error!(registry = %registry.name(), session_id = %id, fatal = true, "{e}");
                    return;
                }
            };
            let sent = registry.send_to(&id, Message::Binary(data)).await.is_ok();
            on_complete(sent);
        }))
    }

    fn require_session(&self, id: &str) -> Result<Arc<Session>, RegistryError> {
        self.try_get_session(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.to_string()))
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Periodic sweep loop. Holds only a weak reference so a dropped registry
/// ends the task.
async fn run_sweep_timer(
    inner: Weak<RegistryInner>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let registry = SessionRegistry { inner };
                registry.sweep().await;
            }
        }
    }

    debug!("Sweep timer stopped");
}
