//! Adapts an axum `WebSocket` to the registry's [`Transport`] seam.
//!
//! Outbound frames go through an unbounded channel drained by a single
//! writer task, so `close` never blocks and never re-enters the registry.
//! The reader half stays with the connection task in `handlers::ws`.
//!
//! Every close handshake the server starts is bounded: if the peer has not
//! finished it within the close timeout the connection is aborted, so a
//! silent peer cannot stay `Closing` forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use wshub_realtime::message::{CompressionMethod, SendCache, close_code};
use wshub_realtime::{CloseArgs, Opcode, Payload, ReadyState, Transport, TransportError};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Work item for the writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Write a frame.
    Frame(WsMessage),
    /// Stop writing and drop the sink.
    Abort,
}

/// One axum WebSocket as seen by the registry.
#[derive(Debug)]
pub struct AxumTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: AtomicU8,
    protocol: Mutex<Option<String>>,
    pending_pings: Mutex<HashMap<u64, (Bytes, oneshot::Sender<()>)>>,
    next_ping: AtomicU64,
    close_timeout: Duration,
    aborted: CancellationToken,
    finished: CancellationToken,
}

impl AxumTransport {
    /// Create a transport in the connecting state, returning the receiver
    /// the writer task drains.
    ///
    /// `close_timeout` bounds how long a close started by [`Transport::close`]
    /// waits for the peer before the connection is dropped.
    pub fn new(close_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound,
            state: AtomicU8::new(CONNECTING),
            protocol: Mutex::new(None),
            pending_pings: Mutex::new(HashMap::new()),
            next_ping: AtomicU64::new(0),
            close_timeout,
            aborted: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        (transport, rx)
    }

    /// Handshake finished.
    pub fn mark_open(&self) {
        let _ = self
            .state
            .compare_exchange(CONNECTING, OPEN, Ordering::AcqRel, Ordering::Acquire);
    }

    /// The socket is gone.
    pub fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.finished.cancel();
    }

    /// A pong arrived; completes the pings whose payload it echoes.
    ///
    /// Pongs answering a ping that already timed out match nothing.
    pub fn pong_received(&self, payload: &[u8]) {
        let mut pending = self.pending_pings.lock().unwrap_or_else(|e| e.into_inner());
        let answered: Vec<u64> = pending
            .iter()
            .filter(|(_, (sent, _))| sent.as_ref() == payload)
            .map(|(id, _)| *id)
            .collect();
        if answered.is_empty() {
            debug!("Unsolicited or late pong ignored");
        }
        for id in answered {
            if let Some((_, tx)) = pending.remove(&id) {
                let _ = tx.send(());
            }
        }
    }

    /// Resolves once the connection has been aborted without a handshake.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.aborted.cancelled()
    }

    /// Stop the writer task.
    pub fn shutdown_writer(&self) {
        let _ = self.outbound.send(Outbound::Abort);
    }

    /// Moves to `Closing`; returns false if a close was already under way.
    fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state < CLOSING).then_some(CLOSING)
            })
            .is_ok()
    }

    fn abort(&self) {
        self.aborted.cancel();
        let _ = self.outbound.send(Outbound::Abort);
    }

    /// Send a close frame and drop the connection if the peer has not
    /// completed the handshake within `timeout`.
    fn close_gracefully(&self, args: &CloseArgs, timeout: Duration) {
        let _ = self.outbound.send(Outbound::Frame(Self::close_frame(args)));

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, close handshake is unbounded");
            return;
        };
        let aborted = self.aborted.clone();
        let finished = self.finished.clone();
        let outbound = self.outbound.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = aborted.cancelled() => {}
                _ = finished.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    debug!("Peer did not finish the close handshake, aborting");
                    aborted.cancel();
                    let _ = outbound.send(Outbound::Abort);
                }
            }
        });
    }

    fn forget_ping(&self, id: u64) {
        self.pending_pings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn close_frame(args: &CloseArgs) -> WsMessage {
        WsMessage::Close(Some(CloseFrame {
            code: args.code,
            reason: args.reason.clone().into(),
        }))
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn send(
        &self,
        opcode: Opcode,
        payload: &Payload,
        cache: &SendCache,
    ) -> Result<(), TransportError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(TransportError::NotOpen(state));
        }

        // No compression is negotiated; the cache shares one buffer per fan-out.
        let data = cache.get_or_encode(CompressionMethod::None, || payload.data().clone());
        // axum only writes whole messages and cannot emit continuation frames,
        // so a `Payload::Stream` goes out as a single frame of the full data.
        if payload.is_stream() {
            debug!(bytes = payload.len(), "Sending stream payload as one frame");
        }
        let message = match opcode {
            Opcode::Text => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|e| TransportError::Io(format!("invalid text payload: {e}")))?;
                WsMessage::Text(text.into())
            }
            Opcode::Binary => WsMessage::Binary(data),
        };

        self.outbound
            .send(Outbound::Frame(message))
            .map_err(|_| TransportError::Io("writer task has stopped".to_string()))
    }

    async fn ping(&self, payload: Bytes, timeout: Duration) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }

        // An empty probe carries a sequence number so a late pong from an
        // earlier probe cannot answer this one.
        let id = self.next_ping.fetch_add(1, Ordering::Relaxed);
        let payload = if payload.is_empty() {
            Bytes::copy_from_slice(&id.to_be_bytes())
        } else {
            payload
        };

        let (tx, rx) = oneshot::channel();
        self.pending_pings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (payload.clone(), tx));

        if self
            .outbound
            .send(Outbound::Frame(WsMessage::Ping(payload)))
            .is_err()
        {
            self.forget_ping(id);
            return false;
        }

        let answered = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        self.forget_ping(id);
        answered
    }

    fn close(&self, args: CloseArgs) {
        if !self.begin_close() {
            return;
        }

        if args.code == close_code::ABNORMAL {
            debug!("Dropping connection without a close handshake");
            self.abort();
            return;
        }

        self.close_gracefully(&args, self.close_timeout);
    }

    fn close_with_frame(&self, args: CloseArgs, frame: Option<Bytes>, timeout: Duration) {
        if !self.begin_close() {
            return;
        }

        // axum owns framing, so the pre-built frame only signals that one is due.
        if frame.is_none() {
            self.abort();
            return;
        }
        self.close_gracefully(&args, timeout);
    }

    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::Acquire) {
            CONNECTING => ReadyState::Connecting,
            OPEN => ReadyState::Open,
            CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn protocol(&self) -> Option<String> {
        self.protocol
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_protocol(&self, protocol: String) -> bool {
        if self.ready_state() != ReadyState::Connecting {
            return false;
        }
        *self.protocol.lock().unwrap_or_else(|e| e.into_inner()) = Some(protocol);
        true
    }
}

/// Drain `rx` into the socket until a close frame is written, an abort is
/// requested, or the socket fails.
pub async fn run_writer(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(message) => {
                let is_close = matches!(message, WsMessage::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            Outbound::Abort => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_state_transitions() {
        let (transport, _rx) = AxumTransport::new(CLOSE_TIMEOUT);
        assert_eq!(transport.ready_state(), ReadyState::Connecting);
        assert!(transport.set_protocol("chat".to_string()));

        transport.mark_open();
        assert_eq!(transport.ready_state(), ReadyState::Open);
        assert!(!transport.set_protocol("other".to_string()));
        assert_eq!(transport.protocol().as_deref(), Some("chat"));
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        let payload = Payload::new(Bytes::from_static(b"hi"), 1016);
        let cache = SendCache::new();

        let err = transport
            .send(Opcode::Text, &payload, &cache)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotOpen(ReadyState::Connecting));

        transport.mark_open();
        transport.send(Opcode::Text, &payload, &cache).await.unwrap();
        match rx.recv().await {
            Some(Outbound::Frame(WsMessage::Text(text))) => assert_eq!(text.as_str(), "hi"),
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_initiated_once() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();

        transport.close(CloseArgs::normal());
        transport.close(CloseArgs::away("again"));

        match rx.recv().await {
            Some(Outbound::Frame(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, close_code::NORMAL)
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.ready_state(), ReadyState::Closing);
    }

    #[tokio::test]
    async fn test_abnormal_close_aborts() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();

        transport.close(CloseArgs::abnormal());
        transport.aborted().await;
        assert!(matches!(rx.recv().await, Some(Outbound::Abort)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_times_out_without_pong() {
        let (transport, _rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();
        assert!(!transport.ping(Bytes::new(), Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_ping_resolves_on_pong() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        let transport = std::sync::Arc::new(transport);
        transport.mark_open();

        let responder = {
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Some(Outbound::Frame(WsMessage::Ping(payload))) = rx.recv().await {
                    transport.pong_received(&payload);
                }
            })
        };

        assert!(transport.ping(Bytes::new(), Duration::from_secs(5)).await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_pong_does_not_answer_newer_ping() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        let transport = std::sync::Arc::new(transport);
        transport.mark_open();

        assert!(!transport.ping(Bytes::new(), Duration::from_millis(20)).await);
        let stale = match rx.recv().await {
            Some(Outbound::Frame(WsMessage::Ping(payload))) => payload,
            other => panic!("unexpected outbound: {other:?}"),
        };

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.ping(Bytes::new(), Duration::from_secs(5)).await })
        };
        let fresh = match rx.recv().await {
            Some(Outbound::Frame(WsMessage::Ping(payload))) => payload,
            other => panic!("unexpected outbound: {other:?}"),
        };
        assert_ne!(stale, fresh);

        transport.pong_received(&stale);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        transport.pong_received(&fresh);
        assert!(pending.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_aborted_after_close_timeout() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();

        transport.close(CloseArgs::normal());
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Frame(WsMessage::Close(Some(_))))
        ));

        let aborted = tokio::time::timeout(Duration::from_secs(3600), transport.aborted()).await;
        assert!(aborted.is_ok(), "close handshake must be bounded");
        assert!(matches!(rx.recv().await, Some(Outbound::Abort)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_handshake_is_not_aborted() {
        let (transport, _rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();

        transport.close(CloseArgs::normal());
        transport.mark_closed();

        let aborted = tokio::time::timeout(Duration::from_secs(10), transport.aborted()).await;
        assert!(aborted.is_err());
    }

    #[tokio::test]
    async fn test_stream_payload_is_sent_as_one_frame() {
        let (transport, mut rx) = AxumTransport::new(CLOSE_TIMEOUT);
        transport.mark_open();
        let data = Bytes::from(vec![9u8; 40]);
        let payload = Payload::new(data.clone(), 16);
        assert!(payload.is_stream());

        transport
            .send(Opcode::Binary, &payload, &SendCache::new())
            .await
            .unwrap();

        match rx.recv().await {
            Some(Outbound::Frame(WsMessage::Binary(sent))) => assert_eq!(sent, data),
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
