//! Shared helpers for realtime integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use wshub_core::config::SessionsConfig;
use wshub_realtime::message::{CompressionMethod, SendCache};
use wshub_realtime::{CloseArgs, Opcode, Payload, ReadyState, SessionRegistry, Transport, TransportError};

/// One recorded send.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub opcode: Opcode,
    pub payload: Payload,
    pub cache_addr: usize,
}

/// One recorded close.
#[derive(Debug, Clone)]
pub struct CloseRecord {
    pub args: CloseArgs,
    pub frame: Option<Bytes>,
}

/// Scripted in-memory transport.
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<ReadyState>,
    alive: AtomicBool,
    fail_sends: AtomicBool,
    panic_next_send: AtomicBool,
    send_delay: Mutex<Duration>,
    ping_delay: Mutex<Duration>,
    protocol: Mutex<Option<String>>,
    sends: Mutex<Vec<SentRecord>>,
    closes: Mutex<Vec<CloseRecord>>,
    pings: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReadyState::Open),
            alive: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            panic_next_send: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
            ping_delay: Mutex::new(Duration::ZERO),
            protocol: Mutex::new(None),
            sends: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
        })
    }

    /// Open transport whose pings fail.
    pub fn unresponsive() -> Arc<Self> {
        let t = Self::new();
        t.set_alive(false);
        t
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// The next send panics instead of returning.
    pub fn panic_next_send(&self) {
        self.panic_next_send.store(true, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn sends(&self) -> Vec<SentRecord> {
        self.sends.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<CloseRecord> {
        self.closes.lock().unwrap().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        opcode: Opcode,
        payload: &Payload,
        cache: &SendCache,
    ) -> Result<(), TransportError> {
        if self.panic_next_send.swap(false, Ordering::SeqCst) {
            let _ = cache.get_or_encode(CompressionMethod::None, || payload.data().clone());
            panic!("transport exploded mid-send");
        }
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io("broken pipe".to_string()));
        }
        self.sends.lock().unwrap().push(SentRecord {
            opcode,
            payload: payload.clone(),
            cache_addr: cache as *const SendCache as usize,
        });
        Ok(())
    }

    async fn ping(&self, _payload: Bytes, timeout: Duration) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return false;
            }
        }
        self.alive.load(Ordering::SeqCst) && self.ready_state() == ReadyState::Open
    }

    fn close(&self, args: CloseArgs) {
        self.closes.lock().unwrap().push(CloseRecord { args, frame: None });
        self.set_state(ReadyState::Closing);
    }

    fn close_with_frame(&self, args: CloseArgs, frame: Option<Bytes>, _timeout: Duration) {
        self.closes.lock().unwrap().push(CloseRecord { args, frame });
        self.set_state(ReadyState::Closing);
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn protocol(&self) -> Option<String> {
        self.protocol.lock().unwrap().clone()
    }

    fn set_protocol(&self, protocol: String) -> bool {
        if self.ready_state() != ReadyState::Connecting {
            return false;
        }
        *self.protocol.lock().unwrap() = Some(protocol);
        true
    }
}

/// Registry config without the periodic sweep.
pub fn test_config() -> SessionsConfig {
    SessionsConfig {
        keep_clean: false,
        ..SessionsConfig::default()
    }
}

/// A started registry without the periodic sweep.
pub fn started_registry() -> SessionRegistry {
    let registry = SessionRegistry::new("/test", &test_config());
    assert!(registry.start());
    registry
}
