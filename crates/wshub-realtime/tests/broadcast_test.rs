//! Integration tests for fan-out and broadcast probing.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use common::{started_registry, test_config, MockTransport};
use wshub_core::config::SessionsConfig;
use wshub_realtime::{CloseArgs, Message, Opcode, RegistryError, ServerState, SessionRegistry};

#[tokio::test]
async fn test_broadcast_sends_once_to_each_session() {
    let registry = started_registry();
    let transports: Vec<_> = (0..4).map(|_| MockTransport::new()).collect();
    for t in &transports {
        registry.register(t.clone()).unwrap();
    }

    let sent = registry.broadcast_text("hello everyone").await.unwrap();
    assert_eq!(sent, 4);

    let cache_addr = transports[0].sends()[0].cache_addr;
    for t in &transports {
        let sends = t.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].opcode, Opcode::Text);
        assert_eq!(&sends[0].payload.data()[..], b"hello everyone");
        assert!(!sends[0].payload.is_stream());
        assert_eq!(sends[0].cache_addr, cache_addr, "one cache per broadcast");
    }
}

#[tokio::test]
async fn test_large_broadcast_takes_stream_path() {
    let registry = SessionRegistry::new(
        "/test",
        &SessionsConfig {
            keep_clean: false,
            fragment_size: 16,
            ..SessionsConfig::default()
        },
    );
    registry.start();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    let data = Bytes::from(vec![7u8; 40]);
    registry.broadcast(data.clone()).await.unwrap();

    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].opcode, Opcode::Binary);
    assert!(sends[0].payload.is_stream());
    assert_eq!(sends[0].payload.fragments().len(), 3);
    assert_eq!(sends[0].payload.data(), &data);
}

#[tokio::test]
async fn test_broadcast_requires_started() {
    let registry = SessionRegistry::new("/test", &test_config());
    let err = registry.broadcast_text("nope").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotStarted(_)));
    assert!(registry
        .broadcast_async(Message::from("nope"), || panic!("must not run"))
        .is_none());
}

#[tokio::test]
async fn test_broadcast_rejects_invalid_text() {
    let registry = started_registry();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    let err = registry
        .broadcast_raw(Opcode::Text, Bytes::from_static(&[0xff, 0xfe]))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPayload(_)));
    assert!(transport.sends().is_empty());
}

#[tokio::test]
async fn test_failed_recipient_does_not_stop_fan_out() {
    let registry = started_registry();
    let broken = MockTransport::new();
    broken.fail_sends();
    let healthy = MockTransport::new();
    registry.register(broken).unwrap();
    registry.register(healthy.clone()).unwrap();

    let sent = registry.broadcast(vec![1u8, 2, 3]).await.unwrap();

    assert_eq!(sent, 1);
    assert_eq!(healthy.sends().len(), 1);
    assert_eq!(registry.metrics().snapshot().send_failures, 1);
}

#[tokio::test]
async fn test_broadcast_async_invokes_callback() {
    let registry = started_registry();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let handle = registry
        .broadcast_async(Message::from("async"), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .expect("scheduled");

    handle.await.unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(transport.sends().len(), 1);
}

#[tokio::test]
async fn test_broadcast_async_callback_runs_after_transport_failure() {
    let registry = started_registry();
    let transport = MockTransport::new();
    transport.fail_sends();
    registry.register(transport).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = registry
        .broadcast_async(Message::from("x"), move || {
            let _ = tx.send(());
        })
        .unwrap();

    handle.await.expect("worker survives");
    assert!(rx.await.is_ok());
}

#[tokio::test]
async fn test_broadcast_stream_partial_read_is_delivered() {
    let registry = started_registry();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let source: &'static [u8] = b"only this much";
    let handle = registry
        .broadcast_stream_async(source, 1024, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    handle.await.unwrap();
    assert!(done.load(Ordering::SeqCst));
    let sends = transport.sends();
    assert_eq!(sends[0].opcode, Opcode::Binary);
    assert_eq!(&sends[0].payload.data()[..], b"only this much");
}

#[tokio::test]
async fn test_broadcast_stream_empty_read_aborts() {
    let registry = started_registry();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let source: &'static [u8] = b"";
    let handle = registry
        .broadcast_stream_async(source, 16, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    handle.await.unwrap();
    assert!(!done.load(Ordering::SeqCst));
    assert!(transport.sends().is_empty());
}

#[tokio::test]
async fn test_broadping_reports_each_session() {
    let registry = started_registry();
    let a = MockTransport::new();
    let b = MockTransport::unresponsive();
    let c = MockTransport::new();
    let id_a = registry.register(a).unwrap();
    let id_b = registry.register(b).unwrap();
    let id_c = registry.register(c).unwrap();

    let results = registry.broadping().await;

    let expected: HashMap<_, _> = [(id_a.clone(), true), (id_b.clone(), false), (id_c.clone(), true)]
        .into_iter()
        .collect();
    assert_eq!(results, expected);
    assert_eq!(registry.inactive_ids().await, vec![id_b]);

    let mut active = registry.active_ids().await;
    active.sort();
    let mut want = vec![id_a, id_c];
    want.sort();
    assert_eq!(active, want);
}

#[tokio::test]
async fn test_broadping_message_validates_control_frame_size() {
    let registry = started_registry();
    let transport = MockTransport::new();
    registry.register(transport.clone()).unwrap();

    assert!(registry.broadping_message(&"x".repeat(126)).await.is_empty());
    assert_eq!(transport.ping_count(), 0);

    assert_eq!(registry.broadping_message("ping").await.len(), 1);
    assert_eq!(transport.ping_count(), 1);
}

#[tokio::test]
async fn test_broadping_times_out_slow_sessions() {
    let registry = SessionRegistry::new("/test", &test_config());
    registry.set_wait_time(std::time::Duration::from_millis(20));
    registry.start();

    let slow = MockTransport::new();
    slow.set_ping_delay(std::time::Duration::from_millis(200));
    let id = registry.register(slow).unwrap();

    let results = registry.broadping().await;
    assert_eq!(results.get(&id), Some(&false));
    assert_eq!(registry.metrics().snapshot().pings_missed, 1);
}

#[tokio::test]
async fn test_broadcast_async_contains_transport_panic() {
    let registry = started_registry();
    let exploding = MockTransport::new();
    exploding.panic_next_send();
    registry.register(exploding.clone()).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let handle = registry
        .broadcast_async(Message::from("boom"), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .expect("scheduled");

    handle.await.expect("panic is contained inside the worker");
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(registry.state(), ServerState::Started);

    // The registry keeps working with a fresh cache.
    let sent = registry.broadcast_text("after").await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(&exploding.sends()[0].payload.data()[..], b"after");
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_stops_when_registry_stops_mid_pass() {
    let registry = started_registry();
    let transports: Vec<_> = (0..3).map(|_| MockTransport::new()).collect();
    for t in &transports {
        t.set_send_delay(Duration::from_millis(50));
        registry.register(t.clone()).unwrap();
    }

    let fan_out = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.broadcast_text("slow").await })
    };

    tokio::time::sleep(Duration::from_millis(75)).await;
    assert!(registry.stop(CloseArgs::normal(), false));

    let sent = fan_out.await.unwrap().unwrap();
    assert_eq!(sent, 2);
    let delivered: usize = transports.iter().map(|t| t.sends().len()).sum();
    assert_eq!(delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_broadping_stops_when_registry_stops_mid_pass() {
    let registry = started_registry();
    let transports: Vec<_> = (0..3).map(|_| MockTransport::new()).collect();
    for t in &transports {
        t.set_ping_delay(Duration::from_millis(50));
        registry.register(t.clone()).unwrap();
    }

    let probe = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.broadping().await })
    };

    tokio::time::sleep(Duration::from_millis(75)).await;
    registry.stop(CloseArgs::normal(), false);

    let results = probe.await.unwrap();
    assert_eq!(results.len(), 2);
    let pinged: usize = transports.iter().map(|t| t.ping_count()).sum();
    assert_eq!(pinged, 2);
}
