//! Integration tests for the liveness sweep.

mod common;

use std::time::Duration;

use common::{started_registry, test_config, MockTransport};
use wshub_core::config::SessionsConfig;
use wshub_realtime::message::close_code;
use wshub_realtime::registry::SweepReport;
use wshub_realtime::{CloseArgs, ReadyState, SessionRegistry};

#[tokio::test]
async fn test_sweep_closes_unresponsive_open_session() {
    let registry = started_registry();
    let a = MockTransport::new();
    let b = MockTransport::unresponsive();
    let c = MockTransport::new();
    registry.register(a.clone()).unwrap();
    let id_b = registry.register(b.clone()).unwrap();
    registry.register(c.clone()).unwrap();

    let report = registry.sweep().await;

    assert_eq!(report.probed, 3);
    assert_eq!(report.inactive, 1);
    assert_eq!(report.abnormal_closes, 1);
    assert_eq!(report.removed, 0);

    let closes = b.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].args.code, close_code::ABNORMAL);
    assert!(a.closes().is_empty());
    assert!(c.closes().is_empty());

    // Removal waits for B's close hook.
    assert_eq!(registry.count(), 3);
    assert!(registry.unregister(id_b.as_str()));
    assert_eq!(registry.count(), 2);
}

#[tokio::test]
async fn test_sweep_leaves_closing_sessions_alone() {
    let registry = started_registry();
    let closing = MockTransport::unresponsive();
    closing.set_state(ReadyState::Closing);
    registry.register(closing.clone()).unwrap();

    let report = registry.sweep().await;

    assert_eq!(report.closing, 1);
    assert!(closing.closes().is_empty());
    assert_eq!(registry.count(), 1);
}

#[tokio::test]
async fn test_sweep_removes_closed_sessions_without_close_call() {
    let registry = started_registry();
    let closed = MockTransport::unresponsive();
    closed.set_state(ReadyState::Closed);
    let id = registry.register(closed.clone()).unwrap();

    let report = registry.sweep().await;

    assert_eq!(report.removed, 1);
    assert!(closed.closes().is_empty());
    assert_eq!(registry.count(), 0);
    assert!(!registry.unregister(id.as_str()));
    assert_eq!(registry.metrics().snapshot().sessions_reaped, 1);
}

#[tokio::test]
async fn test_sweep_is_noop_when_not_started_or_empty() {
    let registry = SessionRegistry::new("/test", &test_config());
    assert_eq!(registry.sweep().await, SweepReport::default());

    registry.start();
    assert_eq!(registry.sweep().await, SweepReport::default());
    assert_eq!(registry.metrics().snapshot().sweeps, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sweep_returns_immediately() {
    let registry = started_registry();
    let slow = MockTransport::new();
    slow.set_ping_delay(Duration::from_millis(300));
    registry.register(slow.clone()).unwrap();

    let first = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.sweep().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = registry.sweep().await;
    assert_eq!(second, SweepReport::default());

    let first = first.await.unwrap();
    assert_eq!(first.probed, 1);
    assert_eq!(slow.ping_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_runs_while_keep_clean() {
    let registry = SessionRegistry::new(
        "/test",
        &SessionsConfig {
            keep_clean: true,
            sweep_interval_seconds: 1,
            ..SessionsConfig::default()
        },
    );
    registry.start();

    let closed = MockTransport::unresponsive();
    closed.set_state(ReadyState::Closed);
    registry.register(closed).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(registry.count(), 0);
    assert_eq!(registry.metrics().snapshot().sweeps, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabling_keep_clean_disarms_timer() {
    let registry = SessionRegistry::new(
        "/test",
        &SessionsConfig {
            keep_clean: true,
            sweep_interval_seconds: 1,
            ..SessionsConfig::default()
        },
    );
    registry.start();
    registry.set_keep_clean(false);

    let closed = MockTransport::unresponsive();
    closed.set_state(ReadyState::Closed);
    registry.register(closed).unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(registry.count(), 1);
    assert_eq!(registry.metrics().snapshot().sweeps, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_stops_reaping_when_registry_stops_mid_pass() {
    let registry = started_registry();
    let transports: Vec<_> = (0..3).map(|_| MockTransport::unresponsive()).collect();
    for t in &transports {
        t.set_ping_delay(Duration::from_millis(50));
        registry.register(t.clone()).unwrap();
    }

    let sweep = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.sweep().await })
    };

    tokio::time::sleep(Duration::from_millis(75)).await;
    assert!(registry.stop(CloseArgs::away("bye"), false));

    let report = sweep.await.unwrap();
    assert_eq!(report.probed, 2);
    assert_eq!(report.inactive, 2);
    assert_eq!(report.abnormal_closes, 0);
    assert_eq!(report.removed, 0);

    // Only the close issued by stop reached each transport.
    for t in &transports {
        let closes = t.closes();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].args.code, close_code::AWAY);
    }
}
