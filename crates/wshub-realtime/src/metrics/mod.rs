//! Registry metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Registry-level metrics counters.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    /// Sessions registered
    pub sessions_opened: AtomicU64,
    /// Sessions unregistered or reaped
    pub sessions_closed: AtomicU64,
    /// Registrations refused because the registry was not started
    pub sessions_rejected: AtomicU64,
    /// Broadcast passes started
    pub broadcasts: AtomicU64,
    /// Messages handed to a transport successfully
    pub messages_sent: AtomicU64,
    /// Transport send failures
    pub send_failures: AtomicU64,
    /// Pings sent
    pub pings_sent: AtomicU64,
    /// Pings without a pong in time
    pub pings_missed: AtomicU64,
    /// Sweep passes completed
    pub sweeps: AtomicU64,
    /// Abnormal closes initiated by a sweep
    pub abnormal_closes: AtomicU64,
    /// Sessions removed directly by a sweep
    pub sessions_reaped: AtomicU64,
}

impl RegistryMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pings_missed: self.pings_missed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            abnormal_closes: self.abnormal_closes.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions registered
    pub sessions_opened: u64,
    /// Sessions unregistered or reaped
    pub sessions_closed: u64,
    /// Registrations refused
    pub sessions_rejected: u64,
    /// Broadcast passes started
    pub broadcasts: u64,
    /// Messages handed to a transport
    pub messages_sent: u64,
    /// Transport send failures
    pub send_failures: u64,
    /// Pings sent
    pub pings_sent: u64,
    /// Pings missed
    pub pings_missed: u64,
    /// Sweep passes completed
    pub sweeps: u64,
    /// Abnormal closes initiated by sweeps
    pub abnormal_closes: u64,
    /// Sessions removed by sweeps
    pub sessions_reaped: u64,
}

impl std::ops::Add for MetricsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            sessions_opened: self.sessions_opened + rhs.sessions_opened,
            sessions_closed: self.sessions_closed + rhs.sessions_closed,
            sessions_rejected: self.sessions_rejected + rhs.sessions_rejected,
            broadcasts: self.broadcasts + rhs.broadcasts,
            messages_sent: self.messages_sent + rhs.messages_sent,
            send_failures: self.send_failures + rhs.send_failures,
            pings_sent: self.pings_sent + rhs.pings_sent,
            pings_missed: self.pings_missed + rhs.pings_missed,
            sweeps: self.sweeps + rhs.sweeps,
            abnormal_closes: self.abnormal_closes + rhs.abnormal_closes,
            sessions_reaped: self.sessions_reaped + rhs.sessions_reaped,
        }
    }
}
