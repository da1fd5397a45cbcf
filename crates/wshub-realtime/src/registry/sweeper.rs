//! Liveness sweep: probe every session, then reap the unresponsive ones.
//!
//! A pass runs in two phases. The probe phase pings every session without
//! holding the registry lock, since it waits on network round-trips. The
//! reap phase then takes the lock once per candidate and re-checks it,
//! because sessions may have closed or been removed meanwhile. The
//! candidates it acts on are therefore up to one full probe pass (one wait
//! time per unresponsive session) stale.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::message::types::CloseArgs;
use crate::metrics::RegistryMetrics;
use crate::transport::ReadyState;

use super::manager::SessionRegistry;
use super::state::ServerState;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sessions pinged in the probe phase.
    pub probed: usize,
    /// Sessions that missed their pong.
    pub inactive: usize,
    /// Open sessions handed an abnormal close.
    pub abnormal_closes: usize,
    /// Sessions removed directly.
    pub removed: usize,
    /// Sessions left alone because a close was already in flight.
    pub closing: usize,
}

/// Clears the in-progress flag when the pass ends, however it ends.
struct SweepGuard<'a>(&'a SessionRegistry);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.sweeping.store(false, Ordering::Release);
    }
}

impl SessionRegistry {
    /// Run one probe-and-reap pass.
    ///
    /// Returns immediately with an empty report if the registry is not
    /// started, is empty, or another sweep is already running.
    ///
    /// An unresponsive session whose transport still reports `Open` is sent
    /// an abnormal close and stays registered until its close hook removes
    /// it. One already `Closing` is left alone. Any other state is removed
    /// on the spot.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if self.state() != ServerState::Started || self.count() == 0 {
            return report;
        }

        if self
            .inner
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(registry = %self.name(), "A sweep is already in progress");
            return report;
        }
        let _guard = SweepGuard(self);

        let probed = self.probe(Bytes::new()).await;
        report.probed = probed.len();
        let candidates: Vec<_> = probed
            .into_iter()
            .filter_map(|(id, alive)| (!alive).then_some(id))
            .collect();
        report.inactive = candidates.len();

        for id in candidates {
            let stop = self.with_locked(|state, sessions| {
                if state != ServerState::Started {
                    return true;
                }
                let Some(session) = sessions.get(&id).cloned() else {
                    return false;
                };
                match session.ready_state() {
                    ReadyState::Open => {
                        session.transport().close(CloseArgs::abnormal());
                        report.abnormal_closes += 1;
                    }
                    ReadyState::Closing => {
                        report.closing += 1;
                    }
                    ReadyState::Connecting | ReadyState::Closed => {
                        sessions.remove(&id);
                        report.removed += 1;
                    }
                }
                false
            });
            if stop {
                debug!(registry = %self.name(), "Sweep aborted, registry is no longer started");
                break;
            }
        }

        let metrics = self.metrics();
        RegistryMetrics::inc(&metrics.sweeps);
        RegistryMetrics::add(&metrics.abnormal_closes, report.abnormal_closes as u64);
        RegistryMetrics::add(&metrics.sessions_reaped, report.removed as u64);
        RegistryMetrics::add(&metrics.sessions_closed, report.removed as u64);

        if report.inactive > 0 {
            info!(
                registry = %self.name(),
                probed = report.probed,
                inactive = report.inactive,
                abnormal_closes = report.abnormal_closes,
                removed = report.removed,
                "Sweep complete"
            );
        }
        report
    }
}
