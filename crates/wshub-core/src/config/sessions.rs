//! Session registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session registry settings shared by every mounted service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Whether the periodic liveness sweep is armed.
    #[serde(default = "default_true")]
    pub keep_clean: bool,
    /// Interval between periodic sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Ping timeout (and close handshake wait) in milliseconds.
    #[serde(default = "default_wait_time")]
    pub wait_time_ms: u64,
    /// Payloads longer than this many bytes are delivered as a stream.
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,
    /// Chunk size used when reading a source stream before a send.
    #[serde(default = "default_stream_read_chunk")]
    pub stream_read_chunk: usize,
}

impl SessionsConfig {
    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Wait time as a [`Duration`].
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            keep_clean: true,
            sweep_interval_seconds: default_sweep_interval(),
            wait_time_ms: default_wait_time(),
            fragment_size: default_fragment_size(),
            stream_read_chunk: default_stream_read_chunk(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_wait_time() -> u64 {
    1000
}

fn default_fragment_size() -> usize {
    1016
}

fn default_stream_read_chunk() -> usize {
    512
}
