//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Instant;

use wshub_realtime::ServiceManager;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Mounted WebSocket services.
    pub services: Arc<ServiceManager>,
    /// When the server started.
    pub started_at: Instant,
}

impl AppState {
    /// Wrap a service manager.
    pub fn new(services: Arc<ServiceManager>) -> Self {
        Self {
            services,
            started_at: Instant::now(),
        }
    }
}
