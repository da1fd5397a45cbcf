//! Service manager: owns every mounted [`ServiceHost`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use wshub_core::config::SessionsConfig;
use wshub_core::error::AppError;

use crate::message::types::{close_code, Message};
use crate::metrics::MetricsSnapshot;
use crate::session::contract::SessionBehavior;

use super::host::ServiceHost;

/// Thread-safe path → service map.
#[derive(Debug)]
pub struct ServiceManager {
    hosts: DashMap<String, Arc<ServiceHost>>,
    config: SessionsConfig,
    started: AtomicBool,
}

impl ServiceManager {
    /// Create an empty manager. New services use `config`.
    pub fn new(config: SessionsConfig) -> Self {
        Self {
            hosts: DashMap::new(),
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Mount a service at `path`.
    ///
    /// If the manager is already running the service starts immediately.
    pub fn add_service<F, B>(&self, path: &str, factory: F) -> Result<Arc<ServiceHost>, AppError>
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: SessionBehavior,
    {
        let path = normalize_path(path)?;
        self.add_host(ServiceHost::new(path, &self.config, factory))
    }

    /// Mount a pre-built host.
    pub fn add_host(&self, host: ServiceHost) -> Result<Arc<ServiceHost>, AppError> {
        let path = normalize_path(host.path())?;
        if self.hosts.contains_key(&path) {
            return Err(AppError::validation(format!(
                "A service is already mounted at '{path}'"
            )));
        }

        let host = Arc::new(host);
        if self.started.load(Ordering::Acquire) {
            host.start();
        }
        self.hosts.insert(path.clone(), host.clone());

        info!(path = %path, "Service mounted");
        Ok(host)
    }

    /// Unmount a service, closing its sessions with "going away".
    pub fn remove_service(&self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        match self.hosts.remove(&path) {
            Some((_, host)) => {
                host.stop(close_code::AWAY, "The service is no longer available");
                info!(path = %path, "Service removed");
                true
            }
            None => {
                warn!(path = %path, "No service mounted at path");
                false
            }
        }
    }

    /// Look up a service by path.
    pub fn get(&self, path: &str) -> Option<Arc<ServiceHost>> {
        let path = normalize_path(path).ok()?;
        self.hosts.get(&path).map(|entry| entry.value().clone())
    }

    /// All mounted paths.
    pub fn paths(&self) -> Vec<String> {
        self.hosts.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All mounted hosts.
    pub fn hosts(&self) -> Vec<Arc<ServiceHost>> {
        self.hosts.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of mounted services.
    pub fn count(&self) -> usize {
        self.hosts.len()
    }

    /// Total sessions across every service.
    pub fn session_count(&self) -> usize {
        self.hosts
            .iter()
            .map(|entry| entry.value().sessions().count())
            .sum()
    }

    /// Start every service.
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        for host in self.hosts() {
            host.start();
        }
        info!(services = self.count(), "All services started");
    }

    /// Stop every service with the given close status.
    pub fn stop(&self, code: u16, reason: &str) {
        self.started.store(false, Ordering::Release);
        for host in self.hosts() {
            host.stop(code, reason);
        }
        info!(services = self.count(), "All services stopped");
    }

    /// Broadcast to every session of every service.
    ///
    /// Returns the total number of sessions the message was handed to.
    pub async fn broadcast(&self, message: Message) -> usize {
        let mut sent = 0;
        for host in self.hosts() {
            match host.sessions().broadcast_message(message.clone()).await {
                Ok(n) => sent += n,
                Err(e) => warn!(path = %host.path(), error = %e, "Service broadcast skipped"),
            }
        }
        sent
    }

    /// Set keep-clean on every service.
    pub fn set_keep_clean(&self, value: bool) {
        for host in self.hosts() {
            host.set_keep_clean(value);
        }
    }

    /// Set the wait time on every service. Returns whether all accepted it.
    pub fn set_wait_time(&self, wait_time: Duration) -> bool {
        self.hosts()
            .iter()
            .fold(true, |ok, host| host.set_wait_time(wait_time) && ok)
    }

    /// Metrics summed over every service.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.hosts
            .iter()
            .map(|entry| entry.value().sessions().metrics().snapshot())
            .fold(MetricsSnapshot::default(), |acc, s| acc + s)
    }

    /// Stop every service with "going away".
    pub fn shutdown(&self) {
        self.stop(close_code::AWAY, "The server is shutting down");
    }
}

/// Validates a mount path and strips any trailing slash.
fn normalize_path(path: &str) -> Result<String, AppError> {
    if !path.starts_with('/') {
        return Err(AppError::validation(format!(
            "Service path '{path}' must be absolute"
        )));
    }
    if path.contains(['?', '#']) {
        return Err(AppError::validation(format!(
            "Service path '{path}' must not contain a query or fragment"
        )));
    }

    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl SessionBehavior for Noop {}

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/chat/").unwrap(), "/chat");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert!(normalize_path("chat").is_err());
        assert!(normalize_path("/chat?x=1").is_err());
    }

    #[test]
    fn test_add_and_remove_services() {
        let manager = ServiceManager::new(SessionsConfig::default());
        manager.add_service("/echo", || Noop).unwrap();
        assert!(manager.add_service("/echo/", || Noop).is_err());

        assert_eq!(manager.count(), 1);
        assert!(manager.get("/echo/").is_some());
        assert!(manager.remove_service("/echo"));
        assert!(!manager.remove_service("/echo"));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_services_added_after_start_are_started() {
        let manager = ServiceManager::new(SessionsConfig {
            keep_clean: false,
            ..SessionsConfig::default()
        });
        let before = manager.add_service("/a", || Noop).unwrap();
        manager.start();
        let after = manager.add_service("/b", || Noop).unwrap();

        assert!(before.sessions().state().is_started());
        assert!(after.sessions().state().is_started());
    }
}
