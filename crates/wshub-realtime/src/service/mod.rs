//! Path-keyed WebSocket services, each with its own session registry.

pub mod host;
pub mod manager;

pub use host::{BehaviorFactory, ServiceHost};
pub use manager::ServiceManager;
