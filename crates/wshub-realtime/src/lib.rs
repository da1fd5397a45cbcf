//! # wshub-realtime
//!
//! Session-management core for wshub WebSocket services. Provides:
//!
//! - The [`Transport`] seam every wire-level connection implements
//! - A [`SessionRegistry`] with a monotonic start/shutdown state machine
//! - Synchronous and asynchronous broadcast with a per-call encoding cache
//! - Periodic and on-demand liveness sweeping
//! - The per-connection open/message/error/close contract ([`Connection`])
//! - A path-keyed [`ServiceManager`] hosting one registry per service

pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

pub use error::RegistryError;
pub use message::types::{CloseArgs, Message, Opcode, Payload};
pub use registry::{ServerState, SessionRegistry};
pub use service::{ServiceHost, ServiceManager};
pub use session::{Connection, Session, SessionBehavior, SessionContext};
pub use transport::{ReadyState, Transport, TransportError};
