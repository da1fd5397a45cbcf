//! Registered sessions and the per-connection lifecycle contract.

pub mod context;
pub mod contract;
pub mod handle;

pub use context::SessionContext;
pub use contract::{Connection, SessionBehavior};
pub use handle::Session;
