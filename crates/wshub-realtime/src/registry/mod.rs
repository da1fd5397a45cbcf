//! The session registry: identity, lifecycle, fan-out, and liveness.
//!
//! All map mutations and state transitions are serialized by one mutex.
//! Fan-out and probing work from a snapshot taken under that mutex and do
//! their network I/O without holding it; anything they mutate afterwards
//! is re-validated under the lock.

mod broadcast;
mod manager;
pub mod state;
mod sweeper;

pub use manager::SessionRegistry;
pub use state::ServerState;
pub use sweeper::SweepReport;
