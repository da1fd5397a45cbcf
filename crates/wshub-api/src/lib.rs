//! # wshub-api
//!
//! HTTP layer for wshub built on Axum.
//!
//! Mounts every configured WebSocket service under its path, adapts axum's
//! `WebSocket` to the registry's transport seam, and exposes a health
//! endpoint with registry metrics.

pub mod behaviors;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod transport;

pub use router::build_router;
pub use state::AppState;
