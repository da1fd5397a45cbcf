//! Route definitions.
//!
//! `/api/health` is served directly; every other path is treated as a
//! WebSocket service mount and dispatched to its host.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/health", get(handlers::health::health));

    Router::new()
        .nest("/api", api_routes)
        .route("/{*path}", get(handlers::ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
