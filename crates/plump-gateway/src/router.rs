//! Axum router construction for the bridge.
//!
//! Assembles the event stream, command endpoints and optional static
//! front end into a single [`Router`].

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::sse;
use crate::state::AppState;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /api/events` -- SSE stream of game messages
/// - `POST /api/join` -- connect to the game server
/// - `POST /api/guess` -- send a guess
/// - `POST /api/play` -- play a card
/// - `GET /health` -- liveness probe
///
/// Any other path is served from `server.static_dir` when configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/api/events", get(sse::events))
        .route("/api/join", post(handlers::join))
        .route("/api/guess", post(handlers::guess))
        .route("/api/play", post(handlers::play))
        .route("/health", get(handlers::health));

    if let Some(dir) = &state.config.server.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
