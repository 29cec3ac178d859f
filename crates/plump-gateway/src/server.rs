//! Bridge HTTP server lifecycle management.
//!
//! Provides [`start_server`] which binds the configured address, starts
//! the idle-session reaper and serves requests until the shutdown future
//! resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Start the bridge HTTP server.
///
/// Returns `Ok(())` once `shutdown` resolves and in-flight requests have
/// drained. Every live session is closed on the way out.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind or the server
/// encounters a fatal I/O error.
pub async fn start_server<F>(state: Arc<AppState>, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let settings = &state.config.server;
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(
        %addr,
        upstream = %state.config.upstream.address(),
        "Bridge server listening"
    );

    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server encounters a fatal I/O error.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::clone(&state.registry);
    let reaper = registry.spawn_reaper(state.config.sessions.idle_ttl());

    // Event streams never end on their own; release them so graceful
    // shutdown can drain.
    let signal_state = Arc::clone(&state);
    let shutdown = async move {
        shutdown.await;
        info!("Shutdown requested, closing event streams");
        signal_state.begin_shutdown();
    };

    let router = build_router(state);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")));

    reaper.abort();
    let open = registry.close_all();
    info!(sessions_closed = open, "Bridge server stopped");

    result
}

/// Errors that can occur when starting or running the bridge server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
