//! Web bridge binary for the Plump card game.
//!
//! Serves the browser front end and its JSON/SSE API, and gives every
//! browser its own TCP connection to the game server.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `plump-web.yaml` (or `$PLUMP_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the shared state and session registry
//! 4. Serve until `Ctrl-C`, then close every session

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use plump_gateway::config::LoggingSettings;
use plump_gateway::{start_server, AppState, GatewayConfig, LogFormat};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::WebError;

const DEFAULT_CONFIG_PATH: &str = "plump-web.yaml";

/// Application entry point for the web bridge.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server cannot
/// bind its address.
#[tokio::main]
async fn main() -> Result<(), WebError> {
    let config_path = std::env::var_os("PLUMP_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = GatewayConfig::load(&config_path)?;

    init_tracing(&config.logging);
    info!("plump-web starting");

    if config_path.exists() {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        server = %format!("{}:{}", config.server.host, config.server.port),
        upstream = %config.upstream.address(),
        max_sessions = ?config.sessions.max_sessions,
        idle_ttl_secs = config.sessions.idle_ttl_secs,
        "Bridge configured"
    );

    let state = Arc::new(AppState::new(config));
    start_server(state, shutdown_signal()).await?;

    info!("plump-web stopped");
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match settings.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Resolves on `Ctrl-C`. If the handler cannot be installed the server
/// runs until killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
