//! Shared application state for the bridge's HTTP handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::GatewayConfig;
use crate::registry::SessionRegistry;

/// State shared by every request handler, held behind an [`Arc`].
#[derive(Debug)]
pub struct AppState {
    /// All live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Effective configuration.
    pub config: GatewayConfig,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Build state with an empty registry sized from `config`.
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(&config.sessions));
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            config,
            shutdown,
        }
    }

    /// Tell long-lived responses (event streams) to finish.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
