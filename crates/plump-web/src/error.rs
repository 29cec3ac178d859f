//! Error types for the web bridge binary.

/// Top-level error for the web bridge binary.
///
/// Wraps each startup and runtime failure so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: plump_gateway::ConfigError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: plump_gateway::ServerError,
    },
}
