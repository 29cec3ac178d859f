//! Configuration loading and typed config structures for the web bridge.
//!
//! The canonical configuration lives in `plump-web.yaml` next to the
//! binary. Every field has a default, so a missing file (or a missing
//! section) simply means "use the defaults". A handful of environment
//! variables override the YAML for container deployments:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `PLUMP_HOST` | `server.host` |
//! | `PLUMP_PORT` | `server.port` |
//! | `PLUMP_UPSTREAM_HOST` | `upstream.host` |
//! | `PLUMP_UPSTREAM_PORT` | `upstream.port` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use plump_protocol::DEFAULT_MAX_FRAME_LEN;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: {message}")]
    Env {
        /// The environment variable name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level bridge configuration.
///
/// Mirrors the structure of `plump-web.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Browser-facing HTTP server.
    #[serde(default)]
    pub server: ServerSettings,

    /// The game server every session connects to.
    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// Session registry and event stream behaviour.
    #[serde(default)]
    pub sessions: SessionSettings,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Directory of static front-end files served for unmatched paths.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 3000,
            static_dir: Some(PathBuf::from("public")),
        }
    }
}

/// Game server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Game server host.
    pub host: String,
    /// Game server port.
    pub port: u16,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout_ms: u64,
    /// Deadline for the server's name prompt; `None` waits forever.
    pub handshake_timeout_ms: Option<u64>,
    /// Size of each socket read.
    pub read_buffer_bytes: usize,
    /// Largest accepted frame payload.
    pub max_frame_len: usize,
    /// Outbound commands that may wait for the socket before new ones
    /// are dropped.
    pub command_queue: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 9999,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: Some(30_000),
            read_buffer_bytes: 1024,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            command_queue: 64,
        }
    }
}

impl UpstreamSettings {
    /// `host:port` of the game server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect deadline as a [`Duration`].
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Name prompt deadline as a [`Duration`], if any.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound on live sessions; `None` is unbounded.
    pub max_sessions: Option<usize>,
    /// Messages buffered per session for a slow event stream.
    pub event_capacity: usize,
    /// Sessions without an event stream are dropped after this long.
    pub idle_ttl_secs: u64,
    /// Name of the identity cookie.
    pub cookie_name: String,
    /// Reconnect delay advertised to `EventSource` clients.
    pub sse_retry_ms: u64,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: None,
            event_capacity: 64,
            idle_ttl_secs: 600,
            cookie_name: String::from("player_id"),
            sse_retry_ms: 10_000,
            sse_keep_alive_secs: 15,
        }
    }
}

impl SessionSettings {
    /// Idle session lifetime as a [`Duration`].
    pub const fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// SSE `retry:` value as a [`Duration`].
    pub const fn sse_retry(&self) -> Duration {
        Duration::from_millis(self.sse_retry_ms)
    }

    /// SSE keep-alive interval as a [`Duration`].
    pub const fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs)
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Pretty,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Load `path` if it exists (defaults otherwise), apply environment
    /// overrides and validate the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PLUMP_*` overrides obtained through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PLUMP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PLUMP_PORT") {
            self.server.port = parse_port("PLUMP_PORT", &port)?;
        }
        if let Some(host) = lookup("PLUMP_UPSTREAM_HOST") {
            self.upstream.host = host;
        }
        if let Some(port) = lookup("PLUMP_UPSTREAM_PORT") {
            self.upstream.port = parse_port("PLUMP_UPSTREAM_PORT", &port)?;
        }
        Ok(())
    }

    /// Reject values that would make the bridge unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_owned()));
        }
        if self.upstream.port == 0 {
            return Err(ConfigError::Invalid("upstream.port must be non-zero".to_owned()));
        }
        if self.upstream.read_buffer_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upstream.read_buffer_bytes must be non-zero".to_owned(),
            ));
        }
        if self.upstream.command_queue == 0 {
            return Err(ConfigError::Invalid(
                "upstream.command_queue must be non-zero".to_owned(),
            ));
        }
        if self.sessions.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sessions.event_capacity must be non-zero".to_owned(),
            ));
        }
        if self.sessions.max_sessions == Some(0) {
            return Err(ConfigError::Invalid(
                "sessions.max_sessions must be non-zero when set".to_owned(),
            ));
        }
        if self.sessions.cookie_name.is_empty() {
            return Err(ConfigError::Invalid("sessions.cookie_name is empty".to_owned()));
        }
        Ok(())
    }
}

fn parse_port(name: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::Env {
        name,
        message: format!("{value:?} is not a port: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.address(), "127.0.0.1:9999");
        assert_eq!(config.upstream.read_buffer_bytes, 1024);
        assert_eq!(config.sessions.cookie_name, "player_id");
        assert_eq!(config.sessions.sse_retry(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r"
upstream:
  host: game.internal
  port: 7000
  handshake_timeout_ms: ~
logging:
  format: json
";
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.upstream.address(), "game.internal:7000");
        assert_eq!(config.upstream.handshake_timeout(), None);
        assert_eq!(config.upstream.connect_timeout_ms, 5_000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.server, ServerSettings::default());
    }

    #[test]
    fn empty_yaml_is_default() {
        let config = GatewayConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = GatewayConfig::from_yaml_str("upstream: [1, 2");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|name| match name {
                "PLUMP_PORT" => Some("8081".to_owned()),
                "PLUMP_UPSTREAM_HOST" => Some("10.0.0.5".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.upstream.host, "10.0.0.5");
        assert_eq!(config.upstream.port, 9999);
    }

    #[test]
    fn bad_env_port_is_rejected() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "PLUMP_UPSTREAM_PORT").then(|| "ninety".to_owned())
        });
        assert!(matches!(
            result,
            Err(ConfigError::Env {
                name: "PLUMP_UPSTREAM_PORT",
                ..
            })
        ));
    }

    #[test]
    fn validation_rejects_zero_capacities() {
        let mut config = GatewayConfig::default();
        config.sessions.event_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.upstream.read_buffer_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.sessions.max_sessions = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_ports() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.upstream.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/plump-web.yaml")).unwrap();
        assert_eq!(config.upstream.port, GatewayConfig::default().upstream.port);
    }
}
