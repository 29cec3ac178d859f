//! Per-session bridge between browsers and the Plump game server.
//!
//! Each browser is identified by an anonymous cookie and owns one
//! [`Session`]. A session holds at most one TCP connection to the game
//! server and relays in both directions:
//!
//! - **Server to browser**: frames decoded by [`plump_protocol`] are
//!   published to the session's server-sent event stream (`GET /api/events`)
//! - **Browser to server**: `POST /api/join`, `/api/guess` and `/api/play`
//!   become handshake replies and command lines on the socket
//!
//! # Architecture
//!
//! The [`SessionRegistry`] is the only map from identity to session.
//! Sessions never reference each other, and a failure on one upstream
//! connection is logged and contained to that session. Each upstream
//! connection runs on its own Tokio task and reports back through the
//! [`UpstreamCallback`] trait.
//!
//! [`Session`]: session::Session
//! [`SessionRegistry`]: registry::SessionRegistry
//! [`UpstreamCallback`]: upstream::UpstreamCallback

pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod sse;
pub mod state;
pub mod upstream;

// Re-export primary types for convenience.
pub use config::{ConfigError, GatewayConfig, LogFormat};
pub use error::GatewayError;
pub use identity::ClientId;
pub use registry::{RegistryError, SessionRegistry};
pub use router::build_router;
pub use server::{serve, start_server, ServerError};
pub use session::{CommandOutcome, JoinOutcome, Session};
pub use state::AppState;
