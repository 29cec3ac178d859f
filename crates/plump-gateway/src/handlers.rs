//! REST handlers for joining a game and issuing commands.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/join` | Open an upstream connection under a player name |
//! | `POST` | `/api/guess` | Send a trick-count guess |
//! | `POST` | `/api/play` | Play a card by hand index |
//! | `GET` | `/health` | Liveness and session count |
//!
//! Commands are fire-and-forget: a guess or play for a session without a
//! live connection still answers `200 OK`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use plump_protocol::{validate_player_name, Command};
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::identity;
use crate::session::JoinOutcome;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/join`.
#[derive(Debug, serde::Deserialize)]
pub struct JoinRequest {
    /// Player name sent to the game server.
    pub name: String,
}

/// Request body for `POST /api/guess`.
#[derive(Debug, serde::Deserialize)]
pub struct GuessRequest {
    /// Number of tricks the player expects to take.
    pub value: usize,
}

/// Request body for `POST /api/play`.
#[derive(Debug, serde::Deserialize)]
pub struct PlayRequest {
    /// Index of the card in the player's hand.
    pub index: usize,
}

#[derive(Debug, serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

// ---------------------------------------------------------------------------
// POST /api/join
// ---------------------------------------------------------------------------

/// Connect this browser's session to the game server as `name`.
///
/// Joining again replaces the previous connection.
///
/// # Errors
///
/// `400` for a blank name or one containing a line break, `503` if the
/// session limit is reached.
pub async fn join(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<JoinRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let name = validate_player_name(&body.name)?;
    let (client_id, jar) = identity::resolve(jar, &state.config.sessions.cookie_name);
    let session = state.registry.get_or_create(client_id)?;

    match session.join(&state.config.upstream, name) {
        JoinOutcome::Started => info!(client_id = %client_id, player = name, "Player joined"),
        JoinOutcome::Replaced => {
            info!(client_id = %client_id, player = name, "Player rejoined, previous connection closed");
        }
    }

    Ok((jar, StatusCode::OK))
}

// ---------------------------------------------------------------------------
// POST /api/guess
// ---------------------------------------------------------------------------

/// Send a guess for the current round.
///
/// # Errors
///
/// `503` if the session limit is reached.
pub async fn guess(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<GuessRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    issue(&state, jar, &Command::guess(body.value))
}

// ---------------------------------------------------------------------------
// POST /api/play
// ---------------------------------------------------------------------------

/// Play the card at `index`.
///
/// # Errors
///
/// `503` if the session limit is reached.
pub async fn play(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<PlayRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    issue(&state, jar, &Command::play(body.index))
}

fn issue(
    state: &AppState,
    jar: CookieJar,
    command: &Command,
) -> Result<(CookieJar, StatusCode), GatewayError> {
    let (client_id, jar) = identity::resolve(jar, &state.config.sessions.cookie_name);
    let session = state.registry.get_or_create(client_id)?;
    let outcome = session.issue_command(command);
    debug!(client_id = %client_id, command = %command, ?outcome, "Command issued");
    Ok((jar, StatusCode::OK))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Report liveness and the number of live sessions.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.len(),
    })
}
