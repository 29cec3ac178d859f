//! Error types for the HTTP boundary.
//!
//! [`GatewayError`] covers every failure a request handler can report and
//! converts into a JSON response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use plump_protocol::ProtocolError;

use crate::registry::RegistryError;

/// Errors that can occur while handling a browser request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request body or its values were rejected.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The identity already has an open event stream.
    #[error("an event stream is already open for this client")]
    AlreadySubscribed,

    /// The bridge cannot take more sessions right now.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<ProtocolError> for GatewayError {
    fn from(e: ProtocolError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(e: RegistryError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::AlreadySubscribed => (StatusCode::CONFLICT, self.to_string()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (GatewayError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::AlreadySubscribed, StatusCode::CONFLICT),
            (GatewayError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn protocol_errors_are_bad_requests() {
        let error = GatewayError::from(ProtocolError::InvalidCommand("line break".into()));
        assert!(matches!(error, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn full_registry_is_unavailable() {
        let error = GatewayError::from(RegistryError::Full(3));
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
