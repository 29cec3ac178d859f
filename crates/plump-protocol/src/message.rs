//! Opaque server messages.
//!
//! The game server's message schema (cards, tricks, scoreboards, ...) is
//! owned by the server. The bridge only needs to know that a payload is
//! well-formed JSON so it can be forwarded to the browser unchanged, so
//! [`Message`] wraps the parsed JSON value without interpreting it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A single JSON message decoded from one upstream frame.
///
/// Serializes transparently as the inner JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Value);

impl Message {
    /// Decode a frame payload as a UTF-8 JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if the bytes are not
    /// UTF-8 or not a JSON document.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| ProtocolError::InvalidPayload(format!("payload is not UTF-8: {e}")))?;
        serde_json::from_str(text)
            .map(Self)
            .map_err(|e| ProtocolError::InvalidPayload(format!("payload is not JSON: {e}")))
    }

    /// Borrow the underlying JSON value.
    pub const fn as_json(&self) -> &Value {
        &self.0
    }

    /// Compact JSON text, as written to SSE `data:` lines.
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }

    /// Variant name of an externally tagged message, for logging.
    ///
    /// The server encodes unit variants as a bare string
    /// (`"RequestGuess"`) and data variants as a single-key object
    /// (`{"Turn": {...}}`). Anything else has no kind.
    pub fn kind(&self) -> Option<&str> {
        match &self.0 {
            Value::String(name) => Some(name.as_str()),
            Value::Object(map) if map.len() == 1 => map.keys().next().map(String::as_str),
            _ => None,
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
