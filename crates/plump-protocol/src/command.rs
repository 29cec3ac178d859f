//! Outbound lines: the handshake reply and player commands.
//!
//! Everything the bridge writes upstream is a single `\n`-terminated
//! line, so any text that would embed a line break is rejected here.

use crate::error::ProtocolError;

/// Prefix the server expects in front of a player name.
const NAME_PREFIX: char = '|';

/// A single command line for the game server (a guess or a card index).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// A trick-count guess.
    pub fn guess(value: usize) -> Self {
        Self(value.to_string())
    }

    /// Play the card at `index` in the player's hand.
    pub fn play(index: usize) -> Self {
        Self(index.to_string())
    }

    /// The command text without the trailing newline.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire bytes: the command text followed by one `\n`.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len().saturating_add(1));
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a player name can be sent as a handshake reply.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidCommand`] if the name is blank or
/// contains a line break.
pub fn validate_player_name(name: &str) -> Result<&str, ProtocolError> {
    if name.trim().is_empty() {
        return Err(ProtocolError::InvalidCommand(
            "player name is empty".to_owned(),
        ));
    }
    if contains_line_break(name) {
        return Err(ProtocolError::InvalidCommand(format!(
            "player name {name:?} contains a line break"
        )));
    }
    Ok(name)
}

/// Handshake reply for the server's name prompt: `|<name>\n`.
pub fn handshake_reply(name: &str) -> Vec<u8> {
    format!("{NAME_PREFIX}{name}\n").into_bytes()
}

fn contains_line_break(text: &str) -> bool {
    text.contains(['\n', '\r'])
}
