//! Upstream wire protocol for the Plump web bridge.
//!
//! The Plump game server speaks a small TCP protocol:
//!
//! ```text
//! server: <prompt text>\n          (one-time name prompt)
//! client: |<player name>\n         (handshake reply)
//! server: <len>,<payload>...       (length-prefixed JSON frames, forever)
//! client: <command>\n              (guesses and card plays)
//! ```
//!
//! This crate contains the pure, I/O-free pieces of that protocol:
//!
//! - [`FrameDecoder`]: the three-phase incremental parser that turns an
//!   arbitrarily fragmented byte stream into payload frames
//! - [`MessageDecoder`]: the same parser with JSON payload decoding on top
//! - [`Message`]: an opaque, validated JSON message from the server
//! - [`Command`]: an outbound command line
//!
//! Nothing here performs I/O; the gateway crate owns sockets and feeds
//! bytes in as they arrive.

pub mod command;
pub mod decoder;
pub mod error;
pub mod message;

pub use command::{handshake_reply, validate_player_name, Command};
pub use decoder::{
    DecodeEvent, Frame, FrameDecoder, MessageDecoder, Phase, DEFAULT_MAX_FRAME_LEN,
};
pub use error::ProtocolError;
pub use message::Message;
