//! Error types for the upstream wire protocol.

/// Errors raised while decoding the upstream byte stream or encoding
/// outbound lines.
///
/// Every decoding variant is fatal to the connection that produced it:
/// once a decoder has returned one of these it refuses further input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A byte other than an ASCII digit or `,` appeared in a length prefix.
    #[error("unexpected byte 0x{byte:02x} in length prefix at stream offset {offset}")]
    UnexpectedByte {
        /// The offending byte.
        byte: u8,
        /// Offset of the byte from the start of the stream.
        offset: usize,
    },

    /// The length prefix does not fit in a `usize`.
    #[error("length prefix overflows")]
    LengthOverflow,

    /// The length prefix exceeds the configured maximum frame length.
    #[error("declared frame length {declared} exceeds maximum {max}")]
    FrameTooLarge {
        /// Length announced by the prefix (so far).
        declared: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The payload is not valid UTF-8 JSON.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The decoder already failed and no longer accepts input.
    #[error("decoder has failed and accepts no further input")]
    DecoderFailed,

    /// An outbound command or player name would break line framing.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
