//! Incremental decoder for the upstream byte stream.
//!
//! The stream has three phases, always entered in this order:
//!
//! 1. [`Phase::AwaitingNamePrompt`] -- wait for the first `\n`, then
//!    answer the prompt with `|<name>\n`
//! 2. [`Phase::ReadingLength`] -- ASCII decimal digits terminated by `,`
//! 3. [`Phase::ReadingPayload`] -- exactly `declared_length` bytes
//!
//! after which the decoder alternates between 2 and 3 forever. Bytes may
//! arrive in chunks of any size; a chunk can complete zero, one or many
//! frames, and leftover bytes always stay buffered for the next phase.
//! Frame boundaries come only from the length prefix, never from payload
//! content.
//!
//! [`FrameDecoder`] yields raw payloads. [`MessageDecoder`] layers JSON
//! decoding on top and is what upstream connections use.

use crate::command::handshake_reply;
use crate::error::ProtocolError;
use crate::message::Message;

/// Default upper bound for a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16_777_216;

const NEWLINE: u8 = b'\n';
const COMMA: u8 = b',';

/// Current phase of the decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the server's one-time name prompt line.
    AwaitingNamePrompt,
    /// Accumulating the decimal length prefix of the next frame.
    ReadingLength,
    /// Waiting for `declared_length` payload bytes.
    ReadingPayload,
}

/// Output of [`FrameDecoder::feed`], in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bytes to write back to the server (the handshake reply).
    HandshakeReply(Vec<u8>),
    /// One complete frame payload.
    Payload(Vec<u8>),
}

/// Result of running one phase against the buffer.
enum Step {
    /// The phase completed and the decoder moved on.
    Advanced,
    /// The phase needs more bytes.
    Suspended,
}

/// Three-phase parser from raw bytes to frame payloads.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    phase: Phase,
    buffer: Vec<u8>,
    /// Index of the first unconsumed byte in `buffer`.
    start: usize,
    declared_length: usize,
    max_frame_len: usize,
    handshake: Vec<u8>,
    /// Stream offset of the first buffered byte.
    offset: usize,
    failed: bool,
}

impl FrameDecoder {
    /// Create a decoder that will answer the name prompt as `player_name`.
    pub fn new(player_name: &str) -> Self {
        Self::with_max_frame_len(player_name, DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder with a custom payload size limit.
    pub fn with_max_frame_len(player_name: &str, max_frame_len: usize) -> Self {
        Self {
            phase: Phase::AwaitingNamePrompt,
            buffer: Vec::new(),
            start: 0,
            declared_length: 0,
            max_frame_len,
            handshake: handshake_reply(player_name),
            offset: 0,
            failed: false,
        }
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Length accumulated from the current prefix (0 outside a frame).
    pub const fn declared_length(&self) -> usize {
        self.declared_length
    }

    /// Bytes received but not yet consumed by any phase.
    pub fn buffered(&self) -> &[u8] {
        self.buffer.get(self.start..).unwrap_or_default()
    }

    /// Whether the decoder hit a protocol violation.
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Append `chunk` and run phases until no further progress is possible.
    ///
    /// Completed frames are pushed to `out` in wire order. Frames completed
    /// before a violation in the same chunk are still pushed.
    ///
    /// # Errors
    ///
    /// Returns the first protocol violation. The decoder is then failed
    /// and every later call returns [`ProtocolError::DecoderFailed`].
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> Result<(), ProtocolError> {
        if self.failed {
            return Err(ProtocolError::DecoderFailed);
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            let step = match self.phase {
                Phase::AwaitingNamePrompt => Ok(self.await_name_prompt(out)),
                Phase::ReadingLength => self.read_length(),
                Phase::ReadingPayload => Ok(self.read_payload(out)),
            };
            match step {
                Ok(Step::Advanced) => {}
                Ok(Step::Suspended) => {
                    self.compact();
                    return Ok(());
                }
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            }
        }
    }

    /// Mark the decoder failed and release its buffer.
    pub fn fail(&mut self) {
        self.failed = true;
        self.buffer = Vec::new();
        self.start = 0;
        self.declared_length = 0;
    }

    fn await_name_prompt(&mut self, out: &mut Vec<Frame>) -> Step {
        let Some(newline) = self.buffered().iter().position(|&b| b == NEWLINE) else {
            return Step::Suspended;
        };
        self.consume(newline.saturating_add(1));
        out.push(Frame::HandshakeReply(self.handshake.clone()));
        self.enter_reading_length();
        Step::Advanced
    }

    fn read_length(&mut self) -> Result<Step, ProtocolError> {
        let mut length = self.declared_length;
        let mut digits = 0_usize;
        let mut terminated = false;

        for &byte in self.buffered() {
            if byte == COMMA {
                terminated = true;
                break;
            }
            let Some(digit) = char::from(byte).to_digit(10) else {
                return Err(ProtocolError::UnexpectedByte {
                    byte,
                    offset: self.offset.saturating_add(digits),
                });
            };
            length = length
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit as usize))
                .ok_or(ProtocolError::LengthOverflow)?;
            if length > self.max_frame_len {
                return Err(ProtocolError::FrameTooLarge {
                    declared: length,
                    max: self.max_frame_len,
                });
            }
            digits = digits.saturating_add(1);
        }
        self.declared_length = length;

        if terminated {
            self.consume(digits.saturating_add(1));
            self.phase = Phase::ReadingPayload;
            Ok(Step::Advanced)
        } else {
            // Digits are already folded into `declared_length`.
            self.consume(digits);
            Ok(Step::Suspended)
        }
    }

    fn read_payload(&mut self, out: &mut Vec<Frame>) -> Step {
        let end = self.start.saturating_add(self.declared_length);
        let Some(payload) = self.buffer.get(self.start..end) else {
            return Step::Suspended;
        };
        let payload = payload.to_vec();
        self.consume(payload.len());
        out.push(Frame::Payload(payload));
        self.enter_reading_length();
        Step::Advanced
    }

    fn enter_reading_length(&mut self) {
        self.declared_length = 0;
        self.phase = Phase::ReadingLength;
    }

    fn consume(&mut self, count: usize) {
        self.start = self.start.saturating_add(count).min(self.buffer.len());
        self.offset = self.offset.saturating_add(count);
    }

    /// Drop consumed bytes once per feed rather than once per frame.
    fn compact(&mut self) {
        self.buffer.drain(..self.start);
        self.start = 0;
    }
}

/// Output of [`MessageDecoder::feed`], in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// Bytes to write back to the server (the handshake reply).
    HandshakeReply(Vec<u8>),
    /// A decoded server message.
    Message(Message),
}

/// [`FrameDecoder`] plus JSON decoding of every payload.
///
/// Zero-length frames carry no message and are skipped. A payload that is
/// not JSON fails the decoder just like a framing violation.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    frames: FrameDecoder,
    scratch: Vec<Frame>,
}

impl MessageDecoder {
    /// Create a decoder that will answer the name prompt as `player_name`.
    pub fn new(player_name: &str) -> Self {
        Self::with_max_frame_len(player_name, DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder with a custom payload size limit.
    pub fn with_max_frame_len(player_name: &str, max_frame_len: usize) -> Self {
        Self {
            frames: FrameDecoder::with_max_frame_len(player_name, max_frame_len),
            scratch: Vec::new(),
        }
    }

    /// Current phase of the framing layer.
    pub const fn phase(&self) -> Phase {
        self.frames.phase()
    }

    /// Whether the decoder hit a protocol violation.
    pub const fn is_failed(&self) -> bool {
        self.frames.is_failed()
    }

    /// Append `chunk` and push every completed event to `out`.
    ///
    /// # Errors
    ///
    /// Returns the first framing or payload violation; the decoder is
    /// failed afterwards. Events before the violation are still pushed,
    /// frames after it are discarded.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<DecodeEvent>) -> Result<(), ProtocolError> {
        self.scratch.clear();
        let framed = self.frames.feed(chunk, &mut self.scratch);

        for frame in self.scratch.drain(..) {
            match frame {
                Frame::HandshakeReply(bytes) => out.push(DecodeEvent::HandshakeReply(bytes)),
                Frame::Payload(payload) if payload.is_empty() => {}
                Frame::Payload(payload) => match Message::decode(&payload) {
                    Ok(message) => out.push(DecodeEvent::Message(message)),
                    Err(e) => {
                        self.frames.fail();
                        return Err(e);
                    }
                },
            }
        }

        framed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const PROMPT: &[u8] = b"Enter your name:\n";

    fn payloads(frames: &[Frame]) -> Vec<&[u8]> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Payload(p) => Some(p.as_slice()),
                Frame::HandshakeReply(_) => None,
            })
            .collect()
    }

    fn past_handshake(name: &str) -> FrameDecoder {
        let mut decoder = FrameDecoder::new(name);
        let mut out = Vec::new();
        decoder.feed(PROMPT, &mut out).unwrap();
        decoder
    }

    #[test]
    fn prompt_without_newline_suspends() {
        let mut decoder = FrameDecoder::new("alice");
        let mut out = Vec::new();
        decoder.feed(b"Welcome", &mut out).unwrap();

        assert!(out.is_empty());
        assert_eq!(decoder.phase(), Phase::AwaitingNamePrompt);
        assert_eq!(decoder.buffered(), b"Welcome");
    }

    #[test]
    fn handshake_reply_sent_once_and_trailing_bytes_kept() {
        let mut decoder = FrameDecoder::new("alice");
        let mut out = Vec::new();
        decoder.feed(b"Welcome\n12", &mut out).unwrap();
        decoder.feed(b"\n", &mut Vec::new()).unwrap_err();

        assert_eq!(out, vec![Frame::HandshakeReply(b"|alice\n".to_vec())]);
        // "12" belonged to the length phase, the second newline is a violation.
        assert!(decoder.is_failed());
    }

    #[test]
    fn text_after_prompt_is_parsed_as_length() {
        let mut decoder = FrameDecoder::new("alice");
        let mut out = Vec::new();
        let err = decoder.feed(b"Welcome\nfoo", &mut out).unwrap_err();

        assert_eq!(out, vec![Frame::HandshakeReply(b"|alice\n".to_vec())]);
        assert_eq!(err, ProtocolError::UnexpectedByte { byte: b'f', offset: 8 });
    }

    #[test]
    fn handshake_split_across_chunks() {
        let mut decoder = FrameDecoder::new("alice");
        let mut out = Vec::new();
        decoder.feed(b"Welc", &mut out).unwrap();
        decoder.feed(b"ome\n", &mut out).unwrap();
        decoder.feed(b"\n", &mut Vec::new()).unwrap_err();

        assert_eq!(out, vec![Frame::HandshakeReply(b"|alice\n".to_vec())]);
    }

    #[test]
    fn bytes_after_prompt_belong_to_length_phase() {
        let mut decoder = FrameDecoder::new("alice");
        let mut out = Vec::new();
        decoder.feed(b"Welcome\n1", &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(decoder.phase(), Phase::ReadingLength);
        assert_eq!(decoder.declared_length(), 1);
        assert!(decoder.buffered().is_empty());

        decoder.feed(b"2,", &mut out).unwrap();
        assert_eq!(decoder.phase(), Phase::ReadingPayload);
        assert_eq!(decoder.declared_length(), 12);
    }

    #[test]
    fn two_frames_from_one_chunk() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        decoder.feed(b"5,hello6,world!", &mut out).unwrap();

        assert_eq!(payloads(&out), vec![&b"hello"[..], &b"world!"[..]]);
        assert_eq!(decoder.phase(), Phase::ReadingLength);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn many_small_frames_in_one_chunk() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        let chunk = b"1,7".repeat(10_000);
        decoder.feed(&chunk, &mut out).unwrap();

        assert_eq!(out.len(), 10_000);
        assert!(out.iter().all(|f| *f == Frame::Payload(b"7".to_vec())));
        assert!(decoder.buffered().is_empty());

        decoder.feed(b"2,", &mut out).unwrap();
        decoder.feed(b"ok", &mut out).unwrap();
        assert_eq!(out.last(), Some(&Frame::Payload(b"ok".to_vec())));
    }

    #[test]
    fn zero_length_payload_does_not_stall() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        decoder.feed(b"0,2,ok", &mut out).unwrap();

        assert_eq!(payloads(&out), vec![&b""[..], &b"ok"[..]]);
    }

    #[test]
    fn partial_payload_waits_for_remaining_bytes() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        decoder.feed(b"10,01234", &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(decoder.phase(), Phase::ReadingPayload);
        assert_eq!(decoder.buffered(), b"01234");

        decoder.feed(b"567893,", &mut out).unwrap();
        assert_eq!(payloads(&out), vec![&b"0123456789"[..]]);
        assert_eq!(decoder.phase(), Phase::ReadingPayload);
        assert_eq!(decoder.declared_length(), 3);
    }

    #[test]
    fn payload_content_never_splits_frames() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        decoder.feed(b"7,1,2\n3,4", &mut out).unwrap();

        assert_eq!(payloads(&out), vec![&b"1,2\n3,4"[..]]);
    }

    #[test]
    fn chunking_does_not_change_output() {
        let mut stream = PROMPT.to_vec();
        let frames: [&[u8]; 4] = [b"\"RequestGuess\"", b"", b"{\"Turn\":{}}", b"[1,2,3]"];
        for payload in frames {
            stream.extend_from_slice(format!("{},", payload.len()).as_bytes());
            stream.extend_from_slice(payload);
        }

        let mut whole = FrameDecoder::new("bob");
        let mut expected = Vec::new();
        whole.feed(&stream, &mut expected).unwrap();

        for size in [1, 2, 3, 7, 64] {
            let mut decoder = FrameDecoder::new("bob");
            let mut actual = Vec::new();
            for chunk in stream.chunks(size) {
                decoder.feed(chunk, &mut actual).unwrap();
            }
            assert_eq!(actual, expected, "chunk size {size}");
        }
        assert_eq!(expected.len(), 5);
    }

    #[test]
    fn unexpected_byte_in_length_is_fatal() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        let err = decoder.feed(b"5x,hello", &mut out).unwrap_err();

        assert_eq!(
            err,
            ProtocolError::UnexpectedByte {
                byte: b'x',
                offset: PROMPT.len() + 1,
            }
        );
        assert!(out.is_empty());
        assert!(decoder.is_failed());
        assert_eq!(
            decoder.feed(b"5,hello", &mut out).unwrap_err(),
            ProtocolError::DecoderFailed
        );
        assert!(out.is_empty());
    }

    #[test]
    fn frames_before_violation_are_kept() {
        let mut decoder = past_handshake("alice");
        let mut out = Vec::new();
        let err = decoder.feed(b"2,ok-", &mut out).unwrap_err();

        assert!(matches!(err, ProtocolError::UnexpectedByte { byte: b'-', .. }));
        assert_eq!(payloads(&out), vec![&b"ok"[..]]);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_len("alice", 100);
        let mut out = Vec::new();
        decoder.feed(PROMPT, &mut out).unwrap();
        let err = decoder.feed(b"101,", &mut out).unwrap_err();

        assert_eq!(
            err,
            ProtocolError::FrameTooLarge {
                declared: 101,
                max: 100,
            }
        );
    }

    #[test]
    fn overflowing_length_is_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_len("alice", usize::MAX);
        let mut out = Vec::new();
        decoder.feed(PROMPT, &mut out).unwrap();
        let digits = "9".repeat(40);
        let err = decoder.feed(digits.as_bytes(), &mut out).unwrap_err();

        assert_eq!(err, ProtocolError::LengthOverflow);
    }

    #[test]
    fn message_decoder_emits_json_messages() {
        let mut decoder = MessageDecoder::new("carol");
        let mut out = Vec::new();
        decoder
            .feed(b"hi\n14,\"RequestGuess\"0,12,{\"Trick\":[]}", &mut out)
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], DecodeEvent::HandshakeReply(b"|carol\n".to_vec()));
        let kinds: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::Message(m) => m.kind(),
                DecodeEvent::HandshakeReply(_) => None,
            })
            .collect();
        assert_eq!(kinds, vec!["RequestGuess", "Trick"]);
    }

    #[test]
    fn message_decoder_fails_on_malformed_json() {
        let mut decoder = MessageDecoder::new("carol");
        let mut out = Vec::new();
        let err = decoder
            .feed(b"hi\n2,[]5,hello2,{}", &mut out)
            .unwrap_err();

        assert!(matches!(err, ProtocolError::InvalidPayload(_)));
        assert!(decoder.is_failed());
        // Handshake and the first message survive; nothing after the bad frame.
        assert_eq!(out.len(), 2);
        assert_eq!(
            decoder.feed(b"2,{}", &mut out).unwrap_err(),
            ProtocolError::DecoderFailed
        );
    }
}
