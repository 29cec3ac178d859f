//! One TCP connection to the game server per joined session.
//!
//! [`UpstreamConnection::open`] spawns a task that owns the socket and a
//! [`MessageDecoder`]. The task:
//!
//! - answers the server's name prompt with the handshake reply
//! - feeds every read into the decoder and hands decoded messages to the
//!   session's [`UpstreamCallback`] in wire order
//! - writes queued commands as they arrive
//!
//! The caller keeps an [`UpstreamHandle`]. Sending through the handle
//! never waits on the socket: commands go into a bounded queue and are
//! dropped when it is full. Dropping or closing the handle aborts the
//! task, which closes the socket and releases the decoder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use plump_protocol::{Command, DecodeEvent, Message, MessageDecoder, Phase, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::UpstreamSettings;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream-{}", self.0)
    }
}

/// Errors that end an upstream connection or reject a command.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Game server address.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TCP connection was not established in time.
    #[error("connecting to {addr} timed out: {message}")]
    ConnectTimeout {
        /// Game server address.
        addr: String,
        /// Timer description.
        message: String,
    },

    /// The server never sent its name prompt.
    #[error("no name prompt from the game server before the deadline")]
    HandshakeTimeout,

    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(std::io::Error),

    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(std::io::Error),

    /// The server violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The command queue is full; the command was dropped.
    #[error("command queue is full")]
    QueueFull,

    /// The connection task has ended.
    #[error("connection is closed")]
    Closed,
}

/// Why a connection task ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The server closed the socket (EOF).
    RemoteClosed,
    /// The owning handle went away.
    LocalClosed,
    /// A transport failure or protocol violation.
    Failed(UpstreamError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteClosed => f.write_str("closed by game server"),
            Self::LocalClosed => f.write_str("closed locally"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Receives what a connection task produces.
///
/// Implemented by the session link; tests plug in their own.
pub trait UpstreamCallback: Send + Sync + 'static {
    /// A message was decoded. Called in wire order.
    fn on_message(&self, connection: ConnectionId, message: Message);

    /// The connection task has ended and released its socket.
    fn on_closed(&self, connection: ConnectionId, reason: &CloseReason);
}

/// Owner's side of a live upstream connection.
#[derive(Debug)]
pub struct UpstreamHandle {
    id: ConnectionId,
    commands: mpsc::Sender<Vec<u8>>,
    task: AbortHandle,
}

impl UpstreamHandle {
    /// Id of the connection this handle controls.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a command for the socket without waiting.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::QueueFull`] when the socket is not keeping up and
    /// [`UpstreamError::Closed`] when the connection has ended.
    pub fn send(&self, command: &Command) -> Result<(), UpstreamError> {
        self.commands.try_send(command.encode()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => UpstreamError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => UpstreamError::Closed,
        })
    }

    /// Whether the connection task has ended.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.task.is_finished()
    }

    /// Abort the connection task, closing the socket.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Entry point for opening upstream connections.
#[derive(Debug)]
pub struct UpstreamConnection;

impl UpstreamConnection {
    /// Start connecting to the game server as `player_name`.
    ///
    /// Returns immediately; connect failures are reported through
    /// [`UpstreamCallback::on_closed`]. Must be called inside a Tokio
    /// runtime.
    pub fn open(
        settings: &UpstreamSettings,
        player_name: &str,
        callback: Arc<dyn UpstreamCallback>,
    ) -> UpstreamHandle {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(settings.command_queue.max(1));
        let task = tokio::spawn(run(
            id,
            settings.clone(),
            player_name.to_owned(),
            rx,
            callback,
        ));

        UpstreamHandle {
            id,
            commands: tx,
            task: task.abort_handle(),
        }
    }
}

async fn run(
    id: ConnectionId,
    settings: UpstreamSettings,
    player_name: String,
    commands: mpsc::Receiver<Vec<u8>>,
    callback: Arc<dyn UpstreamCallback>,
) {
    let reason = match drive(id, &settings, &player_name, commands, callback.as_ref()).await {
        Ok(reason) => reason,
        Err(e) => CloseReason::Failed(e),
    };

    match &reason {
        CloseReason::Failed(UpstreamError::Protocol(e)) => {
            warn!(connection = %id, error = %e, "Game server violated the protocol, closing");
        }
        CloseReason::Failed(e) => warn!(connection = %id, error = %e, "Upstream connection failed"),
        CloseReason::RemoteClosed | CloseReason::LocalClosed => {
            info!(connection = %id, reason = %reason, "Upstream connection closed");
        }
    }
    callback.on_closed(id, &reason);
}

async fn drive(
    id: ConnectionId,
    settings: &UpstreamSettings,
    player_name: &str,
    mut commands: mpsc::Receiver<Vec<u8>>,
    callback: &dyn UpstreamCallback,
) -> Result<CloseReason, UpstreamError> {
    let addr = settings.address();
    let stream = tokio::time::timeout(settings.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|e| UpstreamError::ConnectTimeout {
            addr: addr.clone(),
            message: e.to_string(),
        })?
        .map_err(|source| UpstreamError::Connect {
            addr: addr.clone(),
            source,
        })?;
    info!(connection = %id, addr = %addr, player = player_name, "Connected to game server");

    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = MessageDecoder::with_max_frame_len(player_name, settings.max_frame_len);
    let mut buf = vec![0_u8; settings.read_buffer_bytes.max(1)];
    let mut events = Vec::new();
    let handshake_deadline = settings
        .handshake_timeout()
        .and_then(|timeout| Instant::now().checked_add(timeout));

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read.map_err(UpstreamError::Read)?;
                if n == 0 {
                    return Ok(CloseReason::RemoteClosed);
                }
                let chunk = buf.get(..n).unwrap_or_default();
                debug!(connection = %id, bytes = n, "Read from game server");

                let decoded = decoder.feed(chunk, &mut events);
                for event in events.drain(..) {
                    match event {
                        DecodeEvent::HandshakeReply(reply) => {
                            writer.write_all(&reply).await.map_err(UpstreamError::Write)?;
                            debug!(connection = %id, player = player_name, "Answered name prompt");
                        }
                        DecodeEvent::Message(message) => {
                            debug!(connection = %id, kind = message.kind(), "Decoded message");
                            callback.on_message(id, message);
                        }
                    }
                }
                decoded?;
            }
            // Commands wait in the queue until the name prompt is answered.
            command = commands.recv(), if decoder.phase() != Phase::AwaitingNamePrompt => {
                let Some(bytes) = command else {
                    return Ok(CloseReason::LocalClosed);
                };
                writer.write_all(&bytes).await.map_err(UpstreamError::Write)?;
                debug!(connection = %id, bytes = bytes.len(), "Sent command");
            }
            () = prompt_deadline(handshake_deadline, decoder.phase()) => {
                return Err(UpstreamError::HandshakeTimeout);
            }
        }
    }
}

/// Resolves once the name prompt deadline passes; never while past the
/// handshake or without a deadline.
async fn prompt_deadline(deadline: Option<Instant>, phase: Phase) {
    match deadline {
        Some(deadline) if phase == Phase::AwaitingNamePrompt => {
            tokio::time::sleep_until(deadline).await;
        }
        _ => std::future::pending().await,
    }
}
