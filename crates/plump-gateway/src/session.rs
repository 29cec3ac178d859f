//! Per-browser session state and the event/command relay.
//!
//! A [`Session`] bridges one [`ClientId`] to at most one upstream
//! connection:
//!
//! - decoded messages are published on a [`broadcast`] channel that the
//!   session's single SSE subscriber listens to
//! - commands from HTTP requests are forwarded to the live connection,
//!   or dropped when there is none
//!
//! The relay is a live feed, not a queue: messages published while nobody
//! is subscribed are dropped and never replayed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use plump_protocol::{Command, Message};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::UpstreamSettings;
use crate::identity::ClientId;
use crate::upstream::{
    CloseReason, ConnectionId, UpstreamCallback, UpstreamConnection, UpstreamError,
    UpstreamHandle,
};

/// Result of [`Session::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A connection was opened; none existed before.
    Started,
    /// The previous connection was closed and a new one opened.
    Replaced,
}

/// Result of [`Session::issue_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Queued for the socket.
    Sent,
    /// No live connection; the command was discarded.
    NoConnection,
    /// The connection's command queue was full; the command was discarded.
    Dropped,
}

/// Server-side state for one browser identity.
#[derive(Debug)]
pub struct Session {
    id: ClientId,
    events: broadcast::Sender<Message>,
    upstream: Mutex<Option<UpstreamHandle>>,
    subscribed: AtomicBool,
    last_active: Mutex<Instant>,
    this: Weak<Self>,
}

impl Session {
    /// Create a session with an empty event channel and no connection.
    pub fn new(id: ClientId, event_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Arc::new_cyclic(|this| Self {
            id,
            events,
            upstream: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
            this: this.clone(),
        })
    }

    /// The identity this session belongs to.
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Deliver a decoded message to the subscriber, if any.
    ///
    /// Returns the number of receivers reached. Zero means the message
    /// was dropped, which is normal when no event stream is open.
    pub fn publish(&self, message: Message) -> usize {
        // send fails only when there are no receivers.
        self.events.send(message).unwrap_or(0)
    }

    /// Attach the session's sole event subscriber.
    ///
    /// Returns `None` when another subscriber is already attached. The
    /// receiver only sees messages published after this call.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Message>> {
        self.subscribed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.touch();
        Some(self.events.subscribe())
    }

    /// Release the subscriber slot taken by [`Session::subscribe`].
    pub fn unsubscribe(&self) {
        self.subscribed.store(false, Ordering::Release);
        self.touch();
    }

    /// Whether an event stream is attached.
    pub fn has_subscriber(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Open an upstream connection for `player_name`.
    ///
    /// A live connection from an earlier join is closed first, so the
    /// session never reads from two sockets at once.
    pub fn join(&self, settings: &UpstreamSettings, player_name: &str) -> JoinOutcome {
        self.touch();
        let callback: Arc<dyn UpstreamCallback> = Arc::new(SessionLink {
            client: self.id,
            session: self.this.clone(),
        });

        let mut slot = self.upstream_slot();
        let mut outcome = JoinOutcome::Started;
        if let Some(previous) = slot.take() {
            if !previous.is_closed() {
                outcome = JoinOutcome::Replaced;
            }
            debug!(client_id = %self.id, connection = %previous.id(), "Closing previous upstream connection");
            previous.close();
        }
        *slot = Some(UpstreamConnection::open(settings, player_name, callback));
        outcome
    }

    /// Forward a command to the live connection.
    pub fn issue_command(&self, command: &Command) -> CommandOutcome {
        self.touch();
        let slot = self.upstream_slot();
        let Some(handle) = slot.as_ref() else {
            debug!(client_id = %self.id, command = %command, "No upstream connection, command dropped");
            return CommandOutcome::NoConnection;
        };

        match handle.send(command) {
            Ok(()) => CommandOutcome::Sent,
            Err(UpstreamError::QueueFull) => {
                warn!(client_id = %self.id, connection = %handle.id(), "Command queue full, command dropped");
                CommandOutcome::Dropped
            }
            Err(e) => {
                debug!(client_id = %self.id, connection = %handle.id(), error = %e, "Command dropped");
                CommandOutcome::NoConnection
            }
        }
    }

    /// Whether a connection is open (or opening).
    pub fn has_connection(&self) -> bool {
        self.upstream_slot().as_ref().is_some_and(|h| !h.is_closed())
    }

    /// Close the upstream connection, if any.
    pub fn close(&self) {
        if let Some(handle) = self.upstream_slot().take() {
            handle.close();
        }
    }

    /// Time since the last request touched this session.
    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Mark the session as used now.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Forget the connection `id` if it is still the current one.
    fn connection_closed(&self, id: ConnectionId) {
        let mut slot = self.upstream_slot();
        if slot.as_ref().is_some_and(|h| h.id() == id) {
            *slot = None;
        }
    }

    fn upstream_slot(&self) -> MutexGuard<'_, Option<UpstreamHandle>> {
        self.upstream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes connection output back to its session without keeping the
/// session alive.
struct SessionLink {
    client: ClientId,
    session: Weak<Session>,
}

impl UpstreamCallback for SessionLink {
    fn on_message(&self, connection: ConnectionId, message: Message) {
        match self.session.upgrade() {
            Some(session) => {
                let receivers = session.publish(message);
                if receivers == 0 {
                    debug!(client_id = %self.client, connection = %connection, "No subscriber, message dropped");
                }
            }
            None => {
                debug!(client_id = %self.client, connection = %connection, "Session gone, message dropped");
            }
        }
    }

    fn on_closed(&self, connection: ConnectionId, reason: &CloseReason) {
        if let Some(session) = self.session.upgrade() {
            debug!(client_id = %self.client, connection = %connection, reason = %reason, "Upstream detached from session");
            session.connection_closed(connection);
        }
    }
}
