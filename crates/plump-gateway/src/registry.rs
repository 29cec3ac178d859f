//! The session registry: single source of truth for `ClientId -> Session`.
//!
//! Backed by a [`DashMap`] so requests for different identities never
//! contend on one lock. Each session's own state is guarded inside
//! [`Session`], so concurrent join, command and event-stream requests
//! for the same identity are safe too.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionSettings;
use crate::identity::ClientId;
use crate::session::Session;

/// Errors returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The configured session limit is reached.
    #[error("session limit of {0} reached")]
    Full(usize),
}

/// Owns every live [`Session`].
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<Session>>,
    event_capacity: usize,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            event_capacity: settings.event_capacity,
            max_sessions: settings.max_sessions,
        }
    }

    /// Return the session for `id`, creating an empty one if needed.
    ///
    /// Idempotent: concurrent calls for the same id get the same session.
    pub fn get_or_create(&self, id: ClientId) -> Result<Arc<Session>, RegistryError> {
        if let Some(existing) = self.sessions.get(&id) {
            existing.touch();
            return Ok(Arc::clone(existing.value()));
        }

        if let Some(max) = self.max_sessions {
            if self.sessions.len() >= max {
                return Err(RegistryError::Full(max));
            }
        }

        let entry = self.sessions.entry(id).or_insert_with(|| {
            debug!(client_id = %id, "Session created");
            Session::new(id, self.event_capacity)
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Look up a session without creating one.
    pub fn get(&self, id: ClientId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Delete the session for `id` and close its upstream connection.
    ///
    /// Messages still in flight for it are dropped as orphans.
    pub fn remove(&self, id: ClientId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        session.close();
        debug!(client_id = %id, "Session removed");
        Some(session)
    }

    /// Delete `session` only if it is still the registered one for its id.
    ///
    /// A stale handle must not remove a newer session created under the
    /// same identity.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            session.close();
            debug!(client_id = %session.id(), "Session removed");
        }
        removed
    }

    /// Whether `session` is the one registered for its id.
    pub fn is_current(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .get(&session.id())
            .is_some_and(|current| Arc::ptr_eq(current.value(), session))
    }

    /// Like [`SessionRegistry::remove_session`], but keeps a session that
    /// gained an event stream since it was found idle.
    fn remove_unsubscribed(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.id(), |_, current| {
                Arc::ptr_eq(current, session) && !current.has_subscriber()
            })
            .is_some();
        if removed {
            session.close();
            debug!(client_id = %session.id(), "Idle session removed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions with no event stream that have been idle for at
    /// least `ttl`. Returns how many were removed.
    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let stale: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| !entry.has_subscriber() && entry.idle_for() >= ttl)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        stale
            .iter()
            .filter(|session| self.remove_unsubscribed(session))
            .count()
    }

    /// Remove every session and close its connection. Returns how many
    /// were removed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ClientId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id).is_some()).count()
    }

    /// Run [`SessionRegistry::reap_idle`] periodically on a background task.
    pub fn spawn_reaper(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = (ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let reaped = registry.reap_idle(ttl);
                if reaped > 0 {
                    info!(reaped, remaining = registry.len(), "Reaped idle sessions");
                }
            }
        })
    }
}
