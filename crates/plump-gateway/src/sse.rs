//! Server-sent event stream of a session's game messages.
//!
//! Clients open `GET /api/events` and receive one `data:` event per
//! message decoded from their upstream connection, preceded by a
//! `retry:` hint. Each identity may hold one stream at a time; closing
//! it deletes the session and its upstream connection.
//!
//! A stream that falls behind by more than the session's event capacity
//! skips the missed messages and resumes from the newest one.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum_extra::extract::cookie::CookieJar;
use futures::stream::{self, Stream};
use plump_protocol::Message;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::identity::{self, ClientId};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::state::AppState;

/// Open the session's event stream.
///
/// # Route
///
/// `GET /api/events`
///
/// # Errors
///
/// `409` if this identity already has a stream open, `503` if the
/// session limit is reached.
pub async fn events(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, GatewayError> {
    let settings = &state.config.sessions;
    let (client_id, jar) = identity::resolve(jar, &settings.cookie_name);

    let (session, rx) = attach(&state.registry, client_id)?;
    debug!(client_id = %client_id, "Event stream opened");

    let guard = SubscriptionGuard {
        session,
        registry: Arc::clone(&state.registry),
    };
    let stream = event_stream(rx, guard, state.shutdown_signal(), settings.sse_retry());
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(settings.sse_keep_alive()));

    Ok((jar, [(CACHE_CONTROL, "no-cache")], sse))
}

/// Take the subscriber slot of the session registered for `client_id`.
///
/// A stream closing concurrently may unregister the session it just
/// released; subscribing to that one would leave the new stream on an
/// orphan, so the slot is given back and a fresh session is used.
fn attach(
    registry: &SessionRegistry,
    client_id: ClientId,
) -> Result<(Arc<Session>, Receiver<Message>), GatewayError> {
    loop {
        let session = registry.get_or_create(client_id)?;
        let rx = session.subscribe().ok_or(GatewayError::AlreadySubscribed)?;
        if registry.is_current(&session) {
            return Ok((session, rx));
        }
        session.unsubscribe();
    }
}

/// Turn the session's receiver into SSE events.
///
/// The first event carries only the `retry:` field. The stream ends when
/// `shutdown` turns `true`.
fn event_stream(
    rx: Receiver<Message>,
    guard: SubscriptionGuard,
    shutdown: watch::Receiver<bool>,
    retry: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let feed = Feed {
        rx,
        guard,
        shutdown,
        retry: Some(retry),
    };

    stream::unfold(feed, |mut feed| async move {
        if let Some(retry) = feed.retry.take() {
            return Some((Ok::<_, Infallible>(Event::default().retry(retry)), feed));
        }
        loop {
            let received = tokio::select! {
                received = feed.rx.recv() => received,
                _ = feed.shutdown.wait_for(|stop| *stop) => return None,
            };
            match received {
                Ok(message) => {
                    let event = Event::default().data(message.to_json_string());
                    return Some((Ok::<_, Infallible>(event), feed));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client_id = %feed.guard.session.id(), skipped, "Event stream lagged, game messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

struct Feed {
    rx: Receiver<Message>,
    guard: SubscriptionGuard,
    shutdown: watch::Receiver<bool>,
    retry: Option<Duration>,
}

/// Tears the session down when its event stream is dropped, which
/// happens when the browser disconnects.
struct SubscriptionGuard {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        // Unregister before freeing the slot so a reconnect cannot
        // subscribe to a session that is about to disappear.
        self.registry.remove_session(&self.session);
        self.session.unsubscribe();
        debug!(client_id = %self.session.id(), "Event stream closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::config::SessionSettings;

    fn setup() -> (Arc<SessionRegistry>, Arc<Session>) {
        let registry = Arc::new(SessionRegistry::new(&SessionSettings::default()));
        let session = registry.get_or_create(ClientId::new()).unwrap();
        (registry, session)
    }

    fn guard(registry: &Arc<SessionRegistry>, session: &Arc<Session>) -> SubscriptionGuard {
        SubscriptionGuard {
            session: Arc::clone(session),
            registry: Arc::clone(registry),
        }
    }

    #[tokio::test]
    async fn dropping_stream_removes_session() {
        let (registry, session) = setup();
        let rx = session.subscribe().unwrap();
        let (_stop, shutdown) = watch::channel(false);
        let stream = event_stream(rx, guard(&registry, &session), shutdown, Duration::from_secs(10));
        assert_eq!(registry.len(), 1);

        drop(stream);
        assert!(registry.is_empty());
        assert!(!session.has_subscriber());
    }

    #[tokio::test]
    async fn stream_yields_retry_then_messages() {
        let (registry, session) = setup();
        let rx = session.subscribe().unwrap();
        let (_stop, shutdown) = watch::channel(false);
        let mut stream = Box::pin(event_stream(
            rx,
            guard(&registry, &session),
            shutdown,
            Duration::from_secs(10),
        ));

        assert!(stream.next().await.is_some());
        session.publish(Message::decode(b"\"RequestGuess\"").unwrap());
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn shutdown_ends_stream_and_removes_session() {
        let (registry, session) = setup();
        let rx = session.subscribe().unwrap();
        let (stop, shutdown) = watch::channel(false);
        let mut stream = Box::pin(event_stream(
            rx,
            guard(&registry, &session),
            shutdown,
            Duration::from_secs(10),
        ));

        assert!(stream.next().await.is_some());
        stop.send_replace(true);
        assert!(stream.next().await.is_none());

        drop(stream);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reconnect_after_teardown_attaches_to_registered_session() {
        let (registry, session) = setup();
        let id = session.id();
        let rx = session.subscribe().unwrap();
        let (_stop, shutdown) = watch::channel(false);
        let stream = event_stream(rx, guard(&registry, &session), shutdown, Duration::from_secs(10));

        drop(stream);
        // A request that looked the session up before teardown holds a
        // handle that is no longer registered.
        assert!(!registry.is_current(&session));

        let (attached, _rx) = attach(&registry, id).unwrap();
        assert!(!Arc::ptr_eq(&attached, &session));
        assert!(registry.get(id).is_some_and(|s| Arc::ptr_eq(&s, &attached)));
        assert!(attached.has_subscriber());
    }

    #[test]
    fn attach_refuses_second_subscriber() {
        let (registry, session) = setup();
        let _first = attach(&registry, session.id()).unwrap();
        assert!(matches!(
            attach(&registry, session.id()),
            Err(GatewayError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn lagging_stream_skips_to_newest_messages() {
        let settings = SessionSettings {
            event_capacity: 2,
            ..SessionSettings::default()
        };
        let registry = Arc::new(SessionRegistry::new(&settings));
        let session = registry.get_or_create(ClientId::new()).unwrap();
        let rx = session.subscribe().unwrap();
        let (_stop, shutdown) = watch::channel(false);
        let mut stream = Box::pin(event_stream(
            rx,
            guard(&registry, &session),
            shutdown,
            Duration::from_secs(10),
        ));
        assert!(stream.next().await.is_some());

        for n in 0..5 {
            session.publish(Message::decode(n.to_string().as_bytes()).unwrap());
        }

        // Only the newest two survive the overflow.
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
    }
}
