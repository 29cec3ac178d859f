//! Anonymous browser identity.
//!
//! Each browser gets an unguessable [`ClientId`] on first contact, stored
//! in an HTTP-only cookie. The id is opaque to the bridge: it only keys
//! the session registry.

use std::fmt;
use std::str::FromStr;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

/// Opaque identity of one browser, minted once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Mint a fresh random identity (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Read the identity cookie, minting and setting a new one when it is
/// missing or not a valid id.
///
/// The returned jar must be part of the response so a freshly minted
/// cookie reaches the browser.
pub fn resolve(jar: CookieJar, cookie_name: &str) -> (ClientId, CookieJar) {
    let existing = jar
        .get(cookie_name)
        .and_then(|cookie| cookie.value().parse::<ClientId>().ok());
    if let Some(id) = existing {
        return (id, jar);
    }

    let id = ClientId::new();
    let cookie = Cookie::build((cookie_name.to_owned(), id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    (id, jar.add(cookie))
}
