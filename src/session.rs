//! Session tokens for logged-in users.
//!
//! The store is an ordinary value handed to whoever needs it (clones share
//! the same sessions); there is no process-wide instance.

use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mallbus_error::SessionError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token handed to the client after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(Uuid);

impl SessionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionToken {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SessionError::InvalidToken {
                token: s.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
struct Session<U> {
    user: U,
    expires_at: Option<DateTime<Utc>>,
}

impl<U> Session<U> {
    fn is_expired(
        &self,
        now: DateTime<Utc>,
    ) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Concurrent token → user map.
pub struct SessionStore<U> {
    sessions: Arc<DashMap<SessionToken, Session<U>>>,
    ttl: Option<Duration>,
}

impl<U> Clone for SessionStore<U> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            ttl: self.ttl,
        }
    }
}

impl<U: Clone> SessionStore<U> {
    /// Sessions live until invalidated.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: None,
        }
    }

    /// Sessions expire `ttl` after creation.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new()
        }
    }

    pub fn create_session(
        &self,
        user: U,
    ) -> SessionToken {
        let token = SessionToken::new();
        let expires_at = self.ttl.map(|ttl| Utc::now() + ttl);
        self.sessions.insert(token, Session { user, expires_at });
        token
    }

    /// User behind `token`. An expired session is removed on lookup.
    pub fn user(
        &self,
        token: &SessionToken,
    ) -> Result<U, SessionError> {
        {
            let session = self.sessions.get(token).ok_or(SessionError::NotFound)?;
            if !session.is_expired(Utc::now()) {
                return Ok(session.user.clone());
            }
        }
        self.sessions.remove(token);
        Err(SessionError::Expired)
    }

    /// Parses a client-supplied token and looks it up.
    pub fn user_by_str(
        &self,
        token: &str,
    ) -> Result<U, SessionError> {
        self.user(&token.parse()?)
    }

    pub fn invalidate(
        &self,
        token: &SessionToken,
    ) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops every expired session and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<U: Clone> Default for SessionStore<U> {
    fn default() -> Self {
        Self::new()
    }
}
