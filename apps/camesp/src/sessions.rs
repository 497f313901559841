//! Login sessions handed out by the web interface.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Literal form value that turns a login into a long-lived one.
pub const REMEMBER_ME: &str = "1";
pub const REMEMBER_ME_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub expiry: SystemTime,
}

/// Append-ordered session list.
///
/// There is no lock inside: share it as [`SharedSessions`] and never hold the
/// guard across an `.await`.
pub struct SessionStore<C: Clock = SystemClock> {
    sessions: Vec<Session>,
    clock: C,
}

pub type SharedSessions<C = SystemClock> = Arc<parking_lot::Mutex<SessionStore<C>>>;

impl SessionStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for SessionStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SessionStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            sessions: Vec::new(),
            clock,
        }
    }

    pub fn shared(self) -> SharedSessions<C> {
        Arc::new(parking_lot::Mutex::new(self))
    }

    /// Opens a session and returns its id. Ids are derived from the current
    /// time only, so two sessions created at the same instant share one.
    pub fn create(&mut self, duration: Duration, remember_me: Option<&str>) -> String {
        let duration = if remember_me == Some(REMEMBER_ME) {
            REMEMBER_ME_DURATION
        } else {
            duration
        };
        let now = self.clock.now();
        let id = session_id(now);
        self.sessions.push(Session {
            id: id.clone(),
            expiry: now + duration,
        });
        debug!(sessions = self.sessions.len(), ?duration, "session created");
        id
    }

    /// True when a live session carries `id`. Expired sessions are purged
    /// afterwards whatever the answer.
    pub fn check(&mut self, id: Option<&str>) -> bool {
        let now = self.clock.now();
        let found = id.is_some_and(|id| {
            self.sessions
                .iter()
                .any(|session| session.id == id && session.expiry >= now)
        });
        self.purge();
        found
    }

    /// Drops every session whose expiry lies in the past.
    pub fn purge(&mut self) {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|session| session.expiry >= now);
        let purged = before - self.sessions.len();
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }
    }

    /// Removes the first session with `id`.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.sessions.iter().position(|session| session.id == id) {
            Some(index) => {
                self.sessions.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }
}

fn session_id(now: SystemTime) -> String {
    let stamp = DateTime::<Utc>::from(now).format("%Y-%m-%dT%H:%M:%S%.9f").to_string();
    hex::encode(Sha256::digest(stamp.as_bytes()))
}
