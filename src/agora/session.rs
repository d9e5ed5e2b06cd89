//! In-memory session store: one record per browser, at most one active
//! session per user.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Flash staged on a session retired by a newer login.
pub const FLASH_LOGGED_IN_ELSEWHERE: &str =
    "You have been signed out because your account was signed in from another location.";

/// Flash staged when a session idles past the sliding window.
pub const FLASH_SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("failed to generate session credentials: {0}")]
    Credentials(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Disabled,
}

/// One browser's server-side record. The owning user, once set, never
/// changes; a re-login deletes and recreates instead.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub user_id: Option<i64>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub flash: Option<String>,
    pub csrf_token: String,
    pub data: HashMap<String, String>,
}

/// Merge-style update for [`SessionStore::set_fields`]; unset fields are
/// left alone.
#[derive(Debug, Default)]
pub struct SessionUpdate {
    last_activity: Option<DateTime<Utc>>,
    status: Option<SessionStatus>,
    flash: Option<String>,
    data: Vec<(String, String)>,
}

impl SessionUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_flash(mut self, flash: impl Into<String>) -> Self {
        self.flash = Some(flash.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.push((key.into(), value.into()));
        self
    }
}

/// Outcome of the atomic sliding-expiration check.
#[derive(Clone, Debug)]
pub enum ActivityCheck {
    /// Still within the idle window; `last_activity` was refreshed and the
    /// returned snapshot reflects the refresh.
    Active(Session),
    /// Idled past the window; the caller decides how to retire the record.
    Expired,
    /// Already disabled; the snapshot still carries the staged flash.
    Disabled(Session),
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    // user id -> that user's single active session id
    active_users: HashMap<i64, String>,
}

/// Thread-safe session table plus the user -> active-session index. All
/// synchronization is internal; the lock is never held across I/O.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Inner>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, optionally owned by a user. A prior active session
    /// for the same user is retired under the same write lock, so exactly
    /// one session stays indexed no matter how concurrent creates
    /// interleave.
    ///
    /// # Errors
    /// Returns an error only if credential generation fails.
    pub async fn create(&self, user_id: Option<i64>) -> Result<String, SessionError> {
        let id = Uuid::new_v4().to_string();
        let csrf_token = generate_csrf_token()?;
        let now = Utc::now();

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if let Some(user) = user_id {
            if let Some(prior) = inner.active_users.remove(&user) {
                if let Some(session) = inner.sessions.get_mut(&prior) {
                    session.status = SessionStatus::Disabled;
                    session.flash = Some(FLASH_LOGGED_IN_ELSEWHERE.to_string());
                }
            }
            inner.active_users.insert(user, id.clone());
        }

        inner.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                user_id,
                last_activity: now,
                status: SessionStatus::Active,
                flash: None,
                csrf_token,
                data: HashMap::new(),
            },
        );

        Ok(id)
    }

    /// Read-only snapshot of a session.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    /// Merge the set fields of `update` into the record.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for an unknown id.
    pub async fn set_fields(&self, id: &str, update: SessionUpdate) -> Result<(), SessionError> {
        let mut guard = self.inner.write().await;
        let session = guard.sessions.get_mut(id).ok_or(SessionError::NotFound)?;

        if let Some(at) = update.last_activity {
            session.last_activity = at;
        }
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(flash) = update.flash {
            session.flash = Some(flash);
        }
        for (key, value) in update.data {
            session.data.insert(key, value);
        }

        Ok(())
    }

    /// Refresh `last_activity` to now.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for an unknown id.
    pub async fn touch(&self, id: &str) -> Result<(), SessionError> {
        self.set_fields(id, SessionUpdate::new().with_last_activity(Utc::now()))
            .await
    }

    /// Sliding-expiration check. The idle comparison and the refresh happen
    /// under one write lock: a session last seen exactly `idle_limit` ago is
    /// expired, anything younger is refreshed in place.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for an unknown id.
    pub async fn check_activity(
        &self,
        id: &str,
        idle_limit: Duration,
    ) -> Result<ActivityCheck, SessionError> {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let session = guard.sessions.get_mut(id).ok_or(SessionError::NotFound)?;

        if session.status == SessionStatus::Disabled {
            return Ok(ActivityCheck::Disabled(session.clone()));
        }

        if now - session.last_activity >= idle_limit {
            return Ok(ActivityCheck::Expired);
        }

        session.last_activity = now;
        Ok(ActivityCheck::Active(session.clone()))
    }

    /// Disable a session and drop the user-index entry pointing at it. The
    /// record itself stays so a stale cookie can surface its flash once
    /// more. Idempotent.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for an unknown id.
    pub async fn disable(&self, id: &str) -> Result<(), SessionError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let session = inner.sessions.get_mut(id).ok_or(SessionError::NotFound)?;

        session.status = SessionStatus::Disabled;
        if let Some(user) = session.user_id {
            if inner.active_users.get(&user).map(String::as_str) == Some(id) {
                inner.active_users.remove(&user);
            }
        }

        Ok(())
    }

    /// Disable every session owned by a user and stage the given flash on
    /// each. Used by the forced-logout path when a block lapses.
    pub async fn disable_all_for_user(&self, user_id: i64, flash: &str) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        for session in inner
            .sessions
            .values_mut()
            .filter(|session| session.user_id == Some(user_id))
        {
            session.status = SessionStatus::Disabled;
            session.flash = Some(flash.to_string());
        }
        inner.active_users.remove(&user_id);
    }

    /// Remove the record and, if indexed, the user-index entry.
    pub async fn delete(&self, id: &str) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if let Some(session) = inner.sessions.remove(id) {
            if let Some(user) = session.user_id {
                if inner.active_users.get(&user).map(String::as_str) == Some(id) {
                    inner.active_users.remove(&user);
                }
            }
        }
    }

    /// The user's currently indexed active session, if any.
    pub async fn active_session_for_user(&self, user_id: i64) -> Option<String> {
        self.inner.read().await.active_users.get(&user_id).cloned()
    }

    /// Read-once flash: returns the staged message and clears it.
    pub async fn pop_flash(&self, id: &str) -> Option<String> {
        let mut guard = self.inner.write().await;
        guard.sessions.get_mut(id).and_then(|s| s.flash.take())
    }

    /// Read-once extension value, used to stage cross-request data such as a
    /// pending third-party login profile.
    pub async fn take_data(&self, id: &str, key: &str) -> Option<String> {
        let mut guard = self.inner.write().await;
        guard.sessions.get_mut(id).and_then(|s| s.data.remove(key))
    }
}

/// Anti-forgery token minted at session creation. Only ever compared against
/// form submissions; never stored outside the record.
fn generate_csrf_token() -> Result<String, SessionError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| SessionError::Credentials(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
