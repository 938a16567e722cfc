//! Server-side sessions
//!
//! The browser only holds an opaque id in an `HttpOnly` cookie. The backend
//! tokens, the lock draft and the one-shot flash message stay here.

use dashmap::DashMap;
use opsflow_core::{AccessToken, AuthSession, LockDraft, RefreshToken};
use std::sync::Arc;
use uuid::Uuid;

/// Session cookie name
pub const COOKIE_NAME: &str = "opsflow_session";

/// Flash message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    /// Operation succeeded
    Success,
    /// Operation refused or failed
    Error,
}

/// Message shown once on the next page render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    /// Severity
    pub kind: FlashKind,
    /// Text
    pub message: String,
}

impl Flash {
    /// Success message
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    /// Error message
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

/// One signed-in browser
#[derive(Debug, Clone)]
pub struct WebSession {
    /// Backend access token
    pub token: AccessToken,
    /// Token for renewing `token` once it expires
    pub refresh_token: Option<RefreshToken>,
    /// Lock form state
    pub draft: LockDraft,
    /// Pending flash
    pub flash: Option<Flash>,
}

/// Concurrent session map
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, WebSession>>,
}

impl SessionStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `token`, returning its id
    pub fn create(&self, token: AccessToken, refresh_token: Option<RefreshToken>) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            WebSession {
                token,
                refresh_token,
                draft: LockDraft::new(),
                flash: None,
            },
        );
        id
    }

    /// Access and refresh token of a live session
    #[must_use]
    pub fn credentials(&self, id: &str) -> Option<(AccessToken, Option<RefreshToken>)> {
        self.sessions
            .get(id)
            .map(|s| (s.token.clone(), s.refresh_token.clone()))
    }

    /// Swap in refreshed tokens, returning the new access token. The old
    /// refresh token is kept if the grant did not rotate it.
    pub fn renew(&self, id: &str, session: AuthSession) -> AccessToken {
        let AuthSession {
            access_token,
            refresh_token,
            ..
        } = session;
        if let Some(mut live) = self.sessions.get_mut(id) {
            live.token = access_token.clone();
            if refresh_token.is_some() {
                live.refresh_token = refresh_token;
            }
        }
        access_token
    }

    /// End a session
    pub fn remove(&self, id: &str) -> Option<WebSession> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Copy of the session's draft
    #[must_use]
    pub fn draft(&self, id: &str) -> Option<LockDraft> {
        self.sessions.get(id).map(|s| s.draft.clone())
    }

    /// Mutate the session's draft. The entry lock is held only for `f`.
    pub fn update_draft<T>(&self, id: &str, f: impl FnOnce(&mut LockDraft) -> T) -> Option<T> {
        self.sessions.get_mut(id).map(|mut s| f(&mut s.draft))
    }

    /// Queue a flash message
    pub fn flash(&self, id: &str, flash: Flash) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.flash = Some(flash);
        }
    }

    /// Take the queued flash message
    pub fn take_flash(&self, id: &str) -> Option<Flash> {
        self.sessions.get_mut(id).and_then(|mut s| s.flash.take())
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no live sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Outstanding lock attempt of one session.
///
/// Clears the draft's in-flight marker when the attempt ends, including when
/// the request is cancelled before the backend answers.
#[must_use = "dropping the guard abandons the lock attempt"]
#[derive(Debug)]
pub struct InFlightLock<'a> {
    store: &'a SessionStore,
    id: &'a str,
    armed: bool,
}

impl<'a> InFlightLock<'a> {
    /// Guard a lock already started with [`LockDraft::begin_lock`]
    pub fn new(store: &'a SessionStore, id: &'a str) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    /// Record how the attempt ended; a success clears the draft
    pub fn finish(mut self, succeeded: bool) {
        self.armed = false;
        self.store
            .update_draft(self.id, |draft| draft.finish_lock(succeeded));
    }
}

impl Drop for InFlightLock<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("lock attempt abandoned before completion");
            self.store
                .update_draft(self.id, |draft| draft.finish_lock(false));
        }
    }
}

/// `Set-Cookie` value carrying a session id
#[must_use]
pub fn session_cookie(id: &str, secure: bool) -> String {
    let mut cookie = format!("{COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session cookie
#[must_use]
pub fn clear_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_core::TaskId;

    #[test]
    fn flash_is_taken_once() {
        let store = SessionStore::new();
        let id = store.create(AccessToken::new("t"), None);
        store.flash(&id, Flash::success("Routine created"));
        assert_eq!(store.take_flash(&id), Some(Flash::success("Routine created")));
        assert_eq!(store.take_flash(&id), None);
    }

    #[test]
    fn draft_updates_are_per_session() {
        let store = SessionStore::new();
        let a = store.create(AccessToken::new("a"), None);
        let b = store.create(AccessToken::new("b"), None);
        store.update_draft(&a, |d| d.select(TaskId::new("1")));

        assert_eq!(store.draft(&a).unwrap().task_id(), Some(&TaskId::new("1")));
        assert!(store.draft(&b).unwrap().task_id().is_none());
        assert!(store.update_draft("missing", |d| d.clear()).is_none());
    }

    #[test]
    fn remove_drops_token() {
        let store = SessionStore::new();
        let id = store.create(AccessToken::new("t"), None);
        assert!(store.credentials(&id).is_some());
        store.remove(&id);
        assert!(store.credentials(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn renew_keeps_unrotated_refresh_token() {
        let store = SessionStore::new();
        let id = store.create(AccessToken::new("old"), Some(RefreshToken::new("r1")));
        let user = opsflow_core::Identity {
            id: opsflow_core::UserId::new(),
            email: None,
        };

        let token = store.renew(
            &id,
            AuthSession {
                access_token: AccessToken::new("new"),
                refresh_token: None,
                expires_in: None,
                user: user.clone(),
            },
        );
        assert_eq!(token, AccessToken::new("new"));
        let (access, refresh) = store.credentials(&id).unwrap();
        assert_eq!(access, AccessToken::new("new"));
        assert_eq!(refresh, Some(RefreshToken::new("r1")));

        store.renew(
            &id,
            AuthSession {
                access_token: AccessToken::new("newer"),
                refresh_token: Some(RefreshToken::new("r2")),
                expires_in: None,
                user,
            },
        );
        assert_eq!(store.credentials(&id).unwrap().1, Some(RefreshToken::new("r2")));
    }

    #[test]
    fn dropped_lock_guard_releases_in_flight_marker() {
        let store = SessionStore::new();
        let id = store.create(AccessToken::new("t"), None);
        store
            .update_draft(&id, |d| {
                d.select(TaskId::new("1"));
                d.begin_lock()
            })
            .unwrap()
            .unwrap();

        drop(InFlightLock::new(&store, &id));
        let draft = store.draft(&id).unwrap();
        assert!(!draft.is_locking());
        assert_eq!(draft.task_id(), Some(&TaskId::new("1")));

        store.update_draft(&id, |d| d.begin_lock()).unwrap().unwrap();
        InFlightLock::new(&store, &id).finish(true);
        let draft = store.draft(&id).unwrap();
        assert!(!draft.is_locking());
        assert!(draft.task_id().is_none());
    }

    #[test]
    fn cookies() {
        assert_eq!(
            session_cookie("abc", false),
            "opsflow_session=abc; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(session_cookie("abc", true).ends_with("; Secure"));
        assert!(clear_cookie().contains("Max-Age=0"));
    }
}
