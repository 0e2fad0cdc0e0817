//! Session store with one lock per session.
//!
//! The map itself sits behind an `RwLock`; each session behind its own
//! `Mutex`. Operations on the same session serialize, operations on
//! different sessions only share the brief map read lock.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::{error::SessionError, session::Session};

type SessionHandle = Arc<Mutex<Session>>;

/// Keyed container from session id to [`Session`].
///
/// Clone shares the same underlying storage. Owned by the client and
/// injected into it; there is no global instance.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<SessionStoreInner>>,
}

#[derive(Default)]
struct SessionStoreInner {
    /// Session state indexed by session id.
    sessions: HashMap<String, SessionHandle>,
    /// Current session per peer.
    peers: HashMap<String, String>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session and make it the current one for its peer.
    ///
    /// Replaces any session with the same id.
    pub fn insert(&self, session: Session) {
        let mut inner = self.inner.write().expect("SessionStore lock poisoned");
        inner.peers.insert(session.peer_id().to_string(), session.id().to_string());
        inner.sessions.insert(session.id().to_string(), Arc::new(Mutex::new(session)));
    }

    /// Store a session only if its id is not taken yet.
    ///
    /// The check and the insert happen under one write lock, so of two racing
    /// calls with the same id exactly one succeeds.
    pub fn insert_new(&self, session: Session) -> Result<(), SessionError> {
        let mut inner = self.inner.write().expect("SessionStore lock poisoned");
        if inner.sessions.contains_key(session.id()) {
            return Err(SessionError::SessionExists { session_id: session.id().to_string() });
        }
        inner.peers.insert(session.peer_id().to_string(), session.id().to_string());
        inner.sessions.insert(session.id().to_string(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    /// Whether a session with this id exists.
    pub fn contains(&self, session_id: &str) -> bool {
        let inner = self.inner.read().expect("SessionStore lock poisoned");
        inner.sessions.contains_key(session_id)
    }

    /// Current session id for a peer.
    pub fn session_for_peer(&self, peer_id: &str) -> Option<String> {
        let inner = self.inner.read().expect("SessionStore lock poisoned");
        inner.peers.get(peer_id).cloned()
    }

    /// Copy of a session's state, taken under its lock.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let handle = self.handle(session_id)?;
        let session = handle.lock().expect("Session lock poisoned");
        Some(session.clone())
    }

    /// Evict a session. Returns the evicted state.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let mut inner = self.inner.write().expect("SessionStore lock poisoned");
        let handle = inner.sessions.remove(session_id)?;
        inner.peers.retain(|_, id| id.as_str() != session_id);
        drop(inner);

        let session = handle.lock().expect("Session lock poisoned");
        Some(session.clone())
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.inner.read().expect("SessionStore lock poisoned").sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against a working copy of the session and commit it only if
    /// `f` succeeds.
    ///
    /// The session's lock is held for the whole call, so a check-then-mutate
    /// sequence inside `f` cannot interleave with another call on the same
    /// session. If `f` fails, the stored session is left exactly as it was.
    pub fn transact<T, E, F>(&self, session_id: &str, f: F) -> Result<T, E>
    where
        E: From<SessionError>,
        F: FnOnce(&mut Session) -> Result<T, E>,
    {
        let handle = self
            .handle(session_id)
            .ok_or_else(|| SessionError::SessionNotFound { session_id: session_id.to_string() })?;
        Self::run(&handle, f)
    }

    /// Like [`transact`](Self::transact), but falls back to the current
    /// session of `peer_id` when `session_id` is unknown.
    pub(crate) fn transact_or_peer<T, E, F>(
        &self,
        session_id: &str,
        peer_id: &str,
        f: F,
    ) -> Result<T, E>
    where
        E: From<SessionError>,
        F: FnOnce(&mut Session) -> Result<T, E>,
    {
        let handle = self
            .handle(session_id)
            .or_else(|| self.session_for_peer(peer_id).and_then(|id| self.handle(&id)))
            .ok_or_else(|| SessionError::SessionNotFound { session_id: session_id.to_string() })?;
        Self::run(&handle, f)
    }

    /// Consistent copy of every session, each taken under its own lock.
    pub(crate) fn entries(&self) -> (HashMap<String, String>, Vec<Session>) {
        let inner = self.inner.read().expect("SessionStore lock poisoned");
        let sessions = inner
            .sessions
            .values()
            .map(|handle| handle.lock().expect("Session lock poisoned").clone())
            .collect();
        (inner.peers.clone(), sessions)
    }

    /// Replace the peer index wholesale (snapshot restore).
    pub(crate) fn set_peers(&self, peers: HashMap<String, String>) {
        let mut inner = self.inner.write().expect("SessionStore lock poisoned");
        inner.peers = peers;
    }

    fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().expect("SessionStore lock poisoned");
        inner.sessions.get(session_id).cloned()
    }

    fn run<T, E, F>(handle: &SessionHandle, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
    {
        let mut guard = handle.lock().expect("Session lock poisoned");
        let mut working = guard.clone();
        let value = f(&mut working)?;
        *guard = working;
        Ok(value)
    }
}
