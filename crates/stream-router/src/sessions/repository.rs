//! Concurrent session registry.
//!
//! One read/write lock guards every operation. Fan-out callers take a
//! snapshot of the session handles instead of iterating under the lock, so
//! the lock is never held across an await.

use crate::sessions::session::Session;
use common::types::{SessionId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of sessions keyed by session id, with a secondary user lookup.
#[derive(Default)]
pub struct SessionRepository {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session unconditionally.
    pub async fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);
    }

    /// Insert a session only if its user has no active session yet.
    ///
    /// Returns false (and drops the session) when the user is already
    /// present; one active session per user.
    pub async fn add_new_user(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.values().any(|s| s.user_id == session.user_id) {
            return false;
        }
        sessions.insert(session.id, session);
        true
    }

    pub async fn find_by_id(&self, id: SessionId) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).cloned()
    }

    pub async fn find_by_user_id(&self, user_id: UserId) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.values().find(|s| s.user_id == user_id).cloned()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&id)
    }

    /// Replace an existing session; false if the id is unknown.
    pub async fn update(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            sessions.insert(session.id, session);
            return true;
        }
        false
    }

    pub async fn delete(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id).is_some()
    }

    /// Remove and return the session belonging to a user, if one exists.
    pub async fn delete_by_user(&self, user_id: UserId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let id = sessions
            .values()
            .find(|s| s.user_id == user_id)
            .map(|s| s.id)?;
        sessions.remove(&id)
    }

    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every session handle, for iteration outside the lock.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }
}
