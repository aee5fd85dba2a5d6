//! Owner of every live session.

use super::{Session, SessionConfig};
use scout_core::SessionId;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session.
    pub fn add(&self, config: SessionConfig) -> Arc<Session> {
        let session = Arc::new(Session::new(config));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id(), session.clone());
        tracing::debug!(session = %session.id(), "session created");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove and cancel a session. Returns it if it existed.
    pub fn cancel(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(session) = &removed {
            session.cancel();
            tracing::debug!(session = %id, "session cancelled");
        }
        removed
    }

    /// Cancel and remove every session.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in &drained {
            session.cancel();
        }
        tracing::debug!(count = drained.len(), "sessions shut down");
    }

    /// Ids of every live session.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
