//! Shared session registry.
//!
//! Maps each [`OperationKey`] to its [`Session`]. Every caller that
//! subscribes with the same document and variables gets the same session.

use crate::key::OperationKey;
use crate::session::{Session, SessionState};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A cheaply cloneable handle to a set of sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<OperationKey, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `key`, creating it with `init` when absent.
    pub fn get_or_create<F>(&self, key: OperationKey, init: F) -> Arc<Session>
    where
        F: FnOnce() -> Arc<Session>,
    {
        let entry = self.sessions.entry(key).or_insert_with(|| {
            let session = init();
            debug!(key = %session.key(), "created subscription session");
            session
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &OperationKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes a session. Handles still holding it keep working.
    pub fn remove(&self, key: &OperationKey) -> Option<Arc<Session>> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Drops closed sessions that no handle refers to. Returns how many
    /// were removed.
    pub fn prune_closed(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            !(session.state() == SessionState::Closed && Arc::strong_count(session) == 1)
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "pruned closed subscription sessions");
        }
        removed
    }
}
