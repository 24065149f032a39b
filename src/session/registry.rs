//! Open-session handles owned by the session manager

use super::conversation::Session;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps session ids to their open [`Session`] handles
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Return the open handle or register the one built by `open`
    pub fn get_or_insert_with<F>(&self, session_id: &str, open: F) -> Arc<Session>
    where
        F: FnOnce() -> Session,
    {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(open()))
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
