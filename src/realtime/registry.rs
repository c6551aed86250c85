//! # Session Registry
//!
//! Process-wide table of active realtime sessions, used only for lifecycle
//! bookkeeping: insert on accept, remove on close. Sessions are exclusively
//! owned by their own forwarding loops; nothing looks a session up here to
//! mutate it.

use crate::realtime::session::RealtimeSession;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Insert/remove-only table of live sessions, keyed by generated session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<RealtimeSession>>>,
}

/// Snapshot of the registry for the health endpoints.
#[derive(Debug)]
pub struct RegistrySummary {
    pub active_sessions: usize,
    pub state_counts: HashMap<&'static str, usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session on client accept.
    pub fn insert(&self, session: Arc<RealtimeSession>) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(session.id.clone(), session);
    }

    /// Deregister a session on close. Returns whether an entry existed, so a
    /// duplicate close is observable as a no-op.
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read().unwrap();
        let mut state_counts: HashMap<&'static str, usize> = HashMap::new();
        for session in sessions.values() {
            *state_counts.entry(session.state().as_str()).or_insert(0) += 1;
        }
        RegistrySummary {
            active_sessions: sessions.len(),
            state_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::session::RelayState;

    #[test]
    fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        let session = Arc::new(RealtimeSession::new());
        let id = session.id.clone();

        registry.insert(session);
        assert_eq!(registry.active_count(), 1);

        assert!(registry.remove(&id));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_duplicate_remove_is_a_noop() {
        let registry = SessionRegistry::new();
        let session = Arc::new(RealtimeSession::new());
        let id = session.id.clone();
        registry.insert(session);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(!registry.remove("no-such-session"));
    }

    #[test]
    fn test_summary_counts_states() {
        let registry = SessionRegistry::new();
        let active = Arc::new(RealtimeSession::new());
        active.advance(RelayState::ConnectingUpstream);
        active.advance(RelayState::Negotiating);
        active.advance(RelayState::Active);
        registry.insert(active);
        registry.insert(Arc::new(RealtimeSession::new()));

        let summary = registry.summary();
        assert_eq!(summary.active_sessions, 2);
        assert_eq!(summary.state_counts.get("active"), Some(&1));
        assert_eq!(summary.state_counts.get("init"), Some(&1));
    }
}
