use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel for "no leader known".
pub const NO_LEADER: i32 = -1;

/// Replication state shared across role transitions. The role agent is
/// the single writer; the leader session id and commit position are held
/// in atomics because cluster publications and subscriptions on other
/// threads read them.
pub struct TermState {
    leader_session_id: Arc<AtomicI32>,
    commit_position: Arc<AtomicU64>,
    /// Monotonically increasing across elections.
    pub leadership_term_id: u64,
    /// Highest contiguous log position known locally.
    pub position: u64,
}

impl Default for TermState {
    fn default() -> Self {
        Self::new()
    }
}

impl TermState {
    pub fn new() -> Self {
        Self {
            leader_session_id: Arc::new(AtomicI32::new(NO_LEADER)),
            commit_position: Arc::new(AtomicU64::new(0)),
            leadership_term_id: 0,
            position: 0,
        }
    }

    pub fn leader_session_id(&self) -> Option<i32> {
        match self.leader_session_id.load(Ordering::SeqCst) {
            NO_LEADER => None,
            session_id => Some(session_id),
        }
    }

    pub fn set_leader_session_id(&self, session_id: Option<i32>) {
        self.leader_session_id
            .store(session_id.unwrap_or(NO_LEADER), Ordering::SeqCst);
    }

    pub fn commit_position(&self) -> u64 {
        self.commit_position.load(Ordering::SeqCst)
    }

    /// Advances the commit position. Never moves backwards.
    pub fn advance_commit_position(&self, position: u64) -> bool {
        let current = self.commit_position.load(Ordering::SeqCst);
        if position > current {
            self.commit_position.store(position, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Handle for readers on other threads (cluster publications).
    pub fn leader_session_id_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.leader_session_id)
    }

    /// Handle for readers on other threads (cluster subscriptions).
    pub fn commit_position_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.commit_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_session_id_roundtrip() {
        let state = TermState::new();
        assert_eq!(state.leader_session_id(), None);

        state.set_leader_session_id(Some(42));
        assert_eq!(state.leader_session_id(), Some(42));

        state.set_leader_session_id(None);
        assert_eq!(state.leader_session_id(), None);
    }

    #[test]
    fn test_commit_position_is_monotonic() {
        let state = TermState::new();
        assert!(state.advance_commit_position(100));
        assert!(!state.advance_commit_position(50));
        assert!(!state.advance_commit_position(100));
        assert_eq!(state.commit_position(), 100);
    }

    #[test]
    fn test_handles_share_state() {
        let state = TermState::new();
        let handle = state.commit_position_handle();
        state.advance_commit_position(64);
        assert_eq!(handle.load(Ordering::SeqCst), 64);
    }
}
