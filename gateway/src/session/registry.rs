use crate::session::key::CompositeKey;
use dashmap::DashMap;
use fixmesh_common::types::fix::{ConnectionId, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("counterparty {0} already has an active session")]
    AlreadyActive(String),
}

/// Maps composite keys to cluster-unique session ids and tracks which
/// keys currently have a live connection.
///
/// Session ids are stable across reconnects: the same counterparty gets
/// the same id back. Ids carry the node id in the high bits so that two
/// nodes never allocate the same id.
pub struct SessionRegistry {
    ids: DashMap<CompositeKey, SessionId>,
    active: DashMap<CompositeKey, ConnectionId>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(node_id: u16) -> Self {
        Self {
            ids: DashMap::new(),
            active: DashMap::new(),
            next_id: AtomicU64::new(((node_id as u64) << 48) | 1),
        }
    }

    /// Resolves the session id for `key`, allocating one on first logon.
    pub fn assign_id(&self, key: &CompositeKey) -> SessionId {
        if let Some(existing) = self.ids.get(key) {
            return *existing;
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.ids.insert(key.clone(), id);
        info!(session_id = %id, key = %key, "Allocated session id");
        id
    }

    /// Claims `key` for `connection_id`. Refused while another connection
    /// is live for the same key.
    pub fn try_activate(
        &self,
        key: &CompositeKey,
        connection_id: ConnectionId,
    ) -> Result<SessionId, RegistryError> {
        if let Some(active) = self.active.get(key) {
            if *active != connection_id {
                return Err(RegistryError::AlreadyActive(key.to_string()));
            }
        }
        self.active.insert(key.clone(), connection_id);
        Ok(self.assign_id(key))
    }

    /// Releases `key` after its connection disconnected.
    pub fn deactivate(&self, key: &CompositeKey) {
        self.active.remove(key);
    }

    pub fn active_session_count(&self) -> usize {
        self.active.len()
    }
}
