use fixmesh_common::transport::{BufferClaim, Publication, TransportError};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublicationError {
    #[error("this node is not the leader")]
    NotLeader,

    #[error(transparent)]
    Backpressure(#[from] TransportError),
}

/// Writer-side facade over the replicated data stream. Claims succeed
/// only while this node's data publication is the one elected leader's;
/// anyone else gets a back-pressure sentinel and must retry after
/// redirecting.
pub struct ClusterPublication {
    data_publication: Arc<Publication>,
    leader_session_id: Arc<AtomicI32>,
}

impl ClusterPublication {
    pub fn new(data_publication: Arc<Publication>, leader_session_id: Arc<AtomicI32>) -> Self {
        Self {
            data_publication,
            leader_session_id,
        }
    }

    pub fn session_id(&self) -> i32 {
        self.data_publication.session_id()
    }

    fn is_leader(&self) -> bool {
        self.leader_session_id.load(Ordering::SeqCst) == self.data_publication.session_id()
    }

    /// Claims `length` bytes in the replicated log. The returned claim
    /// must be committed (or dropped, which aborts); the claim position
    /// is the leader's log position after commit.
    pub fn try_claim(&self, length: usize) -> Result<BufferClaim, PublicationError> {
        if !self.is_leader() {
            return Err(PublicationError::NotLeader);
        }
        Ok(self.data_publication.try_claim(length)?)
    }

    /// Claim-and-commit convenience for small payloads.
    pub fn offer(&self, payload: &[u8]) -> Result<u64, PublicationError> {
        if !self.is_leader() {
            return Err(PublicationError::NotLeader);
        }
        Ok(self.data_publication.offer(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixmesh_common::transport::Media;

    #[test]
    fn test_only_leader_can_claim() {
        let media = Media::new();
        let data_publication = Arc::new(media.add_publication(1));
        let leader_session_id = Arc::new(AtomicI32::new(-1));
        let publication =
            ClusterPublication::new(Arc::clone(&data_publication), Arc::clone(&leader_session_id));

        assert!(matches!(
            publication.offer(b"payload"),
            Err(PublicationError::NotLeader)
        ));

        leader_session_id.store(data_publication.session_id(), Ordering::SeqCst);
        let position = publication.offer(b"payload").unwrap();
        assert!(position > 0);
    }

    #[test]
    fn test_claim_commit_is_visible() {
        let media = Media::new();
        let data_publication = Arc::new(media.add_publication(1));
        let leader_session_id = Arc::new(AtomicI32::new(data_publication.session_id()));
        let publication = ClusterPublication::new(data_publication, leader_session_id);

        let mut claim = publication.try_claim(4).unwrap();
        claim.buffer_mut().copy_from_slice(b"data");
        let position = claim.position();
        claim.commit();

        let mut subscription = media.add_subscription(1);
        let mut seen = Vec::new();
        let mut collect = |buffer: &[u8], _session: i32, end: u64| {
            seen.push((buffer.to_vec(), end));
        };
        subscription.poll(&mut collect, 10);
        assert_eq!(seen, vec![(b"data".to_vec(), position)]);
    }
}
