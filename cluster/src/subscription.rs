use crate::archive::ArchiveReader;
use fixmesh_common::transport::{FragmentHandler, Subscription};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Reader-side facade over the replicated data stream: delivers only
/// fragments at or below the node's commit position, in strict commit
/// order. Fragments above the watermark stay in the log until a later
/// poll observes them committed.
pub struct ClusterSubscription {
    data_subscription: Subscription,
    leader_session_id: Arc<AtomicI32>,
    commit_position: Arc<AtomicU64>,
    current_leader_session: Option<i32>,
    /// Position at the most recent observed leader change; the point to
    /// resync from when an archive replay is needed.
    term_boundary_position: u64,
}

impl ClusterSubscription {
    pub fn new(
        data_subscription: Subscription,
        leader_session_id: Arc<AtomicI32>,
        commit_position: Arc<AtomicU64>,
    ) -> Self {
        Self {
            data_subscription,
            leader_session_id,
            commit_position,
            current_leader_session: None,
            term_boundary_position: 0,
        }
    }

    pub fn commit_position(&self) -> u64 {
        self.commit_position.load(Ordering::SeqCst)
    }

    /// The data-publication session of the current leader, as elected.
    /// The session to resync from after a leader change.
    pub fn leader_session_id(&self) -> Option<i32> {
        match self.leader_session_id.load(Ordering::SeqCst) {
            crate::term_state::NO_LEADER => None,
            session_id => Some(session_id),
        }
    }

    pub fn term_boundary_position(&self) -> u64 {
        self.term_boundary_position
    }

    /// Delivers up to `limit` committed fragments. A session-id change in
    /// the stream marks a leader handover; the boundary position is
    /// recorded so a lagging reader can resync from the archive.
    pub fn poll(&mut self, handler: &mut dyn FragmentHandler, limit: usize) -> usize {
        let commit_position = self.commit_position.load(Ordering::SeqCst);
        let mut current = self.current_leader_session;
        let mut boundary = self.term_boundary_position;

        let mut deliver = |buffer: &[u8], session_id: i32, position: u64| {
            if current != Some(session_id) {
                if let Some(previous) = current {
                    info!(
                        previous_session = previous,
                        new_session = session_id,
                        position,
                        "Leader changed in data stream"
                    );
                }
                current = Some(session_id);
                boundary = position;
            }
            handler.on_fragment(buffer, session_id, position);
        };

        let delivered = self
            .data_subscription
            .poll_bounded(&mut deliver, limit, commit_position);

        self.current_leader_session = current;
        self.term_boundary_position = boundary;
        delivered
    }

    /// Replays committed fragments from the archive, starting at
    /// `from_position`, until the reader runs out. Used after a leader
    /// change when the live stream no longer retains the range this
    /// subscription still needs. Advances the live subscription past
    /// everything replayed.
    pub fn resync(
        &mut self,
        reader: &ArchiveReader,
        session_id: i32,
        from_position: u64,
        handler: &mut dyn FragmentHandler,
    ) -> usize {
        let commit_position = self.commit_position.load(Ordering::SeqCst);
        let mut position = from_position;
        let mut replayed = 0;

        loop {
            let mut next_position = position;
            let mut bounded = |buffer: &[u8], fragment_session: i32, end: u64| {
                if end <= commit_position {
                    handler.on_fragment(buffer, fragment_session, end);
                    next_position = end;
                }
            };
            if !reader.read(session_id, position, &mut bounded) || next_position == position {
                break;
            }
            position = next_position;
            replayed += 1;
        }

        if position > self.data_subscription.position() {
            debug!(position, replayed, "Resynced from archive");
            self.data_subscription.reset_to(position);
        }
        replayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archiver, LogDirectoryDescriptor};
    use fixmesh_common::transport::Media;

    struct Collector {
        fragments: Vec<(Vec<u8>, i32, u64)>,
    }

    impl FragmentHandler for Collector {
        fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64) {
            self.fragments.push((buffer.to_vec(), session_id, position));
        }
    }

    fn collector() -> Collector {
        Collector { fragments: vec![] }
    }

    #[test]
    fn test_delivers_only_committed_fragments() {
        let media = Media::new();
        let publication = media.add_publication(1);
        let commit_position = Arc::new(AtomicU64::new(0));
        let leader_session_id = Arc::new(AtomicI32::new(publication.session_id()));
        let mut subscription = ClusterSubscription::new(
            media.add_subscription(1),
            leader_session_id,
            Arc::clone(&commit_position),
        );

        let first = publication.offer(b"one").unwrap();
        let second = publication.offer(b"two").unwrap();

        let mut seen = collector();
        assert_eq!(subscription.poll(&mut seen, 10), 0);

        commit_position.store(first, Ordering::SeqCst);
        assert_eq!(subscription.poll(&mut seen, 10), 1);
        assert_eq!(seen.fragments[0].0, b"one");

        commit_position.store(second, Ordering::SeqCst);
        assert_eq!(subscription.poll(&mut seen, 10), 1);
        assert_eq!(seen.fragments[1].0, b"two");
    }

    #[test]
    fn test_records_term_boundary_on_session_change() {
        let media = Media::new();
        let old_leader = media.add_publication(1);
        let new_leader = media.add_publication(1);
        let commit_position = Arc::new(AtomicU64::new(u64::MAX >> 1));
        let leader_session_id = Arc::new(AtomicI32::new(new_leader.session_id()));
        let mut subscription = ClusterSubscription::new(
            media.add_subscription(1),
            leader_session_id,
            commit_position,
        );

        old_leader.offer(b"from-old").unwrap();
        let handover = new_leader.offer(b"from-new").unwrap();

        let mut seen = collector();
        assert_eq!(subscription.poll(&mut seen, 10), 2);
        assert_eq!(subscription.term_boundary_position(), handover);
    }

    #[test]
    fn test_resync_replays_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = LogDirectoryDescriptor::new(dir.path());
        let media = Media::new();
        let publication = media.add_publication(1);
        let mut archiver =
            Archiver::new(descriptor.clone(), media.add_subscription(1)).unwrap();

        publication.offer(b"alpha").unwrap();
        let second = publication.offer(b"beta").unwrap();
        archiver.poll(10);

        let commit_position = Arc::new(AtomicU64::new(second));
        let leader_session_id = Arc::new(AtomicI32::new(publication.session_id()));
        let mut subscription = ClusterSubscription::new(
            media.add_subscription(1),
            leader_session_id,
            commit_position,
        );

        let reader = ArchiveReader::new(descriptor, 1);
        let mut seen = collector();
        let replayed = subscription.resync(&reader, publication.session_id(), 0, &mut seen);

        assert_eq!(replayed, 2);
        assert_eq!(seen.fragments[0].0, b"alpha");
        assert_eq!(seen.fragments[1].0, b"beta");

        // The live subscription resumed after the replayed range
        let mut after = collector();
        assert_eq!(subscription.poll(&mut after, 10), 0);
    }
}
