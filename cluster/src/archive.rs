use fixmesh_common::transport::{frame_start, FragmentHandler, Subscription};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, trace};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Layout of one node's archive directory: a flat directory with one
/// segment file per (stream id, transport session id).
#[derive(Debug, Clone)]
pub struct LogDirectoryDescriptor {
    base: PathBuf,
}

impl LogDirectoryDescriptor {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn segment_file(&self, stream_id: i32, session_id: i32) -> PathBuf {
        self.base
            .join(format!("segment-{}-{}.log", stream_id, session_id))
    }
}

const RECORD_HEADER_LENGTH: usize = 20;

struct SegmentWriter {
    file: File,
    archived_position: u64,
    dirty: bool,
}

/// Durable sink for a data stream: drains a transport subscription and
/// persists fragments keyed by (session id, position). Fragments are
/// synced to disk within the poll that read them, before the owning role
/// reports its position, so an acknowledged position is always
/// recoverable.
pub struct Archiver {
    descriptor: LogDirectoryDescriptor,
    stream_id: i32,
    subscription: Subscription,
    segments: HashMap<i32, SegmentWriter>,
    position: u64,
}

impl Archiver {
    pub fn new(
        descriptor: LogDirectoryDescriptor,
        subscription: Subscription,
    ) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(descriptor.base())?;
        let stream_id = subscription.stream_id();
        Ok(Self {
            descriptor,
            stream_id,
            subscription,
            segments: HashMap::new(),
            position: 0,
        })
    }

    /// Stream position after the last archived fragment; the position a
    /// follower may safely acknowledge.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn archived_position(&self, session_id: i32) -> u64 {
        self.segments
            .get(&session_id)
            .map(|segment| segment.archived_position)
            .unwrap_or(0)
    }

    /// Rewinds to `position` to re-follow the stream from an earlier
    /// point. Replayed fragments are re-appended; reads pick the first
    /// matching record, so replays are harmless.
    pub fn reset_to(&mut self, position: u64) {
        self.subscription.reset_to(position);
        self.position = position;
    }

    /// Drains up to `limit` fragments into the archive. Returns the
    /// number archived; the batch is synced before this returns.
    pub fn poll(&mut self, limit: usize) -> usize {
        let mut batch: Vec<(Vec<u8>, i32, u64)> = Vec::new();
        let mut collect = |buffer: &[u8], session_id: i32, position: u64| {
            batch.push((buffer.to_vec(), session_id, position));
        };
        self.subscription.poll(&mut collect, limit);

        let archived = batch.len();
        for (payload, session_id, end_position) in batch {
            if let Err(e) = self.append(session_id, end_position, &payload) {
                error!(session_id, position = end_position, error = %e, "Failed to archive fragment");
                return 0;
            }
        }
        if let Err(e) = self.sync() {
            error!(error = %e, "Failed to sync archive");
            return 0;
        }
        archived
    }

    fn append(
        &mut self,
        session_id: i32,
        end_position: u64,
        payload: &[u8],
    ) -> Result<(), ArchiveError> {
        let segment = match self.segments.entry(session_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let path = self.descriptor.segment_file(self.stream_id, session_id);
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                entry.insert(SegmentWriter {
                    file,
                    archived_position: 0,
                    dirty: false,
                })
            }
        };

        let start_position = frame_start(end_position, payload.len());
        let mut record = Vec::with_capacity(RECORD_HEADER_LENGTH + payload.len());
        record.extend_from_slice(&start_position.to_be_bytes());
        record.extend_from_slice(&end_position.to_be_bytes());
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        record.extend_from_slice(payload);
        segment.file.write_all(&record)?;
        segment.archived_position = end_position;
        segment.dirty = true;

        self.position = end_position;
        trace!(session_id, position = end_position, length = payload.len(), "Archived fragment");
        Ok(())
    }

    fn sync(&mut self) -> Result<(), ArchiveError> {
        for segment in self.segments.values_mut() {
            if segment.dirty {
                segment.file.sync_data()?;
                segment.dirty = false;
            }
        }
        Ok(())
    }
}

/// Read-side of the archive. Lock-free against the writer: readers only
/// depend on fully written record lengths, never on shared state.
pub struct ArchiveReader {
    descriptor: LogDirectoryDescriptor,
    stream_id: i32,
}

impl ArchiveReader {
    pub fn new(descriptor: LogDirectoryDescriptor, stream_id: i32) -> Self {
        Self {
            descriptor,
            stream_id,
        }
    }

    /// Delivers the fragment beginning at `position` for `session_id`.
    /// Returns false when no such fragment has been archived. Re-reads
    /// are idempotent and partial trailing records are never exposed.
    pub fn read(
        &self,
        session_id: i32,
        position: u64,
        handler: &mut dyn FragmentHandler,
    ) -> bool {
        let path = self.descriptor.segment_file(self.stream_id, session_id);
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut contents = Vec::new();
        if file.read_to_end(&mut contents).is_err() {
            return false;
        }

        let mut offset = 0;
        while offset + RECORD_HEADER_LENGTH <= contents.len() {
            let start = u64::from_be_bytes(contents[offset..offset + 8].try_into().unwrap());
            let end = u64::from_be_bytes(contents[offset + 8..offset + 16].try_into().unwrap());
            let length =
                u32::from_be_bytes(contents[offset + 16..offset + 20].try_into().unwrap()) as usize;
            let payload_start = offset + RECORD_HEADER_LENGTH;
            if payload_start + length > contents.len() {
                // Partial trailing record: not yet durable, never exposed
                return false;
            }
            if start == position {
                handler.on_fragment(
                    &contents[payload_start..payload_start + length],
                    session_id,
                    end,
                );
                return true;
            }
            offset = payload_start + length;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixmesh_common::transport::Media;

    struct Collector {
        fragments: Vec<(Vec<u8>, i32, u64)>,
    }

    impl FragmentHandler for Collector {
        fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64) {
            self.fragments.push((buffer.to_vec(), session_id, position));
        }
    }

    #[test]
    fn test_archive_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = LogDirectoryDescriptor::new(dir.path());
        let media = Media::new();
        let publication = media.add_publication(1);
        let mut archiver =
            Archiver::new(descriptor.clone(), media.add_subscription(1)).unwrap();

        let end = publication.offer(b"fragment-one").unwrap();
        assert_eq!(archiver.poll(10), 1);
        assert_eq!(archiver.position(), end);
        assert_eq!(archiver.archived_position(publication.session_id()), end);

        let reader = ArchiveReader::new(descriptor, 1);
        let start = frame_start(end, b"fragment-one".len());
        let mut collector = Collector { fragments: vec![] };
        assert!(reader.read(publication.session_id(), start, &mut collector));
        assert_eq!(collector.fragments.len(), 1);
        assert_eq!(collector.fragments[0].0, b"fragment-one");
        assert_eq!(collector.fragments[0].2, end);
    }

    #[test]
    fn test_read_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = LogDirectoryDescriptor::new(dir.path());
        let media = Media::new();
        let publication = media.add_publication(1);
        let mut archiver =
            Archiver::new(descriptor.clone(), media.add_subscription(1)).unwrap();

        let end = publication.offer(b"payload").unwrap();
        archiver.poll(10);

        let reader = ArchiveReader::new(descriptor, 1);
        let start = frame_start(end, b"payload".len());
        for _ in 0..3 {
            let mut collector = Collector { fragments: vec![] };
            assert!(reader.read(publication.session_id(), start, &mut collector));
            assert_eq!(collector.fragments[0].0, b"payload");
        }
    }

    #[test]
    fn test_missing_fragment_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = LogDirectoryDescriptor::new(dir.path());
        let reader = ArchiveReader::new(descriptor, 1);
        let mut collector = Collector { fragments: vec![] };
        assert!(!reader.read(99, 0, &mut collector));
        assert!(collector.fragments.is_empty());
    }

    #[test]
    fn test_reset_to_replays_without_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = LogDirectoryDescriptor::new(dir.path());
        let media = Media::new();
        let publication = media.add_publication(1);
        let mut archiver =
            Archiver::new(descriptor.clone(), media.add_subscription(1)).unwrap();

        let first = publication.offer(b"one").unwrap();
        let second = publication.offer(b"two").unwrap();
        archiver.poll(10);
        assert_eq!(archiver.position(), second);

        archiver.reset_to(first);
        assert_eq!(archiver.position(), first);
        archiver.poll(10);
        assert_eq!(archiver.position(), second);

        // The replayed record does not break reads
        let reader = ArchiveReader::new(descriptor, 1);
        let mut collector = Collector { fragments: vec![] };
        assert!(reader.read(
            publication.session_id(),
            frame_start(second, b"two".len()),
            &mut collector
        ));
        assert_eq!(collector.fragments[0].0, b"two");
    }
}
