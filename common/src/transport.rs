//! In-process transport adapter: an append-only, positioned log per
//! stream, with single-writer publications and independent subscriptions.
//!
//! Positions are byte offsets into the stream log, aligned to
//! [`FRAME_ALIGNMENT`]; the position reported for a frame is the offset
//! *after* it, so a subscription resumed at a reported position sees
//! exactly the following frames.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Frames are padded so that every position is a multiple of this.
pub const FRAME_ALIGNMENT: usize = 32;

const FRAME_HEADER_LENGTH: usize = 16;

const FLAG_CLAIMED: u8 = 0;
const FLAG_COMMITTED: u8 = 1;
const FLAG_ABORTED: u8 = 2;

/// Default per-stream capacity before publications see back-pressure.
pub const DEFAULT_STREAM_CAPACITY: usize = 16 * 1024 * 1024;

/// Stream offset at which the frame that ended at `end_position` began.
/// Exposed so archives can key fragments by their start position.
pub fn frame_start(end_position: u64, payload_len: usize) -> u64 {
    let framed = FRAME_HEADER_LENGTH + payload_len;
    let aligned = (framed + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1);
    end_position - aligned as u64
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("stream {0} is at capacity")]
    Backpressure(i32),

    #[error("claim length {length} exceeds max frame of {max}")]
    FrameTooLarge { length: usize, max: usize },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Receives fragments from [`Subscription::poll`]. The buffer is borrowed
/// for the duration of the call only.
pub trait FragmentHandler {
    fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64);
}

impl<F: FnMut(&[u8], i32, u64)> FragmentHandler for F {
    fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64) {
        self(buffer, session_id, position)
    }
}

struct StreamLog {
    buf: Vec<u8>,
    capacity: usize,
}

impl StreamLog {
    fn aligned_end(&self, payload_len: usize) -> usize {
        let raw = self.buf.len() + FRAME_HEADER_LENGTH + payload_len;
        (raw + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
    }

    /// Reserves a frame, returning (payload offset, end position).
    fn reserve(&mut self, session_id: i32, payload_len: usize) -> TransportResult<(usize, u64)> {
        let end = self.aligned_end(payload_len);
        if end > self.capacity {
            return Err(TransportError::Backpressure(session_id));
        }

        let frame_offset = self.buf.len();
        self.buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
        self.buf.extend_from_slice(&session_id.to_be_bytes());
        self.buf.push(FLAG_CLAIMED);
        self.buf.resize(end, 0);

        Ok((frame_offset + FRAME_HEADER_LENGTH, end as u64))
    }

    fn set_flag(&mut self, payload_offset: usize, flag: u8) {
        self.buf[payload_offset - FRAME_HEADER_LENGTH + 8] = flag;
    }

    fn frame_at(&self, offset: usize) -> Option<(u32, i32, u8)> {
        if offset + FRAME_HEADER_LENGTH > self.buf.len() {
            return None;
        }
        let len = u32::from_be_bytes(self.buf[offset..offset + 4].try_into().unwrap());
        let session_id = i32::from_be_bytes(self.buf[offset + 4..offset + 8].try_into().unwrap());
        let flag = self.buf[offset + 8];
        Some((len, session_id, flag))
    }
}

struct Stream {
    stream_id: i32,
    log: Mutex<StreamLog>,
}

/// Factory for publications and subscriptions, one per process (or one
/// per test cluster). Plays the part of the media driver: every
/// publication gets a fresh transport session id.
pub struct Media {
    streams: Mutex<HashMap<i32, Arc<Stream>>>,
    next_session_id: AtomicI32,
}

impl Media {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(HashMap::new()),
            next_session_id: AtomicI32::new(1),
        })
    }

    fn stream(&self, stream_id: i32) -> Arc<Stream> {
        let mut streams = self.streams.lock();
        Arc::clone(streams.entry(stream_id).or_insert_with(|| {
            Arc::new(Stream {
                stream_id,
                log: Mutex::new(StreamLog {
                    buf: Vec::new(),
                    capacity: DEFAULT_STREAM_CAPACITY,
                }),
            })
        }))
    }

    /// Adds an exclusive publication onto `stream_id`.
    pub fn add_publication(&self, stream_id: i32) -> Publication {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        debug!(stream_id, session_id, "Added publication");
        Publication {
            stream: self.stream(stream_id),
            session_id,
        }
    }

    /// Adds a subscription starting at the beginning of `stream_id`.
    pub fn add_subscription(&self, stream_id: i32) -> Subscription {
        Subscription {
            stream: self.stream(stream_id),
            offset: 0,
        }
    }
}

/// Single-writer producer onto one stream.
pub struct Publication {
    stream: Arc<Stream>,
    session_id: i32,
}

impl Publication {
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream.stream_id
    }

    /// Current end position of the stream log.
    pub fn position(&self) -> u64 {
        self.stream.log.lock().buf.len() as u64
    }

    /// Claims `length` bytes in the log. The claim must be committed or
    /// aborted; dropping an unresolved claim aborts it.
    pub fn try_claim(&self, length: usize) -> TransportResult<BufferClaim> {
        let mut log = self.stream.log.lock();
        let (payload_offset, position) = log.reserve(self.session_id, length)?;
        Ok(BufferClaim {
            stream: Arc::clone(&self.stream),
            payload_offset,
            scratch: vec![0u8; length],
            position,
            resolved: false,
        })
    }

    /// Appends `payload` as one committed frame and returns the position
    /// after it.
    pub fn offer(&self, payload: &[u8]) -> TransportResult<u64> {
        let mut log = self.stream.log.lock();
        let (payload_offset, position) = log.reserve(self.session_id, payload.len())?;
        log.buf[payload_offset..payload_offset + payload.len()].copy_from_slice(payload);
        log.set_flag(payload_offset, FLAG_COMMITTED);
        Ok(position)
    }
}

/// A reserved slice of the stream log. Fill [`BufferClaim::buffer_mut`]
/// and call [`BufferClaim::commit`]; any other exit path aborts the
/// frame, which readers skip.
pub struct BufferClaim {
    stream: Arc<Stream>,
    payload_offset: usize,
    scratch: Vec<u8>,
    position: u64,
    resolved: bool,
}

impl BufferClaim {
    /// Position after this frame once committed.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    pub fn commit(mut self) {
        let mut log = self.stream.log.lock();
        let end = self.payload_offset + self.scratch.len();
        log.buf[self.payload_offset..end].copy_from_slice(&self.scratch);
        log.set_flag(self.payload_offset, FLAG_COMMITTED);
        self.resolved = true;
    }

    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        let mut log = self.stream.log.lock();
        log.set_flag(self.payload_offset, FLAG_ABORTED);
        self.resolved = true;
    }
}

impl Drop for BufferClaim {
    fn drop(&mut self) {
        if !self.resolved {
            self.abort_in_place();
        }
    }
}

/// Independent reader over one stream. Each subscription tracks its own
/// offset; delivery stops at the first unresolved claim so that frames
/// are observed strictly in publication order.
pub struct Subscription {
    stream: Arc<Stream>,
    offset: usize,
}

impl Subscription {
    pub fn stream_id(&self) -> i32 {
        self.stream.stream_id
    }

    /// Offset of the next frame this subscription will deliver.
    pub fn position(&self) -> u64 {
        self.offset as u64
    }

    /// Rewinds (or fast-forwards) to `position`, which must be a frame
    /// boundary previously reported by the transport.
    pub fn reset_to(&mut self, position: u64) {
        self.offset = position as usize;
    }

    /// Delivers up to `limit` committed fragments to `handler`. Returns
    /// the number delivered.
    pub fn poll(&mut self, handler: &mut dyn FragmentHandler, limit: usize) -> usize {
        self.poll_bounded(handler, limit, u64::MAX)
    }

    /// Like [`Subscription::poll`], but never delivers a fragment whose
    /// end position exceeds `max_position`.
    pub fn poll_bounded(
        &mut self,
        handler: &mut dyn FragmentHandler,
        limit: usize,
        max_position: u64,
    ) -> usize {
        // Frames are copied out under the lock and delivered after it is
        // released, so handlers may publish on other streams.
        let mut batch: Vec<(Bytes, i32, u64)> = Vec::new();
        {
            let log = self.stream.log.lock();
            while batch.len() < limit {
                let Some((len, session_id, flag)) = log.frame_at(self.offset) else {
                    break;
                };
                let payload_offset = self.offset + FRAME_HEADER_LENGTH;
                let raw_end = payload_offset + len as usize;
                let end = (raw_end + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1);

                if end as u64 > max_position {
                    break;
                }

                match flag {
                    FLAG_CLAIMED => break,
                    FLAG_ABORTED => {
                        self.offset = end;
                    }
                    _ => {
                        batch.push((
                            Bytes::copy_from_slice(&log.buf[payload_offset..raw_end]),
                            session_id,
                            end as u64,
                        ));
                        self.offset = end;
                    }
                }
            }
        }

        for (payload, session_id, position) in &batch {
            handler.on_fragment(payload, *session_id, *position);
        }
        batch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collector {
        fragments: Vec<(Vec<u8>, i32, u64)>,
    }

    impl FragmentHandler for Collector {
        fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64) {
            self.fragments.push((buffer.to_vec(), session_id, position));
        }
    }

    #[test]
    fn test_offer_and_poll() {
        let media = Media::new();
        let publication = media.add_publication(7);
        let mut subscription = media.add_subscription(7);

        let position = publication.offer(b"hello").unwrap();
        assert_eq!(position % FRAME_ALIGNMENT as u64, 0);

        let mut collector = Collector { fragments: vec![] };
        assert_eq!(subscription.poll(&mut collector, 10), 1);
        let (payload, session_id, end) = &collector.fragments[0];
        assert_eq!(payload, b"hello");
        assert_eq!(*session_id, publication.session_id());
        assert_eq!(*end, position);
    }

    #[test]
    fn test_unresolved_claim_blocks_later_frames() {
        let media = Media::new();
        let publication = media.add_publication(7);
        let mut subscription = media.add_subscription(7);

        let claim = publication.try_claim(4).unwrap();
        publication.offer(b"after").unwrap();

        let mut collector = Collector { fragments: vec![] };
        assert_eq!(subscription.poll(&mut collector, 10), 0);

        let mut claim = claim;
        claim.buffer_mut().copy_from_slice(b"data");
        claim.commit();

        assert_eq!(subscription.poll(&mut collector, 10), 2);
        assert_eq!(collector.fragments[0].0, b"data");
        assert_eq!(collector.fragments[1].0, b"after");
    }

    #[test]
    fn test_dropped_claim_is_skipped() {
        let media = Media::new();
        let publication = media.add_publication(7);
        let mut subscription = media.add_subscription(7);

        drop(publication.try_claim(8).unwrap());
        publication.offer(b"live").unwrap();

        let mut collector = Collector { fragments: vec![] };
        assert_eq!(subscription.poll(&mut collector, 10), 1);
        assert_eq!(collector.fragments[0].0, b"live");
    }

    #[test]
    fn test_reset_to_replays_from_boundary() {
        let media = Media::new();
        let publication = media.add_publication(7);
        let mut subscription = media.add_subscription(7);

        let first = publication.offer(b"one").unwrap();
        publication.offer(b"two").unwrap();

        let mut collector = Collector { fragments: vec![] };
        subscription.poll(&mut collector, 10);
        assert_eq!(collector.fragments.len(), 2);

        subscription.reset_to(first);
        let mut collector = Collector { fragments: vec![] };
        subscription.poll(&mut collector, 10);
        assert_eq!(collector.fragments.len(), 1);
        assert_eq!(collector.fragments[0].0, b"two");
    }

    #[test]
    fn test_fragment_limit_bounds_delivery() {
        let media = Media::new();
        let publication = media.add_publication(7);
        let mut subscription = media.add_subscription(7);

        for _ in 0..5 {
            publication.offer(b"x").unwrap();
        }

        let mut collector = Collector { fragments: vec![] };
        assert_eq!(subscription.poll(&mut collector, 2), 2);
        assert_eq!(subscription.poll(&mut collector, 2), 2);
        assert_eq!(subscription.poll(&mut collector, 2), 1);
    }

    #[test]
    fn test_independent_publications_have_distinct_session_ids() {
        let media = Media::new();
        let a = media.add_publication(1);
        let b = media.add_publication(1);
        assert_ne!(a.session_id(), b.session_id());
    }
}
