use crate::codec::CodecResult;
use crate::encoder::Encoder;
use crate::network::wire;
use crate::session::key::CompositeKey;
use bytes::BytesMut;
use fixmesh_common::clock::EpochClock;
use fixmesh_common::transport::Publication;
use fixmesh_common::types::fix::{ConnectionId, RejectReason, SessionId};
use std::sync::Arc;
use tracing::error;

/// Sink for the session state machine's outbound messages. Calls are made
/// in the exact order the session decides them; implementations must not
/// reorder.
pub trait SessionProxy: Send {
    /// Installs the session identity once it is known. Called before the
    /// first addressed message is emitted.
    fn setup(&mut self, session_id: SessionId, key: &CompositeKey) {
        let _ = (session_id, key);
    }

    fn logon(&mut self, heart_bt_int_s: i32, msg_seq_num: u32);
    fn logout(&mut self, msg_seq_num: u32);
    fn low_sequence_number_logout(&mut self, msg_seq_num: u32, expected: u32, received: u32);
    fn incorrect_begin_string_logout(&mut self, msg_seq_num: u32);
    fn negative_heartbeat_logout(&mut self, msg_seq_num: u32);
    fn reject(
        &mut self,
        msg_seq_num: u32,
        ref_seq_num: u32,
        ref_tag_id: Option<u32>,
        msg_type: &[u8],
        reason: RejectReason,
    );
    fn heartbeat(&mut self, test_req_id: Option<&[u8]>, msg_seq_num: u32);
    fn test_request(&mut self, msg_seq_num: u32, test_req_id: &[u8]);
    fn sequence_reset(&mut self, msg_seq_num: u32, new_seq_no: u32);
    fn resend_request(&mut self, msg_seq_num: u32, begin_seq_no: u32, end_seq_no: u32);
    fn received_message_without_sequence_number(&mut self, msg_seq_num: u32);
    fn request_disconnect(&mut self, connection_id: ConnectionId);
}

/// Production proxy: encodes each message and offers it onto the outbound
/// transport stream, prefixed with the owning connection id.
pub struct EncodingSessionProxy {
    encoder: Encoder,
    publication: Arc<Publication>,
    connection_id: ConnectionId,
    clock: Arc<dyn EpochClock>,
}

impl EncodingSessionProxy {
    pub fn new(
        connection_id: ConnectionId,
        begin_string: &[u8],
        encoder_buffer_size: usize,
        publication: Arc<Publication>,
        clock: Arc<dyn EpochClock>,
    ) -> Self {
        Self {
            encoder: Encoder::new(begin_string, encoder_buffer_size),
            publication,
            connection_id,
            clock,
        }
    }

    fn now(&self) -> u64 {
        self.clock.time()
    }

    fn send(&self, message: CodecResult<BytesMut>) {
        match message {
            Ok(bytes) => {
                let frame = wire::encode_frame(self.connection_id, wire::KIND_DATA, &bytes);
                if let Err(e) = self.publication.offer(&frame) {
                    error!(connection_id = %self.connection_id, error = %e, "Failed to offer outbound message");
                }
            }
            Err(e) => {
                error!(connection_id = %self.connection_id, error = %e, "Failed to encode outbound message");
            }
        }
    }
}

impl SessionProxy for EncodingSessionProxy {
    fn setup(&mut self, _session_id: SessionId, key: &CompositeKey) {
        self.encoder.setup(key);
    }

    fn logon(&mut self, heart_bt_int_s: i32, msg_seq_num: u32) {
        let now = self.now();
        self.send(self.encoder.logon(heart_bt_int_s, msg_seq_num, now));
    }

    fn logout(&mut self, msg_seq_num: u32) {
        let now = self.now();
        self.send(self.encoder.logout(msg_seq_num, now, None));
    }

    fn low_sequence_number_logout(&mut self, msg_seq_num: u32, expected: u32, received: u32) {
        let now = self.now();
        let text = format!(
            "MsgSeqNum too low, expecting {} but received {}",
            expected, received
        );
        self.send(self.encoder.logout(msg_seq_num, now, Some(text.as_bytes())));
    }

    fn incorrect_begin_string_logout(&mut self, msg_seq_num: u32) {
        let now = self.now();
        self.send(
            self.encoder
                .logout(msg_seq_num, now, Some(b"Incorrect BeginString")),
        );
    }

    fn negative_heartbeat_logout(&mut self, msg_seq_num: u32) {
        let now = self.now();
        self.send(
            self.encoder
                .logout(msg_seq_num, now, Some(b"HeartBtInt must not be negative")),
        );
    }

    fn reject(
        &mut self,
        msg_seq_num: u32,
        ref_seq_num: u32,
        ref_tag_id: Option<u32>,
        msg_type: &[u8],
        reason: RejectReason,
    ) {
        let now = self.now();
        self.send(
            self.encoder
                .reject(msg_seq_num, ref_seq_num, ref_tag_id, msg_type, reason, now),
        );
    }

    fn heartbeat(&mut self, test_req_id: Option<&[u8]>, msg_seq_num: u32) {
        let now = self.now();
        self.send(self.encoder.heartbeat(test_req_id, msg_seq_num, now));
    }

    fn test_request(&mut self, msg_seq_num: u32, test_req_id: &[u8]) {
        let now = self.now();
        self.send(self.encoder.test_request(msg_seq_num, test_req_id, now));
    }

    fn sequence_reset(&mut self, msg_seq_num: u32, new_seq_no: u32) {
        let now = self.now();
        self.send(self.encoder.sequence_reset(msg_seq_num, new_seq_no, false, now));
    }

    fn resend_request(&mut self, msg_seq_num: u32, begin_seq_no: u32, end_seq_no: u32) {
        let now = self.now();
        self.send(
            self.encoder
                .resend_request(msg_seq_num, begin_seq_no, end_seq_no, now),
        );
    }

    fn received_message_without_sequence_number(&mut self, _msg_seq_num: u32) {
        // Nothing to tell the peer: without a sequence number there is no
        // well-formed reply. The disconnect that follows is the signal.
    }

    fn request_disconnect(&mut self, connection_id: ConnectionId) {
        let frame = wire::encode_frame(connection_id, wire::KIND_DISCONNECT, b"");
        if let Err(e) = self.publication.offer(&frame) {
            error!(connection_id = %connection_id, error = %e, "Failed to offer disconnect request");
        }
    }
}
