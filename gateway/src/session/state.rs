use crate::config::GatewayConfig;
use crate::session::key::CompositeKey;
use crate::session::proxy::SessionProxy;
use fixmesh_common::clock::EpochClock;
use fixmesh_common::types::fix::{tags, ConnectionId, MsgType, RejectReason, SessionId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// TestReqID(112) used for locally generated test requests, so that the
/// matching heartbeat reply can be recognised.
pub const TEST_REQ_ID: &[u8] = b"TEST";

/// Lifecycle of one FIX session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected, no logon exchanged yet
    Connected,
    /// We initiated and sent a Logon, awaiting the reply
    SentLogon,
    /// Logon exchange complete, messages flow
    Active,
    /// A sequence gap or idle timeout is outstanding
    AwaitingResend,
    /// We sent a Logout and await the acknowledgement
    AwaitingLogout,
    /// The session is finished; nothing further is emitted
    Disconnected,
}

/// The FIX 4.x session-layer state machine for one peer. Inbound entry
/// points are driven by the [`crate::session::parser::SessionParser`];
/// timers are driven by `poll(now)`. All outbound traffic goes through
/// the injected [`SessionProxy`].
pub struct Session<P: SessionProxy> {
    id: SessionId,
    connection_id: ConnectionId,
    state: SessionState,
    last_received_msg_seq_num: u32,
    last_sent_msg_seq_num: u32,
    heartbeat_interval_ms: u64,
    sending_time_window_ms: u64,
    begin_string: Vec<u8>,
    session_key: Option<CompositeKey>,
    clock: Arc<dyn EpochClock>,
    proxy: P,
    /// Deadline by which inbound traffic is expected (last inbound +
    /// heartbeat interval). One further interval of silence past this
    /// triggers a test request.
    next_required_inbound_ms: u64,
    next_heartbeat_ms: u64,
    /// Set while a locally sent TestRequest awaits its heartbeat reply;
    /// expiry disconnects.
    awaiting_reply_deadline_ms: Option<u64>,
    resend_outstanding: bool,
}

impl<P: SessionProxy> Session<P> {
    pub fn new(
        connection_id: ConnectionId,
        config: &GatewayConfig,
        clock: Arc<dyn EpochClock>,
        proxy: P,
    ) -> Self {
        let now = clock.time();
        let heartbeat_interval_ms = (config.default_heartbeat_interval_s.max(1) as u64) * 1000;
        Self {
            id: SessionId(0),
            connection_id,
            state: SessionState::Connected,
            last_received_msg_seq_num: 0,
            last_sent_msg_seq_num: 0,
            heartbeat_interval_ms,
            sending_time_window_ms: config.sending_time_window_ms,
            begin_string: config.begin_string.clone().into_bytes(),
            session_key: None,
            clock,
            proxy,
            next_required_inbound_ms: now + heartbeat_interval_ms,
            next_heartbeat_ms: now + heartbeat_interval_ms,
            awaiting_reply_deadline_ms: None,
            resend_outstanding: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn session_key(&self) -> Option<&CompositeKey> {
        self.session_key.as_ref()
    }

    pub fn last_received_msg_seq_num(&self) -> u32 {
        self.last_received_msg_seq_num
    }

    pub fn last_sent_msg_seq_num(&self) -> u32 {
        self.last_sent_msg_seq_num
    }

    /// The next inbound sequence number this session will accept.
    pub fn expected_received_seq_num(&self) -> u32 {
        self.last_received_msg_seq_num + 1
    }

    fn new_sent_seq_num(&mut self) -> u32 {
        self.last_sent_msg_seq_num += 1;
        self.last_sent_msg_seq_num
    }

    /// Tears the session down. Cancellation is modelled as a disconnect
    /// request; the owning agent drops the session on its next poll.
    pub fn request_disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.proxy.request_disconnect(self.connection_id);
        self.state = SessionState::Disconnected;
        debug!(session_id = %self.id, connection_id = %self.connection_id, "Session disconnected");
    }

    /// Any accepted inbound traffic: push out the idle deadline and close
    /// a pending resend/test-request window.
    fn on_traffic(&mut self) {
        let now = self.clock.time();
        self.next_required_inbound_ms = now + self.heartbeat_interval_ms;
        self.awaiting_reply_deadline_ms = None;
        if self.state == SessionState::AwaitingResend {
            self.resend_outstanding = false;
            self.state = SessionState::Active;
        }
    }

    fn on_in_sequence_message(&mut self) {
        self.last_received_msg_seq_num += 1;
        self.on_traffic();
    }

    fn become_active(&mut self) {
        let now = self.clock.time();
        self.state = SessionState::Active;
        self.next_heartbeat_ms = now + self.heartbeat_interval_ms;
        self.next_required_inbound_ms = now + self.heartbeat_interval_ms;
        self.awaiting_reply_deadline_ms = None;
        self.resend_outstanding = false;
    }

    /// SendingTime window and PossDup/OrigSendingTime rules. Returns true
    /// when the message may proceed to sequence handling.
    fn validate_message_time(
        &mut self,
        msg_seq_num: u32,
        msg_type: &[u8],
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) -> bool {
        let now = self.clock.time();
        let window = self.sending_time_window_ms;
        if sending_time + window < now || sending_time > now + window {
            let seq = self.new_sent_seq_num();
            self.proxy.reject(
                seq,
                msg_seq_num,
                None,
                msg_type,
                RejectReason::SendingTimeAccuracyProblem,
            );
            return false;
        }

        if is_poss_dup {
            match orig_sending_time {
                None => {
                    let seq = self.new_sent_seq_num();
                    self.proxy.reject(
                        seq,
                        msg_seq_num,
                        None,
                        msg_type,
                        RejectReason::RequiredTagMissing,
                    );
                    return false;
                }
                Some(orig) if orig > sending_time => {
                    let seq = self.new_sent_seq_num();
                    self.proxy.reject(
                        seq,
                        msg_seq_num,
                        None,
                        msg_type,
                        RejectReason::SendingTimeAccuracyProblem,
                    );
                    return false;
                }
                _ => {}
            }
        }

        true
    }

    /// The sequence-number rules applied to every numbered message.
    /// Returns true when the message was in sequence and accepted.
    fn check_sequence(&mut self, msg_seq_num: u32, is_poss_dup: bool) -> bool {
        let expected = self.expected_received_seq_num();
        if msg_seq_num == expected {
            self.on_in_sequence_message();
            true
        } else if msg_seq_num < expected {
            if !is_poss_dup {
                let seq = self.new_sent_seq_num();
                self.proxy
                    .low_sequence_number_logout(seq, expected, msg_seq_num);
                self.request_disconnect();
            }
            // A retransmitted duplicate below the watermark is ignored
            false
        } else {
            self.request_resend(expected);
            false
        }
    }

    /// Ask the peer to retransmit from `begin_seq_no` to infinity
    /// (EndSeqNo 0). Suppressed while a request is already outstanding.
    fn request_resend(&mut self, begin_seq_no: u32) {
        if self.resend_outstanding {
            return;
        }
        let seq = self.new_sent_seq_num();
        self.proxy.resend_request(seq, begin_seq_no, 0);
        self.resend_outstanding = true;
        if self.state != SessionState::Disconnected {
            self.state = SessionState::AwaitingResend;
        }
    }

    fn on_missing_seq_num(&mut self) {
        let seq = self.new_sent_seq_num();
        self.proxy.received_message_without_sequence_number(seq);
        self.request_disconnect();
    }

    // ---- inbound entry points -------------------------------------------

    /// BeginString(8) gate, applied before any logon processing. Returns
    /// false when the session was torn down. A mismatch during the very
    /// first logon disconnects without a logout.
    pub fn on_begin_string(&mut self, begin_string: &[u8], is_logon: bool) -> bool {
        if self.state == SessionState::Disconnected {
            return false;
        }
        if begin_string == self.begin_string.as_slice() {
            return true;
        }
        warn!(
            received = %String::from_utf8_lossy(begin_string),
            configured = %String::from_utf8_lossy(&self.begin_string),
            "BeginString mismatch"
        );
        if !is_logon {
            let seq = self.new_sent_seq_num();
            self.proxy.incorrect_begin_string_logout(seq);
        }
        self.request_disconnect();
        false
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_logon(
        &mut self,
        heart_bt_int_s: i32,
        msg_seq_num: u32,
        session_id: SessionId,
        session_key: Option<CompositeKey>,
        sending_time: u64,
        orig_sending_time: Option<u64>,
        username: Option<&[u8]>,
        password: Option<&[u8]>,
        is_poss_dup: bool,
    ) {
        let _ = password;
        if self.state == SessionState::Disconnected {
            return;
        }
        if heart_bt_int_s < 0 {
            let seq = self.new_sent_seq_num();
            self.proxy.negative_heartbeat_logout(seq);
            self.request_disconnect();
            return;
        }

        if !self.validate_message_time(
            msg_seq_num,
            MsgType::Logon.as_bytes(),
            sending_time,
            orig_sending_time,
            is_poss_dup,
        ) {
            return;
        }

        self.id = session_id;
        self.heartbeat_interval_ms = (heart_bt_int_s.max(1) as u64) * 1000;
        if let Some(key) = session_key {
            self.proxy.setup(session_id, &key);
            self.session_key = Some(key);
        }
        self.last_received_msg_seq_num = msg_seq_num;

        if self.state == SessionState::SentLogon {
            // Initiator: the peer accepted our logon
            self.become_active();
        } else {
            let seq = self.new_sent_seq_num();
            self.proxy.logon(heart_bt_int_s, seq);
            self.become_active();
        }

        info!(
            session_id = %self.id,
            username = username.map(String::from_utf8_lossy).as_deref().unwrap_or("-"),
            heartbeat_s = heart_bt_int_s,
            "Session active"
        );
    }

    pub fn on_logout(
        &mut self,
        msg_seq_num: u32,
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if self.state == SessionState::AwaitingLogout {
            self.request_disconnect();
            return;
        }

        if !self.validate_message_time(
            msg_seq_num,
            MsgType::Logout.as_bytes(),
            sending_time,
            orig_sending_time,
            is_poss_dup,
        ) {
            return;
        }

        if self.check_sequence(msg_seq_num, is_poss_dup) {
            let seq = self.new_sent_seq_num();
            self.proxy.logout(seq);
            self.request_disconnect();
        }
    }

    pub fn on_heartbeat(
        &mut self,
        msg_seq_num: u32,
        test_req_id: Option<&[u8]>,
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if !self.validate_message_time(
            msg_seq_num,
            MsgType::Heartbeat.as_bytes(),
            sending_time,
            orig_sending_time,
            is_poss_dup,
        ) {
            return;
        }

        if self.check_sequence(msg_seq_num, is_poss_dup) && test_req_id == Some(TEST_REQ_ID) {
            // The reply to our own test request; the idle window is
            // already closed by on_traffic, this pins the match rule.
            self.awaiting_reply_deadline_ms = None;
        }
    }

    pub fn on_test_request(
        &mut self,
        msg_seq_num: u32,
        test_req_id: &[u8],
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if !self.validate_message_time(
            msg_seq_num,
            MsgType::TestRequest.as_bytes(),
            sending_time,
            orig_sending_time,
            is_poss_dup,
        ) {
            return;
        }

        if self.check_sequence(msg_seq_num, is_poss_dup) {
            let seq = self.new_sent_seq_num();
            self.proxy.heartbeat(Some(test_req_id), seq);
        }
    }

    pub fn on_reject(
        &mut self,
        msg_seq_num: u32,
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if !self.validate_message_time(
            msg_seq_num,
            MsgType::Reject.as_bytes(),
            sending_time,
            orig_sending_time,
            is_poss_dup,
        ) {
            return;
        }
        self.check_sequence(msg_seq_num, is_poss_dup);
    }

    pub fn on_sequence_reset(
        &mut self,
        msg_seq_num: u32,
        new_seq_no: u32,
        gap_fill_flag: bool,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if gap_fill_flag {
            self.on_gap_fill(msg_seq_num, new_seq_no, is_poss_dup);
        } else {
            self.on_hard_reset(msg_seq_num, new_seq_no, is_poss_dup);
        }
    }

    fn on_gap_fill(&mut self, msg_seq_num: u32, new_seq_no: u32, is_poss_dup: bool) {
        let expected = self.expected_received_seq_num();
        if msg_seq_num < expected {
            if !is_poss_dup {
                let seq = self.new_sent_seq_num();
                self.proxy
                    .low_sequence_number_logout(seq, expected, msg_seq_num);
                self.request_disconnect();
            }
        } else if msg_seq_num > expected {
            // The gap fill itself arrived above the expected sequence
            self.request_resend(expected);
        } else if new_seq_no > expected {
            self.last_received_msg_seq_num = new_seq_no - 1;
            self.on_traffic();
        } else if !is_poss_dup {
            // Gap fill moving the sequence backwards
            let seq = self.new_sent_seq_num();
            self.proxy
                .low_sequence_number_logout(seq, expected, new_seq_no);
            self.request_disconnect();
        }
        // Duplicate gap fill (new_seq_no <= expected, PossDup) is ignored
    }

    fn on_hard_reset(&mut self, msg_seq_num: u32, new_seq_no: u32, is_poss_dup: bool) {
        let expected = self.expected_received_seq_num();
        if new_seq_no >= expected {
            // Unconditional reset; equal is unnecessary but legal
            self.last_received_msg_seq_num = new_seq_no - 1;
        } else if !is_poss_dup {
            let seq = self.new_sent_seq_num();
            self.proxy.reject(
                seq,
                msg_seq_num,
                Some(tags::NEW_SEQ_NO),
                MsgType::SequenceReset.as_bytes(),
                RejectReason::ValueIsIncorrect,
            );
        }
        // A replayed low reset (PossDup) is ignored
    }

    pub fn on_message(
        &mut self,
        msg_seq_num: Option<u32>,
        msg_type: &[u8],
        sending_time: u64,
        orig_sending_time: Option<u64>,
        is_poss_dup: bool,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let Some(seq) = msg_seq_num else {
            self.on_missing_seq_num();
            return;
        };

        if !self.validate_message_time(seq, msg_type, sending_time, orig_sending_time, is_poss_dup)
        {
            return;
        }
        self.check_sequence(seq, is_poss_dup);
    }

    pub fn on_invalid_message(
        &mut self,
        msg_seq_num: u32,
        invalid_tag_id: u32,
        msg_type: &[u8],
        reject_reason: RejectReason,
    ) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let seq = self.new_sent_seq_num();
        self.proxy
            .reject(seq, msg_seq_num, Some(invalid_tag_id), msg_type, reject_reason);
        // A rejected message still consumes its sequence number
        if msg_seq_num == self.expected_received_seq_num() {
            self.on_in_sequence_message();
        }
    }

    // ---- locally initiated operations -----------------------------------

    /// Sends the initiator logon and waits for the acceptor's reply.
    pub fn initiate(&mut self, session_id: SessionId, key: CompositeKey, heart_bt_int_s: i32) {
        self.id = session_id;
        self.proxy.setup(session_id, &key);
        self.session_key = Some(key);
        self.heartbeat_interval_ms = (heart_bt_int_s.max(1) as u64) * 1000;
        let seq = self.new_sent_seq_num();
        self.proxy.logon(heart_bt_int_s, seq);
        self.state = SessionState::SentLogon;
    }

    /// Starts a graceful logout; the session disconnects when the peer
    /// acknowledges.
    pub fn start_logout(&mut self) {
        let seq = self.new_sent_seq_num();
        self.proxy.logout(seq);
        self.state = SessionState::AwaitingLogout;
    }

    /// Resets the outbound sequence, notifying the counterparty.
    pub fn sequence_reset(&mut self, new_seq_no: u32) {
        let seq = self.new_sent_seq_num();
        self.proxy.sequence_reset(seq, new_seq_no);
        self.last_sent_msg_seq_num = new_seq_no - 1;
    }

    // ---- timers ----------------------------------------------------------

    /// Timer-driven work: heartbeats, test requests on idle, and the
    /// disconnect that follows an unanswered test request.
    pub fn poll(&mut self, now: u64) -> usize {
        if self.state == SessionState::Disconnected {
            return 0;
        }
        let mut work = 0;

        if let Some(deadline) = self.awaiting_reply_deadline_ms {
            if now >= deadline {
                warn!(session_id = %self.id, "No reply to test request, disconnecting");
                self.request_disconnect();
                return work + 1;
            }
        }

        let heartbeating = matches!(
            self.state,
            SessionState::Active | SessionState::AwaitingResend | SessionState::AwaitingLogout
        );

        if heartbeating && now >= self.next_heartbeat_ms {
            let seq = self.new_sent_seq_num();
            self.proxy.heartbeat(None, seq);
            self.next_heartbeat_ms = now + self.heartbeat_interval_ms;
            work += 1;
        }

        let idle_check = matches!(
            self.state,
            SessionState::Active | SessionState::AwaitingResend
        );

        if idle_check
            && self.awaiting_reply_deadline_ms.is_none()
            && now >= self.next_required_inbound_ms + self.heartbeat_interval_ms
        {
            let seq = self.new_sent_seq_num();
            self.proxy.test_request(seq, TEST_REQ_ID);
            self.state = SessionState::AwaitingResend;
            self.awaiting_reply_deadline_ms = Some(now + self.heartbeat_interval_ms);
            work += 1;
        }

        work
    }
}
