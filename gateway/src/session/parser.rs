use crate::auth::AuthenticationStrategy;
use crate::decoder::{decode, DecodedBody};
use crate::session::key::SessionIdStrategy;
use crate::session::proxy::SessionProxy;
use crate::session::state::{Session, SessionState};
use fixmesh_common::types::fix::SessionId;
use std::sync::Arc;
use tracing::warn;

/// Dispatches one framed inbound message to the right session entry
/// point: common header extraction, PossDup detection, the
/// missing-sequence-number check, the BeginString gate, authentication
/// on logon, and the invalid-message fallback. Stateless over the
/// session.
pub struct SessionParser {
    session_id_strategy: Arc<dyn SessionIdStrategy>,
    authentication_strategy: Arc<dyn AuthenticationStrategy>,
}

impl SessionParser {
    pub fn new(
        session_id_strategy: Arc<dyn SessionIdStrategy>,
        authentication_strategy: Arc<dyn AuthenticationStrategy>,
    ) -> Self {
        Self {
            session_id_strategy,
            authentication_strategy,
        }
    }

    /// Feeds one framed message into `session`. Returns whether the
    /// session is still connected afterwards.
    pub fn on_message<P: SessionProxy>(
        &self,
        session: &mut Session<P>,
        buffer: &[u8],
        session_id: SessionId,
    ) -> bool {
        let decoded = match decode(buffer) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Undecodable inbound frame");
                return session.is_connected();
            }
        };

        let header = &decoded.header;
        let is_poss_dup = header.is_poss_dup();
        let is_logon = matches!(decoded.body, Ok(DecodedBody::Logon(_)));
        let sending_time = header.sending_time.unwrap_or(0);
        let orig_sending_time = header.orig_sending_time;

        // A message without MsgSeqNum(34) disconnects before anything
        // else is looked at, the BeginString included
        let Some(msg_seq_num) = header.msg_seq_num else {
            session.on_message(
                None,
                header.msg_type,
                sending_time,
                orig_sending_time,
                is_poss_dup,
            );
            return session.is_connected();
        };

        if !session.on_begin_string(header.begin_string, is_logon) {
            return session.is_connected();
        }

        let body = match decoded.body {
            Ok(body) => body,
            Err(invalid) => {
                session.on_invalid_message(
                    msg_seq_num,
                    invalid.tag,
                    header.msg_type,
                    invalid.reason,
                );
                return session.is_connected();
            }
        };

        match body {
            DecodedBody::Logon(logon) => {
                if !self.authentication_strategy.authenticate(&logon, header) {
                    warn!(
                        sender = %String::from_utf8_lossy(header.sender_comp_id),
                        "Logon authentication failed"
                    );
                    session.request_disconnect();
                    return session.is_connected();
                }

                let session_key = self.session_id_strategy.acceptor_key(header);
                session.on_logon(
                    logon.heart_bt_int,
                    msg_seq_num,
                    session_id,
                    Some(session_key),
                    sending_time,
                    orig_sending_time,
                    logon.username,
                    logon.password,
                    is_poss_dup,
                );
            }
            DecodedBody::Logout => {
                session.on_logout(msg_seq_num, sending_time, orig_sending_time, is_poss_dup);
            }
            DecodedBody::Heartbeat(heartbeat) => {
                session.on_heartbeat(
                    msg_seq_num,
                    heartbeat.test_req_id,
                    sending_time,
                    orig_sending_time,
                    is_poss_dup,
                );
            }
            DecodedBody::TestRequest(test_request) => {
                session.on_test_request(
                    msg_seq_num,
                    test_request.test_req_id,
                    sending_time,
                    orig_sending_time,
                    is_poss_dup,
                );
            }
            DecodedBody::Reject(_) => {
                session.on_reject(msg_seq_num, sending_time, orig_sending_time, is_poss_dup);
            }
            DecodedBody::SequenceReset(reset) => {
                session.on_sequence_reset(msg_seq_num, reset.new_seq_no, reset.gap_fill, is_poss_dup);
            }
            DecodedBody::Business => {
                session.on_message(
                    Some(msg_seq_num),
                    header.msg_type,
                    sending_time,
                    orig_sending_time,
                    is_poss_dup,
                );
            }
        }

        session.is_connected()
    }

    /// True once the logon exchange has completed for `session`.
    pub fn is_active<P: SessionProxy>(&self, session: &Session<P>) -> bool {
        session.state() == SessionState::Active
    }

    /// The composite key of a structurally valid logon frame, or None for
    /// any other frame. Lets the owning agent resolve the session id
    /// before dispatching the logon itself.
    pub fn logon_key(&self, buffer: &[u8]) -> Option<crate::session::key::CompositeKey> {
        let decoded = decode(buffer).ok()?;
        match decoded.body {
            Ok(DecodedBody::Logon(_)) => {
                Some(self.session_id_strategy.acceptor_key(&decoded.header))
            }
            _ => None,
        }
    }
}
