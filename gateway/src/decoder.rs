use chrono::NaiveDateTime;
use fixmesh_common::types::fix::{tags, MsgType, RejectReason};
use std::str;
use thiserror::Error;

/// Common header fields extracted once per inbound message. All byte
/// slices borrow from the framed buffer and are only valid for the
/// duration of the handler call.
#[derive(Debug)]
pub struct FixHeader<'a> {
    pub begin_string: &'a [u8],
    pub msg_type: &'a [u8],
    pub msg_seq_num: Option<u32>,
    pub sender_comp_id: &'a [u8],
    pub sender_sub_id: &'a [u8],
    pub target_comp_id: &'a [u8],
    pub target_sub_id: &'a [u8],
    pub sending_time: Option<u64>,
    pub orig_sending_time: Option<u64>,
    pub poss_dup: bool,
    pub poss_resend: bool,
}

impl FixHeader<'_> {
    /// PossDupFlag(43) or PossResend(97): either marks a retransmission.
    pub fn is_poss_dup(&self) -> bool {
        self.poss_dup || self.poss_resend
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message has no BeginString(8)")]
    MissingBeginString,

    #[error("message has no MsgType(35)")]
    MissingMsgType,

    #[error("malformed tag at offset {0}")]
    MalformedTag(usize),
}

/// Structural-validation failure: the offending tag and the session-level
/// reject reason it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidField {
    pub tag: u32,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct LogonFields<'a> {
    pub heart_bt_int: i32,
    pub username: Option<&'a [u8]>,
    pub password: Option<&'a [u8]>,
}

#[derive(Debug)]
pub struct HeartbeatFields<'a> {
    pub test_req_id: Option<&'a [u8]>,
}

#[derive(Debug)]
pub struct TestRequestFields<'a> {
    pub test_req_id: &'a [u8],
}

#[derive(Debug)]
pub struct RejectFields {
    pub ref_seq_num: Option<u32>,
}

#[derive(Debug)]
pub struct SequenceResetFields {
    pub new_seq_no: u32,
    pub gap_fill: bool,
}

/// Body of one decoded session-layer message. Anything outside the fixed
/// set is `Business` and reaches the session untyped.
#[derive(Debug)]
pub enum DecodedBody<'a> {
    Logon(LogonFields<'a>),
    Logout,
    Heartbeat(HeartbeatFields<'a>),
    TestRequest(TestRequestFields<'a>),
    Reject(RejectFields),
    SequenceReset(SequenceResetFields),
    Business,
}

#[derive(Debug)]
pub struct DecodedMessage<'a> {
    pub header: FixHeader<'a>,
    /// `Err` carries the structural-validation result; the header above is
    /// still usable for the invalid-message path.
    pub body: Result<DecodedBody<'a>, InvalidField>,
}

struct FieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<(u32, &'a [u8]), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        let eq = self.buf[start..].iter().position(|&b| b == b'=')?;
        let tag = match str::from_utf8(&self.buf[start..start + eq])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            Some(tag) => tag,
            None => return Some(Err(DecodeError::MalformedTag(start))),
        };
        let value_start = start + eq + 1;
        let soh = self.buf[value_start..]
            .iter()
            .position(|&b| b == 0x01)
            .unwrap_or(self.buf.len() - value_start);
        self.pos = value_start + soh + 1;
        Some(Ok((tag, &self.buf[value_start..value_start + soh])))
    }
}

fn parse_u32(value: &[u8]) -> Option<u32> {
    str::from_utf8(value).ok()?.parse().ok()
}

fn parse_i32(value: &[u8]) -> Option<i32> {
    str::from_utf8(value).ok()?.parse().ok()
}

fn parse_bool(value: &[u8]) -> bool {
    value == b"Y"
}

/// Parses a FIX UTC timestamp (`YYYYMMDD-HH:MM:SS` with optional
/// milliseconds) into epoch milliseconds.
pub fn parse_utc_timestamp(value: &[u8]) -> Option<u64> {
    let s = str::from_utf8(value).ok()?;
    let dt = NaiveDateTime::parse_from_str(s, "%Y%m%d-%H:%M:%S%.3f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y%m%d-%H:%M:%S"))
        .ok()?;
    let millis = dt.and_utc().timestamp_millis();
    (millis >= 0).then_some(millis as u64)
}

/// Formats epoch milliseconds as a FIX UTC timestamp with milliseconds.
pub fn format_utc_timestamp(ms: u64) -> String {
    let dt = chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_default();
    dt.format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

/// Decodes one framed message into its header and typed body.
///
/// A `DecodeError` means the message is not FIX at all; an `InvalidField`
/// in `body` means the message is structurally invalid but the header is
/// intact enough to drive the session's invalid-message path.
pub fn decode(buffer: &[u8]) -> Result<DecodedMessage<'_>, DecodeError> {
    let mut begin_string: Option<&[u8]> = None;
    let mut msg_type: Option<&[u8]> = None;
    let mut msg_seq_num = None;
    let mut sender_comp_id: &[u8] = b"";
    let mut sender_sub_id: &[u8] = b"";
    let mut target_comp_id: &[u8] = b"";
    let mut target_sub_id: &[u8] = b"";
    let mut sending_time = None;
    let mut orig_sending_time = None;
    let mut poss_dup = false;
    let mut poss_resend = false;

    let mut heart_bt_int = None;
    let mut username = None;
    let mut password = None;
    let mut test_req_id = None;
    let mut ref_seq_num = None;
    let mut new_seq_no = None;
    let mut gap_fill = false;

    for field in (FieldIter { buf: buffer, pos: 0 }) {
        let (tag, value) = field?;
        match tag {
            tags::BEGIN_STRING => begin_string = Some(value),
            tags::MSG_TYPE => msg_type = Some(value),
            tags::MSG_SEQ_NUM => msg_seq_num = parse_u32(value),
            tags::SENDER_COMP_ID => sender_comp_id = value,
            tags::SENDER_SUB_ID => sender_sub_id = value,
            tags::TARGET_COMP_ID => target_comp_id = value,
            tags::TARGET_SUB_ID => target_sub_id = value,
            tags::SENDING_TIME => sending_time = parse_utc_timestamp(value),
            tags::ORIG_SENDING_TIME => orig_sending_time = parse_utc_timestamp(value),
            tags::POSS_DUP_FLAG => poss_dup = parse_bool(value),
            tags::POSS_RESEND => poss_resend = parse_bool(value),
            tags::HEART_BT_INT => heart_bt_int = parse_i32(value),
            tags::USERNAME => username = Some(value),
            tags::PASSWORD => password = Some(value),
            tags::TEST_REQ_ID => test_req_id = Some(value),
            tags::REF_SEQ_NUM => ref_seq_num = parse_u32(value),
            tags::NEW_SEQ_NO => new_seq_no = parse_u32(value),
            tags::GAP_FILL_FLAG => gap_fill = parse_bool(value),
            _ => {}
        }
    }

    let begin_string = begin_string.ok_or(DecodeError::MissingBeginString)?;
    let msg_type = msg_type.ok_or(DecodeError::MissingMsgType)?;

    let header = FixHeader {
        begin_string,
        msg_type,
        msg_seq_num,
        sender_comp_id,
        sender_sub_id,
        target_comp_id,
        target_sub_id,
        sending_time,
        orig_sending_time,
        poss_dup,
        poss_resend,
    };

    let body = validate_body(
        &header,
        heart_bt_int,
        username,
        password,
        test_req_id,
        ref_seq_num,
        new_seq_no,
        gap_fill,
    );

    Ok(DecodedMessage { header, body })
}

#[allow(clippy::too_many_arguments)]
fn validate_body<'a>(
    header: &FixHeader<'a>,
    heart_bt_int: Option<i32>,
    username: Option<&'a [u8]>,
    password: Option<&'a [u8]>,
    test_req_id: Option<&'a [u8]>,
    ref_seq_num: Option<u32>,
    new_seq_no: Option<u32>,
    gap_fill: bool,
) -> Result<DecodedBody<'a>, InvalidField> {
    let session_type = MsgType::from_bytes(header.msg_type);

    // Session-layer messages require SendingTime(52); business messages
    // are passed through untyped, their dictionary is not ours to check.
    if session_type.is_some() && header.sending_time.is_none() {
        return Err(InvalidField {
            tag: tags::SENDING_TIME,
            reason: RejectReason::RequiredTagMissing,
        });
    }

    match session_type {
        Some(MsgType::Logon) => {
            let heart_bt_int = heart_bt_int.ok_or(InvalidField {
                tag: tags::HEART_BT_INT,
                reason: RejectReason::RequiredTagMissing,
            })?;
            Ok(DecodedBody::Logon(LogonFields {
                heart_bt_int,
                username,
                password,
            }))
        }
        Some(MsgType::Logout) => Ok(DecodedBody::Logout),
        Some(MsgType::Heartbeat) => Ok(DecodedBody::Heartbeat(HeartbeatFields { test_req_id })),
        Some(MsgType::TestRequest) => {
            let test_req_id = test_req_id.ok_or(InvalidField {
                tag: tags::TEST_REQ_ID,
                reason: RejectReason::RequiredTagMissing,
            })?;
            Ok(DecodedBody::TestRequest(TestRequestFields { test_req_id }))
        }
        Some(MsgType::Reject) => Ok(DecodedBody::Reject(RejectFields { ref_seq_num })),
        Some(MsgType::SequenceReset) => {
            let new_seq_no = new_seq_no.ok_or(InvalidField {
                tag: tags::NEW_SEQ_NO,
                reason: RejectReason::RequiredTagMissing,
            })?;
            Ok(DecodedBody::SequenceReset(SequenceResetFields {
                new_seq_no,
                gap_fill,
            }))
        }
        Some(MsgType::ResendRequest) | None => Ok(DecodedBody::Business),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGON: &[u8] = b"8=FIX.4.4\x019=84\x0135=A\x0134=1\x0149=INITIATOR\x0156=ACCEPTOR\x0152=20240111-12:00:00.000\x0198=0\x01108=30\x0110=000\x01";

    #[test]
    fn test_decode_logon() {
        let decoded = decode(LOGON).unwrap();
        assert_eq!(decoded.header.begin_string, b"FIX.4.4");
        assert_eq!(decoded.header.msg_type, b"A");
        assert_eq!(decoded.header.msg_seq_num, Some(1));
        assert_eq!(decoded.header.sender_comp_id, b"INITIATOR");
        assert_eq!(decoded.header.target_comp_id, b"ACCEPTOR");
        assert!(!decoded.header.is_poss_dup());

        match decoded.body.unwrap() {
            DecodedBody::Logon(logon) => {
                assert_eq!(logon.heart_bt_int, 30);
                assert!(logon.username.is_none());
            }
            other => panic!("expected logon, got {:?}", other),
        }
    }

    #[test]
    fn test_logon_without_heart_bt_int_is_invalid() {
        let msg = b"8=FIX.4.4\x0135=A\x0134=1\x0149=A\x0156=B\x0152=20240111-12:00:00\x01";
        let decoded = decode(msg).unwrap();
        let invalid = decoded.body.unwrap_err();
        assert_eq!(invalid.tag, tags::HEART_BT_INT);
        assert_eq!(invalid.reason, RejectReason::RequiredTagMissing);
    }

    #[test]
    fn test_missing_seq_num_is_reported_as_none() {
        let msg = b"8=FIX.4.4\x0135=0\x0149=A\x0156=B\x0152=20240111-12:00:00\x01";
        let decoded = decode(msg).unwrap();
        assert_eq!(decoded.header.msg_seq_num, None);
    }

    #[test]
    fn test_poss_dup_or_poss_resend() {
        let msg =
            b"8=FIX.4.4\x0135=0\x0134=2\x0143=Y\x0152=20240111-12:00:00\x01122=20240111-11:59:00\x01";
        let decoded = decode(msg).unwrap();
        assert!(decoded.header.is_poss_dup());
        assert!(decoded.header.orig_sending_time.is_some());

        let msg = b"8=FIX.4.4\x0135=0\x0134=2\x0197=Y\x0152=20240111-12:00:00\x01";
        let decoded = decode(msg).unwrap();
        assert!(decoded.header.is_poss_dup());
    }

    #[test]
    fn test_sequence_reset_gap_fill() {
        let msg = b"8=FIX.4.4\x0135=4\x0134=1\x0152=20240111-12:00:00\x0136=10\x01123=Y\x01";
        let decoded = decode(msg).unwrap();
        match decoded.body.unwrap() {
            DecodedBody::SequenceReset(reset) => {
                assert_eq!(reset.new_seq_no, 10);
                assert!(reset.gap_fill);
            }
            other => panic!("expected sequence reset, got {:?}", other),
        }
    }

    #[test]
    fn test_test_request_requires_id() {
        let msg = b"8=FIX.4.4\x0135=1\x0134=5\x0152=20240111-12:00:00\x01";
        let decoded = decode(msg).unwrap();
        assert_eq!(decoded.body.unwrap_err().tag, tags::TEST_REQ_ID);
    }

    #[test]
    fn test_business_message_is_untyped() {
        let msg = b"8=FIX.4.4\x0135=D\x0134=7\x0152=20240111-12:00:00\x0155=EURUSD\x01";
        let decoded = decode(msg).unwrap();
        assert!(matches!(decoded.body, Ok(DecodedBody::Business)));
        assert_eq!(decoded.header.msg_type, b"D");
    }

    #[test]
    fn test_not_fix_at_all() {
        assert!(matches!(
            decode(b"35=A\x01"),
            Err(DecodeError::MissingBeginString)
        ));
        assert!(matches!(
            decode(b"8=FIX.4.4\x0134=1\x01"),
            Err(DecodeError::MissingMsgType)
        ));
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ms = parse_utc_timestamp(b"20240111-12:00:00.250").unwrap();
        assert_eq!(format_utc_timestamp(ms), "20240111-12:00:00.250");

        let plain = parse_utc_timestamp(b"20240111-12:00:00").unwrap();
        assert_eq!(plain % 1000, 0);

        assert_eq!(parse_utc_timestamp(b"garbage"), None);
    }
}
