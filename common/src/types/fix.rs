use std::fmt;

/// Cluster-unique identifier for a FIX session. Survives reconnects: the
/// registry hands the same id back to a counterparty that logs on again
/// with the same composite key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-local identifier for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The session-layer message set handled by the gateway. Everything else
/// reaches the session as a business message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Logon (35=A) - opens a FIX session
    Logon,
    /// Logout (35=5) - closes a FIX session
    Logout,
    /// Heartbeat (35=0) - keeps the session alive
    Heartbeat,
    /// Test Request (35=1) - demands a heartbeat from the peer
    TestRequest,
    /// Resend Request (35=2) - asks the peer to retransmit a range
    ResendRequest,
    /// Reject (35=3) - session-level rejection of a message
    Reject,
    /// Sequence Reset (35=4) - gap fill or hard sequence reset
    SequenceReset,
}

impl MsgType {
    /// Converts the wire MsgType(35) value into the session-layer set.
    pub fn from_bytes(msg_type: &[u8]) -> Option<Self> {
        match msg_type {
            b"A" => Some(Self::Logon),
            b"5" => Some(Self::Logout),
            b"0" => Some(Self::Heartbeat),
            b"1" => Some(Self::TestRequest),
            b"2" => Some(Self::ResendRequest),
            b"3" => Some(Self::Reject),
            b"4" => Some(Self::SequenceReset),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Logon => b"A",
            Self::Logout => b"5",
            Self::Heartbeat => b"0",
            Self::TestRequest => b"1",
            Self::ResendRequest => b"2",
            Self::Reject => b"3",
            Self::SequenceReset => b"4",
        }
    }
}

/// SessionRejectReason(373) values the session engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidTagNumber,
    RequiredTagMissing,
    ValueIsIncorrect,
    CompIdProblem,
    SendingTimeAccuracyProblem,
}

impl RejectReason {
    /// The numeric code carried in tag 373.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidTagNumber => 0,
            Self::RequiredTagMissing => 1,
            Self::ValueIsIncorrect => 5,
            Self::CompIdProblem => 9,
            Self::SendingTimeAccuracyProblem => 10,
        }
    }
}

/// Tag numbers used by the session layer.
pub mod tags {
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const CHECK_SUM: u32 = 10;
    pub const END_SEQ_NO: u32 = 16;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const MSG_TYPE: u32 = 35;
    pub const NEW_SEQ_NO: u32 = 36;
    pub const POSS_DUP_FLAG: u32 = 43;
    pub const REF_SEQ_NUM: u32 = 45;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const SENDER_SUB_ID: u32 = 50;
    pub const SENDING_TIME: u32 = 52;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const TARGET_SUB_ID: u32 = 57;
    pub const TEXT: u32 = 58;
    pub const POSS_RESEND: u32 = 97;
    pub const ENCRYPT_METHOD: u32 = 98;
    pub const HEART_BT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const ORIG_SENDING_TIME: u32 = 122;
    pub const GAP_FILL_FLAG: u32 = 123;
    pub const REF_TAG_ID: u32 = 371;
    pub const REF_MSG_TYPE: u32 = 372;
    pub const SESSION_REJECT_REASON: u32 = 373;
    pub const USERNAME: u32 = 553;
    pub const PASSWORD: u32 = 554;
}
