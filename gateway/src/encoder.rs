use crate::codec::{CodecError, CodecResult, FixCodec, SOH};
use crate::decoder::format_utc_timestamp;
use crate::session::key::CompositeKey;
use bytes::{BufMut, BytesMut};
use fixmesh_common::types::fix::{tags, MsgType, RejectReason};

/// Builds outbound session-layer messages. One encoder per session; the
/// header comp ids are installed from the composite key once the session
/// identity is known.
pub struct Encoder {
    begin_string: Vec<u8>,
    buffer_size: usize,
    sender_comp_id: Vec<u8>,
    sender_sub_id: Vec<u8>,
    target_comp_id: Vec<u8>,
}

impl Encoder {
    pub fn new(begin_string: &[u8], buffer_size: usize) -> Self {
        Self {
            begin_string: begin_string.to_vec(),
            buffer_size,
            sender_comp_id: Vec::new(),
            sender_sub_id: Vec::new(),
            target_comp_id: Vec::new(),
        }
    }

    /// Installs the outbound header identity from the session key.
    pub fn setup(&mut self, key: &CompositeKey) {
        self.sender_comp_id = key.sender_comp_id.clone();
        self.sender_sub_id = key.sender_sub_id.clone();
        self.target_comp_id = key.target_comp_id.clone();
    }

    fn put_tag(buf: &mut BytesMut, tag: u32, value: &[u8]) {
        buf.put_slice(tag.to_string().as_bytes());
        buf.put_u8(b'=');
        buf.put_slice(value);
        buf.put_u8(SOH);
    }

    fn put_int_tag(buf: &mut BytesMut, tag: u32, value: i64) {
        Self::put_tag(buf, tag, value.to_string().as_bytes());
    }

    fn header(&self, msg_type: &MsgType, msg_seq_num: u32, sending_time_ms: u64) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.buffer_size.min(256));
        Self::put_tag(&mut buf, tags::MSG_TYPE, msg_type.as_bytes());
        Self::put_int_tag(&mut buf, tags::MSG_SEQ_NUM, msg_seq_num as i64);
        if !self.sender_comp_id.is_empty() {
            Self::put_tag(&mut buf, tags::SENDER_COMP_ID, &self.sender_comp_id);
        }
        if !self.sender_sub_id.is_empty() {
            Self::put_tag(&mut buf, tags::SENDER_SUB_ID, &self.sender_sub_id);
        }
        if !self.target_comp_id.is_empty() {
            Self::put_tag(&mut buf, tags::TARGET_COMP_ID, &self.target_comp_id);
        }
        Self::put_tag(
            &mut buf,
            tags::SENDING_TIME,
            format_utc_timestamp(sending_time_ms).as_bytes(),
        );
        buf
    }

    fn finish(&self, body: BytesMut) -> CodecResult<BytesMut> {
        if body.len() > self.buffer_size {
            return Err(CodecError::MessageTooLarge { size: body.len() });
        }
        Ok(FixCodec::finish_message(&self.begin_string, &body))
    }

    pub fn logon(
        &self,
        heart_bt_int_s: i32,
        msg_seq_num: u32,
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::Logon, msg_seq_num, sending_time_ms);
        Self::put_int_tag(&mut body, tags::ENCRYPT_METHOD, 0);
        Self::put_int_tag(&mut body, tags::HEART_BT_INT, heart_bt_int_s as i64);
        self.finish(body)
    }

    pub fn logout(
        &self,
        msg_seq_num: u32,
        sending_time_ms: u64,
        text: Option<&[u8]>,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::Logout, msg_seq_num, sending_time_ms);
        if let Some(text) = text {
            Self::put_tag(&mut body, tags::TEXT, text);
        }
        self.finish(body)
    }

    pub fn heartbeat(
        &self,
        test_req_id: Option<&[u8]>,
        msg_seq_num: u32,
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::Heartbeat, msg_seq_num, sending_time_ms);
        if let Some(id) = test_req_id {
            Self::put_tag(&mut body, tags::TEST_REQ_ID, id);
        }
        self.finish(body)
    }

    pub fn test_request(
        &self,
        msg_seq_num: u32,
        test_req_id: &[u8],
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::TestRequest, msg_seq_num, sending_time_ms);
        Self::put_tag(&mut body, tags::TEST_REQ_ID, test_req_id);
        self.finish(body)
    }

    pub fn reject(
        &self,
        msg_seq_num: u32,
        ref_seq_num: u32,
        ref_tag_id: Option<u32>,
        ref_msg_type: &[u8],
        reason: RejectReason,
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::Reject, msg_seq_num, sending_time_ms);
        Self::put_int_tag(&mut body, tags::REF_SEQ_NUM, ref_seq_num as i64);
        if let Some(tag) = ref_tag_id {
            Self::put_int_tag(&mut body, tags::REF_TAG_ID, tag as i64);
        }
        Self::put_tag(&mut body, tags::REF_MSG_TYPE, ref_msg_type);
        Self::put_int_tag(&mut body, tags::SESSION_REJECT_REASON, reason.code() as i64);
        self.finish(body)
    }

    pub fn resend_request(
        &self,
        msg_seq_num: u32,
        begin_seq_no: u32,
        end_seq_no: u32,
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::ResendRequest, msg_seq_num, sending_time_ms);
        Self::put_int_tag(&mut body, tags::BEGIN_SEQ_NO, begin_seq_no as i64);
        Self::put_int_tag(&mut body, tags::END_SEQ_NO, end_seq_no as i64);
        self.finish(body)
    }

    pub fn sequence_reset(
        &self,
        msg_seq_num: u32,
        new_seq_no: u32,
        gap_fill: bool,
        sending_time_ms: u64,
    ) -> CodecResult<BytesMut> {
        let mut body = self.header(&MsgType::SequenceReset, msg_seq_num, sending_time_ms);
        Self::put_int_tag(&mut body, tags::NEW_SEQ_NO, new_seq_no as i64);
        if gap_fill {
            Self::put_tag(&mut body, tags::GAP_FILL_FLAG, b"Y");
        }
        self.finish(body)
    }
}
