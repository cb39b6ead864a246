use bytes::{BufMut, BytesMut};
use std::str;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum length for a single FIX message
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Special characters used in FIX protocol
pub const SOH: u8 = 0x01; // field separator

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("message too large: {size} bytes")]
    MessageTooLarge { size: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Handles FIX wire framing: locating complete messages in a byte stream
/// and finishing outbound messages with BodyLength(9) and CheckSum(10).
pub struct FixCodec {
    max_message_size: usize,
}

impl FixCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Attempt to extract the next complete message from a buffer.
    pub fn try_parse(&self, buf: &mut BytesMut) -> CodecResult<Option<BytesMut>> {
        // We need at least "8=FIX" to start
        if buf.len() < 5 {
            return Ok(None);
        }

        // Find the start of a FIX message
        let mut pos = 0;
        while pos + 5 <= buf.len() {
            if &buf[pos..pos + 2] == b"8=" && &buf[pos + 2..pos + 5] == b"FIX" {
                break;
            }
            pos += 1;
        }

        if pos + 5 > buf.len() {
            // No start marker yet; drop scanned garbage and keep waiting
            return Ok(None);
        }

        // Look for the body length field (tag 9), which must follow BeginString
        let mut length_start = None;
        let mut length_end = None;
        let mut i = pos + 5;

        while i + 2 <= buf.len() {
            if buf[i - 1] == SOH && &buf[i..i + 2] == b"9=" {
                length_start = Some(i + 2);
                let mut j = i + 2;
                while j < buf.len() {
                    if buf[j] == SOH {
                        length_end = Some(j);
                        break;
                    }
                    j += 1;
                }
                break;
            }
            i += 1;
        }

        let (length_start, length_end) = match (length_start, length_end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(None),
        };

        // Parse the body length
        let body_length = match str::from_utf8(&buf[length_start..length_end]) {
            Ok(len_str) => match len_str.parse::<usize>() {
                Ok(len) => len,
                Err(_) => {
                    warn!("Invalid body length format");
                    return Err(CodecError::InvalidFormat("invalid body length".into()));
                }
            },
            Err(_) => {
                warn!("Invalid UTF-8 in body length");
                return Err(CodecError::InvalidFormat(
                    "invalid body length encoding".into(),
                ));
            }
        };

        if body_length > self.max_message_size {
            warn!(length = body_length, "Message exceeds maximum size");
            return Err(CodecError::MessageTooLarge { size: body_length });
        }

        // Body starts after the SOH terminating BodyLength; the trailer is
        // "10=NNN" + SOH = 7 bytes.
        let body_start = length_end + 1;
        let msg_end = body_start + body_length + 7;
        if buf.len() < msg_end {
            // Don't have the complete message yet
            return Ok(None);
        }

        if !Self::verify_checksum(&buf[pos..msg_end]) {
            warn!("Invalid message checksum");
            return Err(CodecError::InvalidFormat("invalid checksum".into()));
        }

        // Discard anything before the start marker, then split the message off
        let _ = buf.split_to(pos);
        let message = buf.split_to(msg_end - pos);
        debug!(length = message.len(), "Extracted complete FIX message");

        Ok(Some(message))
    }

    /// Verify the trailing CheckSum(10): modulo-256 sum of every byte up to
    /// and including the SOH before the checksum field, as three decimal
    /// digits.
    pub fn verify_checksum(data: &[u8]) -> bool {
        if data.len() < 8 {
            return false;
        }
        let mut i = data.len() - 7;
        loop {
            if &data[i..i + 3] == b"10=" && (i == 0 || data[i - 1] == SOH) {
                let expected = match str::from_utf8(&data[i + 3..i + 6])
                    .ok()
                    .and_then(|s| s.parse::<u8>().ok())
                {
                    Some(value) => value,
                    None => return false,
                };
                let actual: u8 = data[..i]
                    .iter()
                    .fold(0u8, |sum, &byte| sum.wrapping_add(byte));
                return expected == actual;
            }
            if i == 0 {
                return false;
            }
            i -= 1;
        }
    }

    /// Finish an outbound message: given the payload from MsgType(35)
    /// onward, prepend BeginString(8) and BodyLength(9) and append
    /// CheckSum(10).
    pub fn finish_message(begin_string: &[u8], body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(begin_string.len() + body.len() + 24);
        buf.put_slice(b"8=");
        buf.put_slice(begin_string);
        buf.put_u8(SOH);
        buf.put_slice(b"9=");
        buf.put_slice(body.len().to_string().as_bytes());
        buf.put_u8(SOH);
        buf.put_slice(body);

        let sum: u8 = buf.iter().fold(0u8, |acc, &x| acc.wrapping_add(x));
        buf.put_slice(b"10=");
        buf.put_slice(format!("{:03}", sum).as_bytes());
        buf.put_u8(SOH);

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FixCodec {
        FixCodec::new(MAX_MESSAGE_LENGTH)
    }

    /// Build a well-formed wire message from a body (everything after the
    /// BodyLength SOH, before the checksum).
    fn wire(body: &[u8]) -> BytesMut {
        FixCodec::finish_message(b"FIX.4.4", body)
    }

    #[test]
    fn test_message_extraction() {
        let mut buf = wire(b"35=0\x0134=2\x01");
        let result = codec().try_parse(&mut buf).unwrap();
        assert!(result.is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_message() {
        let full = wire(b"35=0\x0134=2\x01");
        let mut buf = BytesMut::from(&full[..full.len() - 4]);
        let result = codec().try_parse(&mut buf).unwrap();
        assert!(result.is_none());
        // Nothing consumed while incomplete
        assert_eq!(buf.len(), full.len() - 4);
    }

    #[test]
    fn test_invalid_message_is_not_an_error() {
        let mut buf = BytesMut::from(&b"not a fix message"[..]);
        let result = codec().try_parse(&mut buf);
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_checksum_rejected() {
        let mut buf = wire(b"35=0\x0134=2\x01");
        let len = buf.len();
        // Corrupt the last checksum digit
        buf[len - 2] = if buf[len - 2] == b'9' { b'0' } else { b'9' };
        let result = codec().try_parse(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn test_multiple_messages() {
        let mut buf = wire(b"35=0\x0134=2\x01");
        buf.extend_from_slice(&wire(b"35=1\x0134=3\x01112=TEST\x01"));

        let codec = codec();
        let msg1 = codec.try_parse(&mut buf).unwrap();
        assert!(msg1.is_some());

        let msg2 = codec.try_parse(&mut buf).unwrap();
        assert!(msg2.is_some());

        let msg3 = codec.try_parse(&mut buf).unwrap();
        assert!(msg3.is_none());
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let mut buf = BytesMut::from(&b"\x00\x00junk"[..]);
        buf.extend_from_slice(&wire(b"35=0\x0134=2\x01"));
        let result = codec().try_parse(&mut buf).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_oversize_message_rejected() {
        let codec = FixCodec::new(64);
        let body = vec![b'X'; 200];
        let mut framed = BytesMut::new();
        framed.put_slice(b"8=FIX.4.4\x019=200\x01");
        framed.put_slice(&body);
        framed.put_slice(b"10=000\x01");
        let result = codec.try_parse(&mut framed);
        assert!(matches!(result, Err(CodecError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_finish_message_roundtrips_checksum() {
        let msg = wire(b"35=0\x0134=2\x01");
        assert!(FixCodec::verify_checksum(&msg));
        assert!(msg.ends_with(&[SOH]));
    }
}
