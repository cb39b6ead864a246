use fixmesh_common::types::fix::ConnectionId;

/// Frame kinds exchanged between connection tasks and session agents over
/// the inbound/outbound transport streams.
pub const KIND_DATA: u8 = 0;
pub const KIND_CONNECT: u8 = 1;
pub const KIND_DISCONNECT: u8 = 2;

const PREFIX_LEN: usize = 9;

/// Prefixes `payload` with the connection id and frame kind.
pub fn encode_frame(connection_id: ConnectionId, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&connection_id.0.to_be_bytes());
    frame.push(kind);
    frame.extend_from_slice(payload);
    frame
}

/// Splits a frame back into `(connection_id, kind, payload)`.
pub fn decode_frame(frame: &[u8]) -> Option<(ConnectionId, u8, &[u8])> {
    if frame.len() < PREFIX_LEN {
        return None;
    }
    let connection_id = ConnectionId(u64::from_be_bytes(frame[..8].try_into().unwrap()));
    Some((connection_id, frame[8], &frame[PREFIX_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = encode_frame(ConnectionId(42), KIND_DATA, b"8=FIX.4.4\x01");
        let (connection_id, kind, payload) = decode_frame(&frame).unwrap();
        assert_eq!(connection_id, ConnectionId(42));
        assert_eq!(kind, KIND_DATA);
        assert_eq!(payload, b"8=FIX.4.4\x01");
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(decode_frame(b"short").is_none());
    }
}
