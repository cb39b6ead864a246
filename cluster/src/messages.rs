use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("failed to decode control message: {0}")]
    Decode(#[from] bincode::Error),
}

/// Messages broadcast on the control stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    RequestVote {
        term: u64,
        candidate_id: u16,
        /// Highest contiguous log position the candidate holds; voters
        /// refuse candidates behind their own log.
        last_position: u64,
    },
    ReplyVote {
        term: u64,
        voter_id: u16,
        candidate_id: u16,
        granted: bool,
    },
    ConsensusHeartbeat {
        term: u64,
        leader_node_id: u16,
        position: u64,
        commit_position: u64,
        /// Transport session id of the leader's data publication.
        leader_session_id: i32,
    },
}

impl ControlMessage {
    pub fn term(&self) -> u64 {
        match self {
            Self::RequestVote { term, .. }
            | Self::ReplyVote { term, .. }
            | Self::ConsensusHeartbeat { term, .. } => *term,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("control message serialization is infallible")
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(buffer)?)
    }
}

/// Messages sent follower -> leader on the acknowledgement stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AckMessage {
    Acknowledge {
        term: u64,
        node_id: u16,
        /// Highest contiguous log position the node has archived.
        position: u64,
    },
}

impl AckMessage {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("ack message serialization is infallible")
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_roundtrip() {
        let messages = [
            ControlMessage::RequestVote {
                term: 3,
                candidate_id: 2,
                last_position: 1024,
            },
            ControlMessage::ReplyVote {
                term: 3,
                voter_id: 1,
                candidate_id: 2,
                granted: true,
            },
            ControlMessage::ConsensusHeartbeat {
                term: 3,
                leader_node_id: 2,
                position: 2048,
                commit_position: 1024,
                leader_session_id: 7,
            },
        ];
        for message in messages {
            assert_eq!(ControlMessage::decode(&message.encode()).unwrap(), message);
            assert_eq!(message.term(), 3);
        }
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = AckMessage::Acknowledge {
            term: 1,
            node_id: 3,
            position: 512,
        };
        assert_eq!(AckMessage::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(ControlMessage::decode(&[0xff; 3]).is_err());
    }
}
