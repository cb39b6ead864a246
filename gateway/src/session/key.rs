use crate::decoder::FixHeader;
use std::fmt;

/// The hashable identity of one FIX counterparty relationship, used to
/// deduplicate sessions across reconnects. Components are the raw ASCII
/// bytes from the wire; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub sender_comp_id: Vec<u8>,
    pub sender_sub_id: Vec<u8>,
    pub target_comp_id: Vec<u8>,
}

impl CompositeKey {
    pub fn new(sender_comp_id: &[u8], sender_sub_id: &[u8], target_comp_id: &[u8]) -> Self {
        Self {
            sender_comp_id: sender_comp_id.to_vec(),
            sender_sub_id: sender_sub_id.to_vec(),
            target_comp_id: target_comp_id.to_vec(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}->{}",
            String::from_utf8_lossy(&self.sender_comp_id),
            String::from_utf8_lossy(&self.sender_sub_id),
            String::from_utf8_lossy(&self.target_comp_id),
        )
    }
}

/// Derives session identities from logons. Strategies make no assumptions
/// about the nature of the identifiers; they only pick which header
/// fields participate.
pub trait SessionIdStrategy: Send + Sync {
    /// Key for a session accepted from an inbound logon. The key is our
    /// outbound identity, so sender and target are swapped relative to
    /// the inbound header.
    fn acceptor_key(&self, header: &FixHeader<'_>) -> CompositeKey;

    /// Key for a session we initiate, from configured identifiers.
    fn initiator_key(
        &self,
        sender_comp_id: &[u8],
        sender_sub_id: &[u8],
        target_comp_id: &[u8],
    ) -> CompositeKey;
}

/// Default strategy: SenderCompID + SenderSubID + TargetCompID.
#[derive(Debug, Default, Clone, Copy)]
pub struct SenderTargetAndSubStrategy;

impl SessionIdStrategy for SenderTargetAndSubStrategy {
    fn acceptor_key(&self, header: &FixHeader<'_>) -> CompositeKey {
        CompositeKey::new(
            header.target_comp_id,
            header.target_sub_id,
            header.sender_comp_id,
        )
    }

    fn initiator_key(
        &self,
        sender_comp_id: &[u8],
        sender_sub_id: &[u8],
        target_comp_id: &[u8],
    ) -> CompositeKey {
        CompositeKey::new(sender_comp_id, sender_sub_id, target_comp_id)
    }
}
