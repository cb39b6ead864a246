use crate::decoder::{FixHeader, LogonFields};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Decides whether an inbound logon is allowed to open a session.
/// Injected at construction; a failure results in a silent disconnect.
pub trait AuthenticationStrategy: Send + Sync {
    fn authenticate(&self, logon: &LogonFields<'_>, header: &FixHeader<'_>) -> bool;
}

/// Accepts every logon. The default for trusted deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthentication;

impl AuthenticationStrategy for NoAuthentication {
    fn authenticate(&self, _logon: &LogonFields<'_>, _header: &FixHeader<'_>) -> bool {
        true
    }
}

/// Verifies Password(554) against a registered per-CompID sha256 digest.
/// Only digests are held in memory; plaintext passwords are never stored.
#[derive(Default)]
pub struct DigestAuthentication {
    digests: DashMap<Vec<u8>, String>,
}

impl DigestAuthentication {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counterparty's password digest.
    pub fn register(&self, sender_comp_id: &[u8], password: &[u8]) {
        let digest = hex::encode(Sha256::digest(password));
        self.digests.insert(sender_comp_id.to_vec(), digest);
    }

    fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl AuthenticationStrategy for DigestAuthentication {
    fn authenticate(&self, logon: &LogonFields<'_>, header: &FixHeader<'_>) -> bool {
        let Some(expected) = self.digests.get(header.sender_comp_id) else {
            warn!(
                sender = %String::from_utf8_lossy(header.sender_comp_id),
                "Logon from unregistered counterparty"
            );
            return false;
        };

        let Some(password) = logon.password else {
            return false;
        };

        let provided = hex::encode(Sha256::digest(password));
        Self::constant_time_eq(provided.as_bytes(), expected.as_bytes())
    }
}
