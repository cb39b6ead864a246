// Shared vocabulary for the gateway and the replication core.
pub mod agent;
pub mod clock;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use agent::Agent;
pub use clock::{EpochClock, ManualEpochClock, SystemEpochClock};
pub use types::fix::{ConnectionId, MsgType, RejectReason, SessionId};
