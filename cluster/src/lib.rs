// Raft-style replication core: an ordered data stream is appended by the
// current leader, acknowledged by followers, and committed once a quorum
// has archived it. Roles share a term state and hand off by value.
pub mod ack;
pub mod agent;
pub mod archive;
pub mod config;
pub mod messages;
pub mod publication;
pub mod role;
pub mod subscription;
pub mod term_state;
pub mod timeout;

pub use agent::{ClusterAgent, ClusterNode};
pub use config::ClusterConfig;
pub use publication::ClusterPublication;
pub use subscription::ClusterSubscription;
pub use term_state::TermState;
