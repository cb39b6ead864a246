// FIX 4.x session engine: wire framing, the fixed session-layer message
// set, the per-peer session state machine, and the TCP ingress that
// bridges counterparties onto the transport log.
pub mod auth;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod network;
pub mod session;

pub use config::GatewayConfig;
pub use session::state::{Session, SessionState};
