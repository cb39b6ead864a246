use serde::{Deserialize, Serialize};

pub const DEFAULT_BEGIN_STRING: &str = "FIX.4.4";

/// Transport stream carrying framed inbound FIX messages from
/// connection tasks to the session agent.
pub const DEFAULT_INBOUND_STREAM_ID: i32 = 100;
/// Transport stream carrying outbound FIX messages and disconnect
/// requests back to connection tasks.
pub const DEFAULT_OUTBOUND_STREAM_ID: i32 = 101;
pub const DEFAULT_HEARTBEAT_INTERVAL_S: i32 = 10;
pub const DEFAULT_ENCODER_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_SENDING_TIME_WINDOW_MS: u64 = 2 * 60 * 1000;

/// Configuration for the FIX session layer.
///
/// The consumer constructs this however it wants (CLI, env, hardcoded) —
/// the gateway does no file I/O of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the FIX acceptor listens on.
    pub bind_address: String,
    /// Wire-format FIX version; inbound BeginString(8) must match bytewise.
    pub begin_string: String,
    /// Fallback HeartBtInt (seconds) when a logon does not carry one.
    pub default_heartbeat_interval_s: i32,
    /// Scratch buffer for the outbound encoder, in bytes.
    pub encoder_buffer_size: usize,
    /// Accepted skew on SendingTime(52), in milliseconds either side of now.
    pub sending_time_window_ms: u64,
    /// Maximum inbound message size accepted by the framing codec.
    pub max_message_size: usize,
    /// Fragments drained per session agent poll.
    pub fragment_limit: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9880".to_string(),
            begin_string: DEFAULT_BEGIN_STRING.to_string(),
            default_heartbeat_interval_s: DEFAULT_HEARTBEAT_INTERVAL_S,
            encoder_buffer_size: DEFAULT_ENCODER_BUFFER_SIZE,
            sending_time_window_ms: DEFAULT_SENDING_TIME_WINDOW_MS,
            max_message_size: 4096,
            fragment_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.begin_string, "FIX.4.4");
        assert_eq!(config.sending_time_window_ms, 120_000);
        assert_eq!(config.encoder_buffer_size, 8192);
    }
}
