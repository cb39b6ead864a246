use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DATA_STREAM_ID: i32 = 1;
pub const DEFAULT_CONTROL_STREAM_ID: i32 = 2;
pub const DEFAULT_ACKNOWLEDGEMENT_STREAM_ID: i32 = 3;

pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_FRAGMENT_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cluster size must be odd and at least 3, got {0}")]
    InvalidClusterSize(usize),

    #[error("timeout must be positive")]
    InvalidTimeout,

    #[error("unknown acknowledgement strategy: {0}")]
    UnknownStrategy(String),
}

/// Which quorum rule maps follower positions to a committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStrategyKind {
    /// Commit only what every node has archived (min).
    EntireCluster,
    /// Commit what a majority has archived (median).
    Majority,
}

impl FromStr for AckStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entire-cluster" => Ok(Self::EntireCluster),
            "majority" => Ok(Self::Majority),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Replication configuration for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's identifier, unique within the cluster.
    pub node_id: u16,
    /// Total number of nodes; must be odd and at least 3.
    pub cluster_size: usize,
    /// Base election timeout; the effective timeout is randomised in
    /// `[timeout_ms, 2 * timeout_ms]`.
    pub timeout_ms: u64,
    /// Leader heartbeat cadence; defaults to half the base timeout.
    pub heartbeat_interval_ms: u64,
    /// Directory for this node's archive segments.
    pub archive_dir: PathBuf,
    /// Fragments handled per agent poll.
    pub fragment_limit: usize,
    pub ack_strategy: AckStrategyKind,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            cluster_size: 3,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_TIMEOUT_MS / 2,
            archive_dir: PathBuf::from("fixmesh-archive"),
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            ack_strategy: AckStrategyKind::EntireCluster,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_size < 3 || self.cluster_size % 2 == 0 {
            return Err(ConfigError::InvalidClusterSize(self.cluster_size));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Node ids of the whole cluster, ours included. Nodes are numbered
    /// from 1.
    pub fn all_node_ids(&self) -> Vec<u16> {
        (1..=self.cluster_size as u16).collect()
    }
}
