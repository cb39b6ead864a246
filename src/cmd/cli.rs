use clap::{command, Parser};
use fixmesh_cluster::config::{AckStrategyKind, ClusterConfig, ConfigError};
use fixmesh_gateway::GatewayConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fixmesh",
    version,
    about = "A clustered FIX gateway with replicated ordering"
)]
pub struct NodeCliArgs {
    /// This node's identifier, unique within the cluster
    #[arg(short, long, default_value_t = 1)]
    pub node_id: u16,

    /// Address the FIX acceptor listens on
    #[arg(short, long, default_value = "0.0.0.0:9880")]
    pub bind_address: String,

    /// Total number of cluster nodes (odd, at least 3)
    #[arg(short, long, default_value_t = 3)]
    pub cluster_size: usize,

    /// Base replication timeout in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub timeout_ms: u64,

    /// Directory for this node's replicated-log archive
    #[arg(long, default_value = "fixmesh-archive")]
    pub archive_dir: PathBuf,

    /// Quorum rule for committing replicated data
    #[arg(long, default_value = "entire-cluster", value_parser = ["entire-cluster", "majority"])]
    pub ack_strategy: String,

    /// Wire-format FIX version accepted from counterparties
    #[arg(long, default_value = "FIX.4.4")]
    pub begin_string: String,

    /// Log level for node operation
    #[arg(
        short,
        long,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: String,
}

impl NodeCliArgs {
    pub fn get_log_level(&self) -> tracing::Level {
        match self.log_level.as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            bind_address: self.bind_address.clone(),
            begin_string: self.begin_string.clone(),
            ..GatewayConfig::default()
        }
    }

    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        let ack_strategy: AckStrategyKind = self.ack_strategy.parse()?;
        let config = ClusterConfig {
            node_id: self.node_id,
            cluster_size: self.cluster_size,
            timeout_ms: self.timeout_ms,
            heartbeat_interval_ms: self.timeout_ms / 2,
            archive_dir: self.archive_dir.clone(),
            ack_strategy,
            ..ClusterConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_produce_valid_configs() {
        let args = NodeCliArgs::parse_from(["fixmesh"]);
        assert_eq!(args.node_id, 1);
        assert_eq!(args.get_log_level(), tracing::Level::INFO);

        let cluster = args.cluster_config().unwrap();
        assert_eq!(cluster.cluster_size, 3);
        assert_eq!(cluster.heartbeat_interval_ms, 500);

        let gateway = args.gateway_config();
        assert_eq!(gateway.begin_string, "FIX.4.4");
    }

    #[test]
    fn test_even_cluster_size_is_refused() {
        let args = NodeCliArgs::parse_from(["fixmesh", "--cluster-size", "4"]);
        assert!(args.cluster_config().is_err());
    }
}
