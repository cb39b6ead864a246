mod cmd;
mod metrics;
mod runner;

use anyhow::Context;
use clap::Parser;
use cmd::cli::NodeCliArgs;
use fixmesh_cluster::ClusterNode;
use fixmesh_common::agent::Agent;
use fixmesh_common::clock::{EpochClock, SystemEpochClock};
use fixmesh_common::transport::{FragmentHandler, Media};
use fixmesh_gateway::auth::NoAuthentication;
use fixmesh_gateway::config::{DEFAULT_INBOUND_STREAM_ID, DEFAULT_OUTBOUND_STREAM_ID};
use fixmesh_gateway::network::FixListener;
use fixmesh_gateway::session::{
    GatewayAgent, SenderTargetAndSubStrategy, SessionParser, SessionRegistry,
};
use metrics::{MeteredAgent, MetricsAgent, NodeMetrics};
use prometheus_client::registry::Registry;
use runner::AgentRunner;
use std::sync::Arc;
use tracing::{debug, info};

const METRICS_REPORT_INTERVAL_MS: u64 = 60_000;

/// Placeholder application layer: logs every committed fragment the
/// cluster delivers. Deployments replace this with their own handler
/// wired to the same subscription.
struct ReplicatedLogAgent {
    subscription: fixmesh_cluster::ClusterSubscription,
    fragment_limit: usize,
}

impl Agent for ReplicatedLogAgent {
    fn poll(&mut self, _now_ms: u64) -> usize {
        let mut log_fragment = |buffer: &[u8], session_id: i32, position: u64| {
            debug!(
                session_id,
                position,
                length = buffer.len(),
                "Committed fragment"
            );
        };
        let handler: &mut dyn FragmentHandler = &mut log_fragment;
        self.subscription.poll(handler, self.fragment_limit)
    }

    fn name(&self) -> &str {
        "replicated-log"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NodeCliArgs::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.get_log_level())
        .init();
    info!(node_id = args.node_id, "Starting fixmesh node");

    let clock: Arc<dyn EpochClock> = Arc::new(SystemEpochClock);
    let media = Media::new();

    // Replication stack
    let cluster_config = args.cluster_config().context("invalid cluster config")?;
    let ClusterNode {
        agent: cluster_agent,
        publication: _cluster_publication,
        subscription: cluster_subscription,
        archive_reader: _archive_reader,
    } = ClusterNode::launch(&cluster_config, &media, clock.time())
        .context("failed to launch cluster node")?;

    // FIX session stack
    let gateway_config = args.gateway_config();
    let parser = SessionParser::new(
        Arc::new(SenderTargetAndSubStrategy),
        Arc::new(NoAuthentication),
    );
    let session_registry = Arc::new(SessionRegistry::new(args.node_id));
    let gateway_agent = GatewayAgent::new(
        gateway_config.clone(),
        Arc::clone(&clock),
        parser,
        session_registry,
        media.add_subscription(DEFAULT_INBOUND_STREAM_ID),
        Arc::new(media.add_publication(DEFAULT_OUTBOUND_STREAM_ID)),
    );

    // Metrics
    let mut registry = Registry::default();
    let node_metrics = NodeMetrics::register(&mut registry);

    let replicated_log_agent = ReplicatedLogAgent {
        subscription: cluster_subscription,
        fragment_limit: cluster_config.fragment_limit,
    };

    let mut agent_runner = AgentRunner::new(Arc::clone(&clock));
    agent_runner.spawn(
        "fixmesh-gateway",
        vec![Box::new(MeteredAgent::new(
            Box::new(gateway_agent),
            node_metrics.clone(),
        ))],
    );
    agent_runner.spawn(
        "fixmesh-cluster",
        vec![
            Box::new(MeteredAgent::new(Box::new(cluster_agent), node_metrics)),
            Box::new(replicated_log_agent),
            Box::new(MetricsAgent::new(registry, METRICS_REPORT_INTERVAL_MS)),
        ],
    );

    // The listener owns the async side; agents run on their own threads
    let listener = FixListener::new(
        gateway_config,
        Arc::clone(&media),
        DEFAULT_INBOUND_STREAM_ID,
        DEFAULT_OUTBOUND_STREAM_ID,
    );
    let result = listener.run().await;

    agent_runner.shutdown();
    result.context("listener terminated")
}
