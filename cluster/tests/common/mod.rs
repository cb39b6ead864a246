use fixmesh_cluster::config::{AckStrategyKind, ClusterConfig};
use fixmesh_cluster::ClusterNode;
use fixmesh_common::agent::Agent;
use fixmesh_common::transport::Media;
use std::sync::Arc;
use tempfile::TempDir;

pub use fixmesh_cluster::timeout::MAX_TO_MIN_TIMEOUT;

pub const TIMEOUT_MS: u64 = 100;
pub const HEARTBEAT_INTERVAL_MS: u64 = TIMEOUT_MS / 2;

/// Three (or more) nodes wired to one in-process media, with a shared
/// manually advanced clock.
pub struct TestCluster {
    pub media: Arc<Media>,
    pub nodes: Vec<ClusterNode>,
    pub now_ms: u64,
    _dirs: Vec<TempDir>,
}

impl TestCluster {
    pub fn launch(size: usize) -> Self {
        Self::launch_with_strategy(size, AckStrategyKind::EntireCluster)
    }

    pub fn launch_with_strategy(size: usize, ack_strategy: AckStrategyKind) -> Self {
        let media = Media::new();
        let mut nodes = Vec::with_capacity(size);
        let mut dirs = Vec::with_capacity(size);

        for node_id in 1..=size as u16 {
            let dir = tempfile::tempdir().expect("tempdir");
            let config = ClusterConfig {
                node_id,
                cluster_size: size,
                timeout_ms: TIMEOUT_MS,
                heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
                archive_dir: dir.path().to_path_buf(),
                ack_strategy,
                ..ClusterConfig::default()
            };
            nodes.push(ClusterNode::launch(&config, &media, 0).expect("launch node"));
            dirs.push(dir);
        }

        Self {
            media,
            nodes,
            now_ms: 0,
            _dirs: dirs,
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    pub fn poll(&mut self, index: usize) -> usize {
        let now_ms = self.now_ms;
        self.nodes[index].agent.poll(now_ms)
    }

    pub fn poll_all(&mut self) {
        for index in 0..self.nodes.len() {
            self.poll(index);
        }
    }

    pub fn leader_index(&self) -> Option<usize> {
        self.nodes.iter().position(|node| node.agent.is_leader())
    }

    /// Runs rounds of `advance(step_ms)` + poll-all until a predicate
    /// holds. Panics if it never does.
    pub fn run_until(&mut self, step_ms: u64, max_rounds: usize, mut done: impl FnMut(&Self) -> bool) {
        for _ in 0..max_rounds {
            if done(self) {
                return;
            }
            self.advance(step_ms);
            self.poll_all();
        }
        panic!("cluster did not reach the expected state in {} rounds", max_rounds);
    }
}

/// Collects fragments from a cluster subscription.
#[derive(Default)]
pub struct FragmentCollector {
    pub fragments: Vec<(Vec<u8>, i32, u64)>,
}

impl fixmesh_common::transport::FragmentHandler for FragmentCollector {
    fn on_fragment(&mut self, buffer: &[u8], session_id: i32, position: u64) {
        self.fragments.push((buffer.to_vec(), session_id, position));
    }
}
