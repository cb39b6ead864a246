use crate::ack::{
    AcknowledgementStrategy, EntireClusterAcknowledgementStrategy, MajorityAcknowledgementStrategy,
};
use crate::archive::{ArchiveError, ArchiveReader, Archiver, LogDirectoryDescriptor};
use crate::config::{
    AckStrategyKind, ClusterConfig, ConfigError, DEFAULT_ACKNOWLEDGEMENT_STREAM_ID,
    DEFAULT_CONTROL_STREAM_ID, DEFAULT_DATA_STREAM_ID,
};
use crate::publication::ClusterPublication;
use crate::role::{Follower, Leader, NodeContext, Role};
use crate::subscription::ClusterSubscription;
use crate::term_state::TermState;
use fixmesh_common::agent::Agent;
use fixmesh_common::transport::Media;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Owns one node's replication state: the current role, the term state,
/// and the transport handles. Role transitions are value replacements
/// applied at the end of each poll step, so exactly one role ever holds
/// the term state.
pub struct ClusterAgent {
    role: Role,
    term_state: TermState,
    ctx: NodeContext,
    name: String,
}

impl ClusterAgent {
    /// `data_session_id` identifies this node's own data publication;
    /// the agent never writes that stream itself, it only archives it
    /// and advertises the session id while leading.
    fn new(
        config: &ClusterConfig,
        media: &Media,
        data_session_id: i32,
        now_ms: u64,
    ) -> Result<Self, LaunchError> {
        config.validate()?;

        let descriptor = LogDirectoryDescriptor::new(
            config.archive_dir.join(format!("node-{}", config.node_id)),
        );
        let archiver = Archiver::new(descriptor, media.add_subscription(DEFAULT_DATA_STREAM_ID))?;

        let ack_strategy: Box<dyn AcknowledgementStrategy> = match config.ack_strategy {
            AckStrategyKind::EntireCluster => Box::new(EntireClusterAcknowledgementStrategy),
            AckStrategyKind::Majority => Box::new(MajorityAcknowledgementStrategy),
        };

        let mut ctx = NodeContext {
            node_id: config.node_id,
            cluster_size: config.cluster_size,
            data_session_id,
            timeout_ms: config.timeout_ms,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            fragment_limit: config.fragment_limit,
            control_publication: media.add_publication(DEFAULT_CONTROL_STREAM_ID),
            control_subscription: media.add_subscription(DEFAULT_CONTROL_STREAM_ID),
            ack_publication: media.add_publication(DEFAULT_ACKNOWLEDGEMENT_STREAM_ID),
            ack_subscription: media.add_subscription(DEFAULT_ACKNOWLEDGEMENT_STREAM_ID),
            archiver,
            ack_strategy,
            rng: StdRng::seed_from_u64(config.node_id as u64),
            last_vote: None,
        };

        let role = Role::Follower(Follower::new(now_ms, &mut ctx));
        info!(node_id = config.node_id, "Cluster agent starting as follower");

        Ok(Self {
            role,
            term_state: TermState::new(),
            ctx,
            name: format!("cluster-node-{}", config.node_id),
        })
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self.role, Role::Candidate(_))
    }

    pub fn is_follower(&self) -> bool {
        matches!(self.role, Role::Follower(_))
    }

    pub fn role_name(&self) -> &'static str {
        self.role.name()
    }

    pub fn term_state(&self) -> &TermState {
        &self.term_state
    }

    pub fn leadership_term_id(&self) -> u64 {
        self.term_state.leadership_term_id
    }

    pub fn commit_position(&self) -> u64 {
        self.term_state.commit_position()
    }

    pub fn position(&self) -> u64 {
        self.term_state.position
    }

    /// Takes leadership without an election. Deterministic bring-up for
    /// tests and single-leader deployments where the first node seeds
    /// the cluster.
    pub fn assume_leadership(&mut self, now_ms: u64) {
        self.term_state.leadership_term_id += 1;
        self.role = Role::Leader(Leader::new(now_ms, &mut self.term_state, &mut self.ctx));
    }

    /// Re-follows the data stream from `position`. Only meaningful on a
    /// follower; used when a preceding fragment was lost locally.
    pub fn follow(&mut self, position: u64) {
        match &mut self.role {
            Role::Follower(follower) => {
                follower.follow(position, &mut self.term_state, &mut self.ctx)
            }
            _ => warn!(
                node_id = self.ctx.node_id,
                role = self.role.name(),
                "follow() ignored outside the follower role"
            ),
        }
    }
}

impl Agent for ClusterAgent {
    fn poll(&mut self, now_ms: u64) -> usize {
        self.role.poll(now_ms, &mut self.term_state, &mut self.ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One node's replication stack: the role agent plus the application
/// facades over the replicated log.
pub struct ClusterNode {
    pub agent: ClusterAgent,
    pub publication: ClusterPublication,
    pub subscription: ClusterSubscription,
    pub archive_reader: ArchiveReader,
}

impl ClusterNode {
    pub fn launch(
        config: &ClusterConfig,
        media: &Arc<Media>,
        now_ms: u64,
    ) -> Result<Self, LaunchError> {
        let data_publication = Arc::new(media.add_publication(DEFAULT_DATA_STREAM_ID));
        let agent = ClusterAgent::new(config, media, data_publication.session_id(), now_ms)?;

        let publication = ClusterPublication::new(
            Arc::clone(&data_publication),
            agent.term_state.leader_session_id_handle(),
        );

        let subscription = ClusterSubscription::new(
            media.add_subscription(DEFAULT_DATA_STREAM_ID),
            agent.term_state.leader_session_id_handle(),
            agent.term_state.commit_position_handle(),
        );

        let descriptor = LogDirectoryDescriptor::new(
            config.archive_dir.join(format!("node-{}", config.node_id)),
        );
        let archive_reader = ArchiveReader::new(descriptor, DEFAULT_DATA_STREAM_ID);

        Ok(Self {
            agent,
            publication,
            subscription,
            archive_reader,
        })
    }
}
