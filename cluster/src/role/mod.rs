pub mod candidate;
pub mod follower;
pub mod leader;

pub use candidate::Candidate;
pub use follower::Follower;
pub use leader::Leader;

use crate::ack::AcknowledgementStrategy;
use crate::archive::Archiver;
use crate::messages::{AckMessage, ControlMessage};
use crate::term_state::TermState;
use fixmesh_common::transport::{Publication, Subscription};
use rand::rngs::StdRng;
use tracing::{debug, error, info};

/// Per-node handles shared by every role: the transport trio, the
/// archiver, the quorum rule, and the state that must survive role
/// transitions (PRNG, last vote cast).
pub struct NodeContext {
    pub node_id: u16,
    pub cluster_size: usize,
    /// Session id of this node's own data publication; what followers
    /// adopt as `leader_session_id` when this node leads.
    pub data_session_id: i32,
    pub timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub fragment_limit: usize,
    pub control_publication: Publication,
    pub control_subscription: Subscription,
    pub ack_publication: Publication,
    pub ack_subscription: Subscription,
    pub archiver: Archiver,
    pub ack_strategy: Box<dyn AcknowledgementStrategy>,
    pub rng: StdRng,
    /// Last vote cast (term, candidate), kept across role changes so a
    /// node never votes twice in one term.
    pub last_vote: Option<(u64, u16)>,
}

impl NodeContext {
    pub fn quorum(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    pub fn publish_control(&self, message: &ControlMessage) {
        if let Err(e) = self.control_publication.offer(&message.encode()) {
            error!(node_id = self.node_id, error = %e, "Failed to publish control message");
        }
    }

    pub fn publish_ack(&self, message: &AckMessage) {
        if let Err(e) = self.ack_publication.offer(&message.encode()) {
            error!(node_id = self.node_id, error = %e, "Failed to publish acknowledgement");
        }
    }

    pub fn drain_control(&mut self) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        let mut collect = |buffer: &[u8], _session: i32, _position: u64| {
            match ControlMessage::decode(buffer) {
                Ok(message) => messages.push(message),
                Err(e) => error!(error = %e, "Undecodable control message"),
            }
        };
        self.control_subscription.poll(&mut collect, self.fragment_limit);
        messages
    }

    pub fn drain_acks(&mut self) -> Vec<AckMessage> {
        let mut messages = Vec::new();
        let mut collect = |buffer: &[u8], _session: i32, _position: u64| {
            match AckMessage::decode(buffer) {
                Ok(message) => messages.push(message),
                Err(e) => error!(error = %e, "Undecodable acknowledgement"),
            }
        };
        self.ack_subscription.poll(&mut collect, self.fragment_limit);
        messages
    }

    /// Raft single-vote rule: a node may vote for `candidate` in `term`
    /// unless it already voted for someone else in that term.
    fn may_vote_for(&self, term: u64, candidate_id: u16) -> bool {
        match self.last_vote {
            None => true,
            Some((voted_term, voted_for)) => {
                term > voted_term || (term == voted_term && voted_for == candidate_id)
            }
        }
    }
}

/// The node's current role. Transitions replace the whole value, so no
/// stale role state survives a handover.
pub enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Follower(_) => "follower",
            Self::Candidate(_) => "candidate",
            Self::Leader(_) => "leader",
        }
    }

    /// One bounded unit of work: role-specific stream handling, then
    /// timers (which may replace the role), then shared control-message
    /// dispatch (which may also replace it).
    pub fn poll(&mut self, now_ms: u64, term_state: &mut TermState, ctx: &mut NodeContext) -> usize {
        let mut work = match self {
            Self::Follower(follower) => follower.do_work(now_ms, term_state, ctx),
            Self::Candidate(_) => 0,
            Self::Leader(leader) => leader.do_work(now_ms, term_state, ctx),
        };

        work += self.check_timers(now_ms, term_state, ctx);

        let messages = ctx.drain_control();
        work += messages.len();
        for message in messages {
            self.on_control(message, now_ms, term_state, ctx);
        }

        work
    }

    fn check_timers(&mut self, now_ms: u64, term_state: &mut TermState, ctx: &mut NodeContext) -> usize {
        if let Self::Leader(leader) = self {
            return leader.check_heartbeat(now_ms, term_state, ctx);
        }

        let expired = match self {
            Self::Follower(follower) => follower.timeout_expired(now_ms),
            Self::Candidate(candidate) => candidate.timeout_expired(now_ms),
            Self::Leader(_) => false,
        };
        if !expired {
            return 0;
        }

        if matches!(self, Self::Follower(_)) {
            info!(
                node_id = ctx.node_id,
                term = term_state.leadership_term_id + 1,
                "Election timeout, standing for leadership"
            );
            term_state.set_leader_session_id(None);
        } else {
            debug!(
                node_id = ctx.node_id,
                term = term_state.leadership_term_id + 1,
                "Election timed out without quorum, restarting"
            );
        }
        term_state.leadership_term_id += 1;
        *self = Self::Candidate(Candidate::new(now_ms, term_state, ctx));
        1
    }

    fn on_control(
        &mut self,
        message: ControlMessage,
        now_ms: u64,
        term_state: &mut TermState,
        ctx: &mut NodeContext,
    ) {
        if message.term() < term_state.leadership_term_id {
            // Stale term: drop
            return;
        }

        match message {
            ControlMessage::ConsensusHeartbeat {
                term,
                leader_node_id,
                position: _,
                commit_position,
                leader_session_id,
            } => {
                if leader_node_id == ctx.node_id {
                    // Our own broadcast
                    return;
                }

                let step_down = match self {
                    Self::Follower(_) => false,
                    Self::Candidate(_) => true,
                    Self::Leader(_) => term > term_state.leadership_term_id,
                };
                if step_down {
                    info!(
                        node_id = ctx.node_id,
                        term,
                        leader = leader_node_id,
                        "Observed a leader, stepping down to follower"
                    );
                    *self = Self::Follower(Follower::new(now_ms, ctx));
                } else if matches!(self, Self::Leader(_)) {
                    return;
                }

                term_state.leadership_term_id = term;
                term_state.set_leader_session_id(Some(leader_session_id));
                let bounded = commit_position.min(term_state.position);
                term_state.advance_commit_position(bounded);

                if let Self::Follower(follower) = self {
                    follower.on_leader_contact(now_ms, ctx);
                }
            }

            ControlMessage::RequestVote {
                term,
                candidate_id,
                last_position,
            } => {
                if candidate_id == ctx.node_id {
                    return;
                }

                if term > term_state.leadership_term_id && !matches!(self, Self::Follower(_)) {
                    info!(
                        node_id = ctx.node_id,
                        term, "Higher-term election observed, stepping down"
                    );
                    *self = Self::Follower(Follower::new(now_ms, ctx));
                }

                let granted = matches!(self, Self::Follower(_))
                    && ctx.may_vote_for(term, candidate_id)
                    && last_position >= term_state.position;

                if granted {
                    ctx.last_vote = Some((term, candidate_id));
                    term_state.leadership_term_id = term;
                    if let Self::Follower(follower) = self {
                        follower.on_leader_contact(now_ms, ctx);
                    }
                }

                debug!(
                    node_id = ctx.node_id,
                    candidate = candidate_id,
                    term,
                    granted,
                    "Vote request"
                );
                ctx.publish_control(&ControlMessage::ReplyVote {
                    term,
                    voter_id: ctx.node_id,
                    candidate_id,
                    granted,
                });
            }

            ControlMessage::ReplyVote {
                term,
                voter_id,
                candidate_id,
                granted,
            } => {
                if candidate_id != ctx.node_id || !granted {
                    return;
                }
                let won = match self {
                    Self::Candidate(candidate) => {
                        candidate.on_vote(term, voter_id) && candidate.has_quorum(ctx.quorum())
                    }
                    _ => false,
                };
                if won {
                    info!(
                        node_id = ctx.node_id,
                        term = term_state.leadership_term_id,
                        "Won election, becoming leader"
                    );
                    *self = Self::Leader(Leader::new(now_ms, term_state, ctx));
                }
            }
        }
    }
}
