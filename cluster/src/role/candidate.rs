use crate::messages::ControlMessage;
use crate::role::NodeContext;
use crate::term_state::TermState;
use crate::timeout::RandomTimeout;
use std::collections::HashSet;
use tracing::debug;

/// Election role: broadcasts a vote request for the current term and
/// tallies replies. Wins on a majority; reverts to follower on seeing a
/// live leader; restarts with a higher term on timeout.
pub struct Candidate {
    term: u64,
    votes_granted: HashSet<u16>,
    timeout: RandomTimeout,
}

impl Candidate {
    /// Starts the election for `term_state.leadership_term_id` (already
    /// incremented by the caller): votes for itself and broadcasts the
    /// request.
    pub fn new(now_ms: u64, term_state: &TermState, ctx: &mut NodeContext) -> Self {
        let term = term_state.leadership_term_id;
        ctx.last_vote = Some((term, ctx.node_id));

        let mut votes_granted = HashSet::new();
        votes_granted.insert(ctx.node_id);

        debug!(
            node_id = ctx.node_id,
            term,
            last_position = term_state.position,
            "Requesting votes"
        );
        ctx.publish_control(&ControlMessage::RequestVote {
            term,
            candidate_id: ctx.node_id,
            last_position: term_state.position,
        });

        Self {
            term,
            votes_granted,
            timeout: RandomTimeout::new(ctx.timeout_ms, &mut ctx.rng, now_ms),
        }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn timeout_expired(&self, now_ms: u64) -> bool {
        self.timeout.expired(now_ms)
    }

    /// Registers a granted vote. Returns true when the vote counted.
    pub fn on_vote(&mut self, term: u64, voter_id: u16) -> bool {
        if term != self.term {
            return false;
        }
        self.votes_granted.insert(voter_id);
        true
    }

    pub fn has_quorum(&self, quorum: usize) -> bool {
        self.votes_granted.len() >= quorum
    }
}
