use crate::messages::AckMessage;
use crate::role::NodeContext;
use crate::term_state::TermState;
use crate::timeout::RandomTimeout;
use tracing::debug;

/// Passive role: archives the leader's data stream, acknowledges its
/// position, and stands for election when the leader goes quiet.
pub struct Follower {
    timeout: RandomTimeout,
    last_acked_position: u64,
    next_ack_ms: u64,
    force_ack: bool,
}

impl Follower {
    pub fn new(now_ms: u64, ctx: &mut NodeContext) -> Self {
        Self {
            timeout: RandomTimeout::new(ctx.timeout_ms, &mut ctx.rng, now_ms),
            last_acked_position: 0,
            next_ack_ms: now_ms,
            force_ack: false,
        }
    }

    pub fn timeout_expired(&self, now_ms: u64) -> bool {
        self.timeout.expired(now_ms)
    }

    /// Heartbeats and granted votes both count as leader-side liveness.
    pub fn on_leader_contact(&mut self, now_ms: u64, ctx: &mut NodeContext) {
        self.timeout.reset(&mut ctx.rng, now_ms);
    }

    /// Rewinds to `position` and re-follows the data stream from there,
    /// immediately reporting the rolled-back position to the leader.
    pub fn follow(&mut self, position: u64, term_state: &mut TermState, ctx: &mut NodeContext) {
        ctx.archiver.reset_to(position);
        term_state.position = position;
        self.last_acked_position = position;
        self.force_ack = true;
        debug!(node_id = ctx.node_id, position, "Re-following data stream");
    }

    pub fn do_work(&mut self, now_ms: u64, term_state: &mut TermState, ctx: &mut NodeContext) -> usize {
        let mut work = ctx.archiver.poll(ctx.fragment_limit);
        term_state.position = ctx.archiver.position();

        if work > 0 {
            // Data from the leader is as good as a heartbeat
            self.timeout.reset(&mut ctx.rng, now_ms);
        }

        let advanced = term_state.position > self.last_acked_position;
        if advanced || self.force_ack || now_ms >= self.next_ack_ms {
            ctx.publish_ack(&AckMessage::Acknowledge {
                term: term_state.leadership_term_id,
                node_id: ctx.node_id,
                position: term_state.position,
            });
            self.last_acked_position = term_state.position;
            self.next_ack_ms = now_ms + ctx.heartbeat_interval_ms;
            self.force_ack = false;
            work += 1;
        }

        work
    }
}
