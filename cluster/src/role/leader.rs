use crate::ack::PositionMap;
use crate::messages::{AckMessage, ControlMessage};
use crate::role::NodeContext;
use crate::term_state::TermState;
use tracing::{debug, info};

/// Active role: orders the data stream, aggregates follower
/// acknowledgements into the commit position, and keeps followers alive
/// with consensus heartbeats.
pub struct Leader {
    term: u64,
    position_map: PositionMap,
    next_heartbeat_ms: u64,
    /// Local position at the last heartbeat slot; data sent since then
    /// defers the next heartbeat, since data carries the same liveness.
    position_at_last_slot: u64,
}

impl Leader {
    pub fn new(now_ms: u64, term_state: &mut TermState, ctx: &mut NodeContext) -> Self {
        let term = term_state.leadership_term_id;
        term_state.set_leader_session_id(Some(ctx.data_session_id));

        let mut position_map = PositionMap::new((1..=ctx.cluster_size as u16).collect());
        position_map.update(ctx.node_id, term_state.position);

        info!(
            node_id = ctx.node_id,
            term,
            position = term_state.position,
            "Leading"
        );

        Self {
            term,
            position_map,
            // Announce leadership on the first poll
            next_heartbeat_ms: now_ms,
            position_at_last_slot: term_state.position,
        }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// Defers the next heartbeat slot, for callers that know data was
    /// just sent on the data stream.
    pub fn update_next_heartbeat_time(&mut self, now_ms: u64, ctx: &NodeContext) {
        self.next_heartbeat_ms = now_ms + ctx.heartbeat_interval_ms;
    }

    pub fn do_work(&mut self, now_ms: u64, term_state: &mut TermState, ctx: &mut NodeContext) -> usize {
        // Archive our own data stream; our position counts towards quorum
        let mut work = ctx.archiver.poll(ctx.fragment_limit);
        term_state.position = ctx.archiver.position();
        self.position_map.update(ctx.node_id, term_state.position);

        let acks = ctx.drain_acks();
        work += acks.len();
        for AckMessage::Acknowledge {
            term,
            node_id,
            position,
        } in acks
        {
            if term > self.term {
                // Will be resolved by the control stream; don't count
                // positions from a future epoch
                continue;
            }
            self.position_map.update(node_id, position);
        }

        if let Some(consensus_position) = ctx.ack_strategy.committed_position(&self.position_map) {
            // Never commit past what is contiguously archived locally
            let bounded = consensus_position.min(term_state.position);
            if term_state.advance_commit_position(bounded) {
                debug!(
                    node_id = ctx.node_id,
                    commit_position = bounded,
                    "Commit position advanced"
                );
                self.emit_heartbeat(now_ms, term_state, ctx);
                work += 1;
            }
        }

        work
    }

    /// Periodic heartbeat, skipped when data went out during the current
    /// slot: data frames carry the term and leader identity already.
    pub fn check_heartbeat(&mut self, now_ms: u64, term_state: &TermState, ctx: &NodeContext) -> usize {
        if term_state.position > self.position_at_last_slot {
            self.position_at_last_slot = term_state.position;
            self.next_heartbeat_ms = now_ms + ctx.heartbeat_interval_ms;
            return 0;
        }

        if now_ms >= self.next_heartbeat_ms {
            self.emit_heartbeat(now_ms, term_state, ctx);
            1
        } else {
            0
        }
    }

    fn emit_heartbeat(&mut self, now_ms: u64, term_state: &TermState, ctx: &NodeContext) {
        ctx.publish_control(&ControlMessage::ConsensusHeartbeat {
            term: self.term,
            leader_node_id: ctx.node_id,
            position: term_state.position,
            commit_position: term_state.commit_position(),
            leader_session_id: ctx.data_session_id,
        });
        self.next_heartbeat_ms = now_ms + ctx.heartbeat_interval_ms;
        self.position_at_last_slot = term_state.position;
    }
}
