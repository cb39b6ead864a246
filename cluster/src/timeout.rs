use rand::rngs::StdRng;
use rand::Rng;

/// Upper bound multiplier for the randomised election timeout.
pub const MAX_TO_MIN_TIMEOUT: u64 = 2;

/// Election timeout drawn uniformly from
/// `[timeout_ms, MAX_TO_MIN_TIMEOUT * timeout_ms]`. The per-node PRNG is
/// seeded from the node id, which biases nodes away from split votes.
#[derive(Debug)]
pub struct RandomTimeout {
    timeout_ms: u64,
    deadline_ms: u64,
}

impl RandomTimeout {
    pub fn new(timeout_ms: u64, rng: &mut StdRng, now_ms: u64) -> Self {
        let mut timeout = Self {
            timeout_ms,
            deadline_ms: 0,
        };
        timeout.reset(rng, now_ms);
        timeout
    }

    pub fn reset(&mut self, rng: &mut StdRng, now_ms: u64) {
        let delay = rng.gen_range(self.timeout_ms..=MAX_TO_MIN_TIMEOUT * self.timeout_ms);
        self.deadline_ms = now_ms + delay;
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }
}
