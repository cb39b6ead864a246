use fixmesh_common::agent::Agent;
use fixmesh_common::clock::EpochClock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff applied when a pass over all agents did no work.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Composes agents onto OS threads. Each thread polls its agents
/// round-robin; a fully idle pass sleeps briefly. Agents never share
/// mutable state across threads, so shutdown is just a flag.
pub struct AgentRunner {
    clock: Arc<dyn EpochClock>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl AgentRunner {
    pub fn new(clock: Arc<dyn EpochClock>) -> Self {
        Self {
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Starts a named thread running `agents` until shutdown.
    pub fn spawn(&mut self, thread_name: &str, mut agents: Vec<Box<dyn Agent>>) {
        let clock = Arc::clone(&self.clock);
        let shutdown = Arc::clone(&self.shutdown);
        let name = thread_name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(thread = %name, agents = agents.len(), "Agent thread started");
                while !shutdown.load(Ordering::Relaxed) {
                    let now_ms = clock.time();
                    let mut work = 0;
                    for agent in agents.iter_mut() {
                        work += agent.poll(now_ms);
                    }
                    if work == 0 {
                        std::thread::sleep(IDLE_SLEEP);
                    }
                }
                for agent in agents.iter_mut() {
                    agent.on_close();
                }
                info!(thread = %name, "Agent thread stopped");
            })
            .expect("failed to spawn agent thread");

        self.threads.push(handle);
    }

    /// Signals every thread to stop and joins them.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.threads {
            if let Err(e) = handle.join() {
                warn!("Agent thread panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixmesh_common::clock::ManualEpochClock;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        polls: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Agent for CountingAgent {
        fn poll(&mut self, _now_ms: u64) -> usize {
            self.polls.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn name(&self) -> &str {
            "counting"
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_runner_polls_and_closes_agents() {
        let clock = Arc::new(ManualEpochClock::new(0));
        let polls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let mut runner = AgentRunner::new(clock);
        runner.spawn(
            "test-agents",
            vec![Box::new(CountingAgent {
                polls: Arc::clone(&polls),
                closed: Arc::clone(&closed),
            })],
        );

        while polls.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }

        runner.shutdown();
        assert!(closed.load(Ordering::SeqCst));
    }
}
