use fixmesh_common::agent::Agent;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tracing::{error, info};

/// Node-level counters. Counters are cheap clone-shared handles; the
/// registry keeps the canonical view for encoding.
#[derive(Clone)]
pub struct NodeMetrics {
    pub agent_polls: Counter,
    pub agent_work_items: Counter,
}

impl NodeMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let agent_polls = Counter::default();
        registry.register(
            "fixmesh_agent_polls",
            "Total agent poll invocations",
            agent_polls.clone(),
        );

        let agent_work_items = Counter::default();
        registry.register(
            "fixmesh_agent_work_items",
            "Total work items processed by agents",
            agent_work_items.clone(),
        );

        Self {
            agent_polls,
            agent_work_items,
        }
    }
}

/// Wraps an agent to count its polls and processed work items.
pub struct MeteredAgent {
    inner: Box<dyn Agent>,
    metrics: NodeMetrics,
}

impl MeteredAgent {
    pub fn new(inner: Box<dyn Agent>, metrics: NodeMetrics) -> Self {
        Self { inner, metrics }
    }
}

impl Agent for MeteredAgent {
    fn poll(&mut self, now_ms: u64) -> usize {
        let work = self.inner.poll(now_ms);
        self.metrics.agent_polls.inc();
        if work > 0 {
            self.metrics.agent_work_items.inc_by(work as u64);
        }
        work
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn on_close(&mut self) {
        self.inner.on_close();
    }
}

/// Periodically logs the encoded metrics registry.
pub struct MetricsAgent {
    registry: Registry,
    interval_ms: u64,
    next_report_ms: u64,
}

impl MetricsAgent {
    pub fn new(registry: Registry, interval_ms: u64) -> Self {
        Self {
            registry,
            interval_ms,
            next_report_ms: 0,
        }
    }
}

impl Agent for MetricsAgent {
    fn poll(&mut self, now_ms: u64) -> usize {
        if now_ms < self.next_report_ms {
            return 0;
        }
        self.next_report_ms = now_ms + self.interval_ms;

        let mut output = String::new();
        match encode(&mut output, &self.registry) {
            Ok(()) => info!(metrics = %output, "Node metrics"),
            Err(e) => error!(error = %e, "Failed to encode metrics"),
        }
        1
    }

    fn name(&self) -> &str {
        "metrics"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BusyAgent;

    impl Agent for BusyAgent {
        fn poll(&mut self, _now_ms: u64) -> usize {
            2
        }

        fn name(&self) -> &str {
            "busy"
        }
    }

    #[test]
    fn test_metered_agent_counts_work() {
        let mut registry = Registry::default();
        let metrics = NodeMetrics::register(&mut registry);

        let mut agent = MeteredAgent::new(Box::new(BusyAgent), metrics.clone());
        assert_eq!(agent.poll(0), 2);
        assert_eq!(agent.poll(0), 2);

        assert_eq!(metrics.agent_polls.get(), 2);
        assert_eq!(metrics.agent_work_items.get(), 4);
    }

    #[test]
    fn test_metrics_agent_reports_on_interval() {
        let registry = Registry::default();
        let mut agent = MetricsAgent::new(registry, 1_000);

        assert_eq!(agent.poll(0), 1);
        assert_eq!(agent.poll(500), 0);
        assert_eq!(agent.poll(1_000), 1);
    }
}
