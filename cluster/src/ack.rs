use std::collections::HashMap;

/// Latest position reported by each node, leader's own included. Values
/// are the most recent report, not a running maximum: a node that
/// re-follows from an earlier point legitimately rolls its report back,
/// and the commit watermark must stop advancing until it catches up.
#[derive(Debug)]
pub struct PositionMap {
    expected: Vec<u16>,
    positions: HashMap<u16, u64>,
}

impl PositionMap {
    pub fn new(expected: Vec<u16>) -> Self {
        Self {
            expected,
            positions: HashMap::new(),
        }
    }

    pub fn update(&mut self, node_id: u16, position: u64) {
        if self.expected.contains(&node_id) {
            self.positions.insert(node_id, position);
        }
    }

    pub fn get(&self, node_id: u16) -> Option<u64> {
        self.positions.get(&node_id).copied()
    }

    pub fn expected(&self) -> &[u16] {
        &self.expected
    }

    fn reported(&self) -> Vec<u64> {
        self.expected
            .iter()
            .filter_map(|node_id| self.positions.get(node_id).copied())
            .collect()
    }
}

/// Pure quorum rule mapping the set of reported positions to the highest
/// position safe to commit.
pub trait AcknowledgementStrategy: Send {
    fn committed_position(&self, positions: &PositionMap) -> Option<u64>;
}

/// Commits only what the entire cluster has archived: the minimum of all
/// reported positions, undefined until every node has reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntireClusterAcknowledgementStrategy;

impl AcknowledgementStrategy for EntireClusterAcknowledgementStrategy {
    fn committed_position(&self, positions: &PositionMap) -> Option<u64> {
        let reported = positions.reported();
        if reported.len() < positions.expected().len() {
            return None;
        }
        reported.into_iter().min()
    }
}

/// Commits what a majority has archived: the quorum-th highest reported
/// position, undefined until a quorum has reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct MajorityAcknowledgementStrategy;

impl AcknowledgementStrategy for MajorityAcknowledgementStrategy {
    fn committed_position(&self, positions: &PositionMap) -> Option<u64> {
        let quorum = positions.expected().len() / 2 + 1;
        let mut reported = positions.reported();
        if reported.len() < quorum {
            return None;
        }
        reported.sort_unstable_by(|a, b| b.cmp(a));
        Some(reported[quorum - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u16, u64)]) -> PositionMap {
        let mut positions = PositionMap::new(vec![1, 2, 3]);
        for (node_id, position) in entries {
            positions.update(*node_id, *position);
        }
        positions
    }

    #[test]
    fn test_entire_cluster_requires_all_nodes() {
        let strategy = EntireClusterAcknowledgementStrategy;
        assert_eq!(strategy.committed_position(&map(&[(1, 100), (2, 80)])), None);
        assert_eq!(
            strategy.committed_position(&map(&[(1, 100), (2, 80), (3, 90)])),
            Some(80)
        );
    }

    #[test]
    fn test_majority_takes_median() {
        let strategy = MajorityAcknowledgementStrategy;
        assert_eq!(strategy.committed_position(&map(&[(1, 100)])), None);
        assert_eq!(
            strategy.committed_position(&map(&[(1, 100), (2, 80)])),
            Some(80)
        );
        assert_eq!(
            strategy.committed_position(&map(&[(1, 100), (2, 80), (3, 90)])),
            Some(90)
        );
    }

    #[test]
    fn test_rollback_is_respected() {
        let strategy = EntireClusterAcknowledgementStrategy;
        let mut positions = map(&[(1, 100), (2, 100), (3, 100)]);
        assert_eq!(strategy.committed_position(&positions), Some(100));

        // Node 2 re-followed from 0: the strategy output rolls back, the
        // leader's monotonic commit guard is what holds the watermark.
        positions.update(2, 0);
        assert_eq!(strategy.committed_position(&positions), Some(0));
    }

    #[test]
    fn test_unknown_node_is_ignored() {
        let mut positions = PositionMap::new(vec![1, 2, 3]);
        positions.update(9, 1_000);
        assert_eq!(positions.get(9), None);
    }
}
