mod common;

use common::{FragmentCollector, TestCluster, HEARTBEAT_INTERVAL_MS};
use fixmesh_cluster::config::{AckStrategyKind, DEFAULT_CONTROL_STREAM_ID};

const FRAGMENT_LIMIT: usize = 10;

const LEADER: usize = 0;
const FOLLOWER_1: usize = 1;
const FOLLOWER_2: usize = 2;

/// Leader established deterministically, heartbeat announced, followers
/// aware of the leader's session.
fn cluster_with_leader() -> TestCluster {
    let mut cluster = TestCluster::launch(3);
    let now_ms = cluster.now_ms;
    cluster.nodes[LEADER].agent.assume_leadership(now_ms);
    cluster.poll(LEADER); // announces leadership on the control stream
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster
}

fn offer(cluster: &TestCluster, payload: &[u8]) -> u64 {
    cluster.nodes[LEADER]
        .publication
        .offer(payload)
        .expect("leader publication accepts")
}

#[test]
fn should_not_process_data_until_acknowledged() {
    let mut cluster = cluster_with_leader();
    offer(&cluster, b"fragment");

    cluster.poll(LEADER);

    let mut collector = FragmentCollector::default();
    let delivered = cluster.nodes[LEADER]
        .subscription
        .poll(&mut collector, FRAGMENT_LIMIT);
    assert_eq!(delivered, 0, "uncommitted data must not reach the handler");
    assert_eq!(cluster.nodes[LEADER].agent.commit_position(), 0);
}

#[test]
fn should_process_data_when_acknowledged() {
    let mut cluster = cluster_with_leader();
    let position = offer(&cluster, b"fragment");

    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);

    assert!(cluster.nodes[LEADER].agent.commit_position() >= position);

    let mut collector = FragmentCollector::default();
    let delivered = cluster.nodes[LEADER]
        .subscription
        .poll(&mut collector, FRAGMENT_LIMIT);
    assert_eq!(delivered, 1);
    assert_eq!(collector.fragments[0].0, b"fragment");
    assert_eq!(collector.fragments[0].2, position);
}

#[test]
fn should_commit_on_followers() {
    let mut cluster = cluster_with_leader();
    let position = offer(&cluster, b"fragment");

    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER); // commits and emits the commit heartbeat
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);

    for index in [LEADER, FOLLOWER_1, FOLLOWER_2] {
        assert!(
            cluster.nodes[index].agent.commit_position() >= position,
            "node {} has not observed the commit",
            index
        );
    }

    let mut collector = FragmentCollector::default();
    let delivered = cluster.nodes[FOLLOWER_1]
        .subscription
        .poll(&mut collector, FRAGMENT_LIMIT);
    assert_eq!(delivered, 1);
    assert_eq!(collector.fragments[0].0, b"fragment");
}

#[test]
fn should_require_quorum_to_process() {
    let mut cluster = cluster_with_leader();
    offer(&cluster, b"fragment");

    // Only one of two followers acknowledges
    cluster.poll(FOLLOWER_1);
    cluster.poll(LEADER);

    assert_eq!(cluster.nodes[LEADER].agent.commit_position(), 0);
    let mut collector = FragmentCollector::default();
    assert_eq!(
        cluster.nodes[LEADER]
            .subscription
            .poll(&mut collector, FRAGMENT_LIMIT),
        0
    );
}

#[test]
fn should_support_acknowledgement_lagging() {
    let mut cluster = cluster_with_leader();
    let position = offer(&cluster, b"fragment");

    cluster.poll(FOLLOWER_1);
    cluster.poll(LEADER);
    assert_eq!(cluster.nodes[LEADER].agent.commit_position(), 0);

    // The lagging follower catches up
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);

    assert!(cluster.nodes[LEADER].agent.commit_position() >= position);
    let mut collector = FragmentCollector::default();
    assert_eq!(
        cluster.nodes[LEADER]
            .subscription
            .poll(&mut collector, FRAGMENT_LIMIT),
        1
    );
}

#[test]
fn should_process_successive_chunks() {
    let mut cluster = cluster_with_leader();

    let first = offer(&cluster, b"first");
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);

    let second = offer(&cluster, b"second");
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);

    assert!(cluster.nodes[LEADER].agent.commit_position() >= second);

    let mut collector = FragmentCollector::default();
    let delivered = cluster.nodes[LEADER]
        .subscription
        .poll(&mut collector, FRAGMENT_LIMIT);
    assert_eq!(delivered, 2);
    assert_eq!(collector.fragments[0].0, b"first");
    assert_eq!(collector.fragments[0].2, first);
    assert_eq!(collector.fragments[1].0, b"second");
    assert_eq!(collector.fragments[1].2, second);
}

#[test]
fn should_require_contiguous_messages() {
    let mut cluster = cluster_with_leader();

    let first = offer(&cluster, b"first");
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);
    assert!(cluster.nodes[LEADER].agent.commit_position() >= first);

    // Follower 1 lost its tail and re-follows from the start; its
    // acknowledgement rolls back
    cluster.nodes[FOLLOWER_1].agent.follow(0);
    cluster.poll(LEADER);

    let second = offer(&cluster, b"second");
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);

    // The watermark neither advances to the new fragment nor regresses
    let commit = cluster.nodes[LEADER].agent.commit_position();
    assert!(commit >= first);
    assert!(commit < second);

    // Once the re-follower catches back up, the commit resumes
    cluster.poll(FOLLOWER_1);
    cluster.poll(LEADER);
    assert!(cluster.nodes[LEADER].agent.commit_position() >= second);
}

#[test]
fn majority_strategy_commits_without_the_slowest_node() {
    let mut cluster = TestCluster::launch_with_strategy(3, AckStrategyKind::Majority);
    let now_ms = cluster.now_ms;
    cluster.nodes[LEADER].agent.assume_leadership(now_ms);
    cluster.poll(LEADER);
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);

    let position = offer(&cluster, b"fragment");

    // Only follower 1 acknowledges; leader + follower 1 are a majority
    cluster.poll(FOLLOWER_1);
    cluster.poll(LEADER);

    assert!(cluster.nodes[LEADER].agent.commit_position() >= position);
}

#[test]
fn should_not_heartbeat_if_message_recently_sent() {
    let mut cluster = cluster_with_leader();

    // Observe the control stream from this point on
    let mut control = cluster.media.add_subscription(DEFAULT_CONTROL_STREAM_ID);
    let mut drain = FragmentCollector::default();
    while control.poll(&mut drain, 16) > 0 {}

    offer(&cluster, b"fragment");
    cluster.advance(HEARTBEAT_INTERVAL_MS + 1);
    cluster.poll(LEADER);

    let mut seen = FragmentCollector::default();
    control.poll(&mut seen, 16);
    assert!(
        seen.fragments.is_empty(),
        "data within the slot must defer the heartbeat"
    );
}

#[test]
fn stale_leader_steps_down_on_higher_term() {
    let mut cluster = cluster_with_leader();
    assert!(cluster.nodes[LEADER].agent.is_leader());

    // A second node usurps with a higher term
    let now_ms = cluster.now_ms;
    cluster.nodes[FOLLOWER_1].agent.assume_leadership(now_ms);
    assert!(cluster.nodes[FOLLOWER_1].agent.leadership_term_id() > 1);

    cluster.poll(FOLLOWER_1); // announces the higher term
    cluster.poll(LEADER);

    assert!(cluster.nodes[LEADER].agent.is_follower());
    assert_eq!(
        cluster.nodes[LEADER].agent.leadership_term_id(),
        cluster.nodes[FOLLOWER_1].agent.leadership_term_id()
    );
}

#[test]
fn committed_bytes_are_identical_across_nodes() {
    let mut cluster = cluster_with_leader();
    offer(&cluster, b"alpha");
    offer(&cluster, b"bravo");

    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);
    cluster.poll(LEADER);
    cluster.poll(FOLLOWER_1);
    cluster.poll(FOLLOWER_2);

    let mut views: Vec<Vec<(Vec<u8>, i32, u64)>> = Vec::new();
    for node in &mut cluster.nodes {
        let mut collector = FragmentCollector::default();
        while node.subscription.poll(&mut collector, FRAGMENT_LIMIT) > 0 {}
        views.push(collector.fragments);
    }

    assert_eq!(views[0].len(), 2);
    assert_eq!(views[0], views[1]);
    assert_eq!(views[1], views[2]);
}
