//! Whole-node integration tests: two live nodes over TCP, the peer
//! lifecycle under missed keepalives, the admin contract, and ledger
//! recovery across a restart.

use std::path::PathBuf;
use std::time::Duration;

use neuronnode::admin::LeaderboardMetric;
use neuronnode::config::BootstrapBalance;
use neuronnode::{Config, Node};
use networkneuron_ledger::LedgerError;
use networkneuron_peers::PeerState;
use networkneuron_protocol::route::RouteRequirements;
use networkneuron_protocol::NodeId;

fn temp_base(tag: &str) -> PathBuf {
    let base = std::env::temp_dir().join(format!(
        "neuronnode-it-{}-{}",
        tag,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&base);
    base
}

fn config_for(base: &PathBuf, name: &str, bootstrap: Vec<String>) -> Config {
    let mut config = Config::create_default(
        Some(base.join(name).join("config.yaml")),
        Some(base.join(name).join("data")),
    )
    .unwrap();

    config.node.listen_addr = "127.0.0.1:0".to_string();
    config.node.bootstrap_peers = bootstrap;
    config.peers.keepalive_interval_secs = 1;
    config
}

/// Poll until the condition holds or a 10 s deadline elapses.
macro_rules! wait_for {
    ($what:expr, $cond:expr) => {{
        let start = tokio::time::Instant::now();
        while !$cond {
            if start.elapsed() > Duration::from_secs(10) {
                panic!("timed out waiting for {}", $what);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }};
}

#[tokio::test]
async fn test_two_nodes_connect_and_exchange_heartbeats() {
    let base = temp_base("connect");

    let mut node_a = Node::new(config_for(&base, "a", vec![])).await.unwrap();
    node_a.start().await.unwrap();
    let a_addr = node_a.listen_addr().unwrap().to_string();

    let mut node_b = Node::new(config_for(&base, "b", vec![a_addr])).await.unwrap();
    node_b.start().await.unwrap();

    let admin_a = node_a.admin();
    let admin_b = node_b.admin();

    // Handshake completes in both directions
    wait_for!(
        "peers active",
        admin_a.peers().await.len() == 1 && admin_b.peers().await.len() == 1
    );

    let a_view_of_b = &admin_a.peers().await[0];
    assert_eq!(a_view_of_b.node_id, node_b.node_id());
    assert_eq!(a_view_of_b.state, PeerState::Active);

    // Keepalive heartbeats refresh last_seen over time
    let status = admin_a.status().await;
    assert_eq!(status.active_peers, 1);

    node_b.shutdown().await.unwrap();
    node_a.shutdown().await.unwrap();
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn test_silent_peer_is_quarantined_then_dropped() {
    let base = temp_base("lifecycle");

    let mut node_a = Node::new(config_for(&base, "a", vec![])).await.unwrap();
    node_a.start().await.unwrap();
    let a_addr = node_a.listen_addr().unwrap().to_string();

    let mut node_b = Node::new(config_for(&base, "b", vec![a_addr])).await.unwrap();
    node_b.start().await.unwrap();

    let admin_a = node_a.admin();
    let b_id = node_b.node_id();

    wait_for!("peer active", admin_a.peers().await.len() == 1);

    // Silence node B: its heartbeats stop, A's sweeps degrade it
    node_b.shutdown().await.unwrap();

    wait_for!(
        "peer dropped",
        matches!(
            admin_a.node_stats(&b_id).await.state,
            Some(PeerState::Dropped) | None
        )
    );

    assert!(admin_a.peers().await.is_empty());
    assert_eq!(admin_a.routes().await.len(), 0);

    node_a.shutdown().await.unwrap();
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn test_session_and_packet_across_nodes() {
    let base = temp_base("tunnel");

    let mut node_a = Node::new(config_for(&base, "a", vec![])).await.unwrap();
    node_a.start().await.unwrap();
    let a_addr = node_a.listen_addr().unwrap().to_string();

    let mut node_b = Node::new(config_for(&base, "b", vec![a_addr])).await.unwrap();
    node_b.start().await.unwrap();

    let admin_b = node_b.admin();
    let a_id = node_a.node_id();

    wait_for!("peer active", admin_b.peers().await.len() == 1);

    // B opens a session toward A; the only candidate hop is A itself
    let session = admin_b
        .create_session("client-1", a_id, &RouteRequirements::default())
        .await
        .unwrap();
    assert!(session.active);
    assert_eq!(admin_b.sessions().await.len(), 1);

    let route = &admin_b.routes().await[0];
    assert_eq!(route.hops, vec![a_id]);
    assert!(route.encrypted);

    // Tunnel a payload; B's accounting credits the hop
    node_b
        .sessions()
        .send(&session.session_id, vec![7u8; 2_048])
        .await
        .unwrap();

    wait_for!(
        "bytes accounted",
        admin_b.node_stats(&a_id).await.bytes_forwarded == 2_048
    );

    let closed = admin_b.close_session(&session.session_id).await.unwrap();
    assert!(!closed.active);
    assert!(closed.ended_at.is_some());
    assert_eq!(closed.bytes_transferred, 2_048);

    node_b.shutdown().await.unwrap();
    node_a.shutdown().await.unwrap();
    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn test_admin_ledger_surface_and_recovery() {
    let base = temp_base("ledger");
    let staker = NodeId::from_bytes([42u8; 32]);

    let mut config = config_for(&base, "a", vec![]);
    config.ledger.bootstrap_balances = vec![BootstrapBalance {
        node_id: staker.to_hex(),
        amount: 10_000.0,
    }];

    let balance_after;
    {
        let mut node = Node::new(config.clone()).await.unwrap();
        node.start().await.unwrap();
        let admin = node.admin();

        // Stake boundaries
        let err = admin.stake(staker, 999.0).await.unwrap_err();
        assert!(matches!(
            err,
            neuronnode::AdminError::Ledger(LedgerError::MinStakeNotMet { .. })
        ));
        admin.stake(staker, 5_000.0).await.unwrap();

        let stats = admin.node_stats(&staker).await;
        assert_eq!(stats.stake, 5_000.0);
        assert_eq!(stats.balance, 5_000.0);

        // Nothing forwarded yet: distribution pays nobody
        let report = admin.distribute_rewards("daily").await.unwrap();
        assert!(report.paid.is_empty());

        // Leaderboard and history see the stake
        let leaders = admin.leaderboard(LeaderboardMetric::Stake, 10).await;
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].value, 5_000.0);

        let history = admin.transaction_history(Some(&staker), 10).await;
        assert_eq!(history.len(), 2); // genesis grant + stake

        balance_after = admin.status().await.total_supply;
        node.shutdown().await.unwrap();
    }

    // Restart over the same data directory: the journal replays
    {
        let mut node = Node::new(config).await.unwrap();
        node.start().await.unwrap();
        let admin = node.admin();

        let stats = admin.node_stats(&staker).await;
        assert_eq!(stats.stake, 5_000.0);
        assert_eq!(stats.balance, 5_000.0);
        assert_eq!(admin.status().await.total_supply, balance_after);

        node.shutdown().await.unwrap();
    }

    let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn test_find_route_without_peers_is_not_found() {
    let base = temp_base("noroute");

    let mut node = Node::new(config_for(&base, "a", vec![])).await.unwrap();
    node.start().await.unwrap();

    let admin = node.admin();
    let err = admin
        .find_route(NodeId::from_bytes([9u8; 32]), &RouteRequirements::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        neuronnode::AdminError::Route(networkneuron_routing::RouteError::NotFound)
    ));

    node.shutdown().await.unwrap();
    let _ = std::fs::remove_dir_all(&base);
}
