//! In-process administrative service
//!
//! The contract consumed by the out-of-process web layer. Every operation
//! goes through the owning component; nothing here holds state of its own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use networkneuron_ledger::{
    Accounting, DistributionPhase, DistributionReport, Ledger, LedgerError, NodePerformance,
    RewardEngine, Transaction,
};
use networkneuron_ledger::transaction::AccountId;
use networkneuron_peers::{PeerError, PeerRecord, PeerRegistry, PeerState};
use networkneuron_protocol::route::{Route, RouteRequirements};
use networkneuron_protocol::{NodeId, SessionId};
use networkneuron_routing::{
    ClientSession, RouteError, Router, SessionError, SessionManager,
};

pub type Result<T> = std::result::Result<T, AdminError>;

/// Error surface of the admin contract
#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out")]
    TimedOut,

    #[error("Internal: {0}")]
    Internal(String),
}

/// Overall node status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub node_id: String,
    pub active_peers: usize,
    pub active_sessions: usize,
    pub routes: usize,
    pub reward_pool: f64,
    pub total_supply: f64,
    pub distributing: bool,
}

/// Per-node statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: String,
    pub state: Option<PeerState>,
    pub reputation: Option<f64>,
    pub bytes_forwarded: u64,
    pub sessions_served: u64,
    pub performance: NodePerformance,
    pub balance: f64,
    pub stake: f64,
}

/// Aggregate network statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub peers_active: usize,
    pub peers_total: usize,
    pub routes: usize,
    pub sessions_total: usize,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub total_supply: f64,
    pub reward_pool: f64,
    pub stake_pool: f64,
}

/// What the leaderboard ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardMetric {
    Rewards,
    Stake,
    Bandwidth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub node_id: String,
    pub value: f64,
}

/// A reward preview for one node and period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEstimate {
    pub node_id: String,
    pub period: String,
    pub amount: f64,
}

/// The in-process admin service
pub struct AdminApi {
    local_node: NodeId,
    registry: Arc<PeerRegistry>,
    router: Arc<Router>,
    sessions: Arc<SessionManager>,
    accounting: Arc<Accounting>,
    ledger: Arc<Mutex<Ledger>>,
    rewards: Arc<RewardEngine>,
}

impl AdminApi {
    pub fn new(
        local_node: NodeId,
        registry: Arc<PeerRegistry>,
        router: Arc<Router>,
        sessions: Arc<SessionManager>,
        accounting: Arc<Accounting>,
        ledger: Arc<Mutex<Ledger>>,
        rewards: Arc<RewardEngine>,
    ) -> Self {
        AdminApi {
            local_node,
            registry,
            router,
            sessions,
            accounting,
            ledger,
            rewards,
        }
    }

    pub async fn status(&self) -> StatusReport {
        let ledger = self.ledger.lock().await;
        let reward_pool = ledger.balance(&AccountId::RewardPool);
        let total_supply = ledger.total_supply();
        drop(ledger);

        StatusReport {
            node_id: self.local_node.to_hex(),
            active_peers: self.registry.list_active().await.len(),
            active_sessions: self.sessions.list_active().await.len(),
            routes: self.router.list_routes().await.len(),
            reward_pool,
            total_supply,
            distributing: self.rewards.phase().await != DistributionPhase::Idle,
        }
    }

    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.registry.list_active().await
    }

    pub async fn sessions(&self) -> Vec<ClientSession> {
        self.sessions.list_active().await
    }

    pub async fn routes(&self) -> Vec<Route> {
        self.router.list_routes().await
    }

    pub async fn find_route(
        &self,
        destination: NodeId,
        requirements: &RouteRequirements,
    ) -> Result<Route> {
        Ok(self.router.find_route(destination, requirements).await?)
    }

    pub async fn create_session(
        &self,
        client_id: &str,
        destination: NodeId,
        requirements: &RouteRequirements,
    ) -> Result<ClientSession> {
        Ok(self
            .sessions
            .open(client_id, destination, requirements)
            .await?)
    }

    pub async fn close_session(&self, session_id: &SessionId) -> Result<ClientSession> {
        Ok(self.sessions.close(session_id).await?)
    }

    pub async fn node_stats(&self, node: &NodeId) -> NodeStats {
        let record = self.registry.get(node).await;
        let snapshot = self.accounting.snapshot(node).await;
        let ledger = self.ledger.lock().await;

        NodeStats {
            node_id: node.to_hex(),
            state: record.as_ref().map(|r| r.state),
            reputation: record.as_ref().map(|r| r.reputation.score()),
            bytes_forwarded: snapshot.bytes,
            sessions_served: snapshot.sessions,
            performance: snapshot.performance,
            balance: ledger.balance(&AccountId::Node(*node)),
            stake: ledger.stake_of(node),
        }
    }

    pub async fn network_stats(&self) -> NetworkStats {
        let registry_stats = self.registry.stats().await;
        let router_stats = self.router.stats().await;
        let sessions_total = self.sessions.count().await;
        let ledger = self.ledger.lock().await;

        NetworkStats {
            peers_active: registry_stats.active,
            peers_total: registry_stats.active
                + registry_stats.discovered
                + registry_stats.connecting
                + registry_stats.quarantined,
            routes: self.router.list_routes().await.len(),
            sessions_total,
            packets_forwarded: router_stats.packets_forwarded,
            bytes_forwarded: router_stats.bytes_forwarded,
            total_supply: ledger.total_supply(),
            reward_pool: ledger.balance(&AccountId::RewardPool),
            stake_pool: ledger.balance(&AccountId::StakePool),
        }
    }

    pub async fn stake(&self, node: NodeId, amount: f64) -> Result<Transaction> {
        let mut ledger = self.ledger.lock().await;
        Ok(ledger.stake(node, amount)?)
    }

    pub async fn unstake(&self, node: NodeId, amount: f64) -> Result<Transaction> {
        let mut ledger = self.ledger.lock().await;
        Ok(ledger.unstake(node, amount)?)
    }

    pub async fn calculate_reward(&self, node: &NodeId, period: &str) -> RewardEstimate {
        RewardEstimate {
            node_id: node.to_hex(),
            period: period.to_string(),
            amount: self.rewards.calculate_reward(node).await,
        }
    }

    pub async fn distribute_rewards(&self, period: &str) -> Result<DistributionReport> {
        Ok(self.rewards.distribute(period).await?)
    }

    pub async fn transaction_history(
        &self,
        node: Option<&NodeId>,
        limit: usize,
    ) -> Vec<Transaction> {
        let ledger = self.ledger.lock().await;
        ledger.history(node, limit)
    }

    pub async fn leaderboard(
        &self,
        metric: LeaderboardMetric,
        limit: usize,
    ) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = match metric {
            LeaderboardMetric::Rewards => {
                let mut totals: std::collections::HashMap<NodeId, f64> =
                    std::collections::HashMap::new();
                for record in self.rewards.reward_records().await {
                    *totals.entry(record.node).or_insert(0.0) += record.amount;
                }
                totals
                    .into_iter()
                    .map(|(node, value)| LeaderboardEntry {
                        node_id: node.to_hex(),
                        value,
                    })
                    .collect()
            }
            LeaderboardMetric::Stake => {
                let ledger = self.ledger.lock().await;
                ledger
                    .staked_nodes(0.0)
                    .into_iter()
                    .filter(|(_, stake)| *stake > 0.0)
                    .map(|(node, stake)| LeaderboardEntry {
                        node_id: node.to_hex(),
                        value: stake,
                    })
                    .collect()
            }
            LeaderboardMetric::Bandwidth => {
                let mut out = Vec::new();
                for node in self.accounting.tracked_nodes().await {
                    let snapshot = self.accounting.snapshot(&node).await;
                    out.push(LeaderboardEntry {
                        node_id: node.to_hex(),
                        value: snapshot.bytes as f64,
                    });
                }
                out
            }
        };

        entries.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        entries.truncate(limit);
        entries
    }
}
