//! Per-node accounting counters
//!
//! Monotonic bytes/sessions accumulators plus a rolling performance
//! record. Counters are never cleared: distribution snapshots them and
//! consumes exactly the snapshotted amount, so traffic that arrives
//! mid-distribution is paid next period.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use networkneuron_protocol::NodeId;

/// Rolling performance figures for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePerformance {
    /// Uptime percentage in [0, 100]
    pub uptime_pct: f64,
    pub avg_latency_ms: f64,
    /// Reputation in [0, 1]
    pub reputation: f64,
}

impl Default for NodePerformance {
    fn default() -> Self {
        NodePerformance {
            uptime_pct: 0.0,
            avg_latency_ms: 0.0,
            reputation: 0.5,
        }
    }
}

/// Point-in-time view used by the reward engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountingSnapshot {
    pub bytes: u64,
    pub sessions: u64,
    pub performance: NodePerformance,
}

#[derive(Debug, Default, Clone)]
struct NodeCounters {
    bytes_forwarded: u64,
    sessions_served: u64,
    performance: NodePerformance,
}

/// The single owner of accounting counters
pub struct Accounting {
    state: Mutex<HashMap<NodeId, NodeCounters>>,
}

impl Accounting {
    pub fn new() -> Self {
        Accounting {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Credit forwarded bytes to a node.
    pub async fn record_bytes(&self, node: &NodeId, bytes: u64) {
        let mut state = self.state.lock().await;
        let counters = state.entry(*node).or_default();
        counters.bytes_forwarded += bytes;
    }

    /// Credit one served session to a node.
    pub async fn record_session(&self, node: &NodeId) {
        let mut state = self.state.lock().await;
        let counters = state.entry(*node).or_default();
        counters.sessions_served += 1;
    }

    /// Replace a node's rolling performance record.
    pub async fn set_performance(&self, node: &NodeId, performance: NodePerformance) {
        let mut state = self.state.lock().await;
        let counters = state.entry(*node).or_default();
        counters.performance = performance;
    }

    /// Current counters for one node.
    pub async fn snapshot(&self, node: &NodeId) -> AccountingSnapshot {
        let state = self.state.lock().await;
        match state.get(node) {
            Some(counters) => AccountingSnapshot {
                bytes: counters.bytes_forwarded,
                sessions: counters.sessions_served,
                performance: counters.performance,
            },
            None => AccountingSnapshot {
                bytes: 0,
                sessions: 0,
                performance: NodePerformance::default(),
            },
        }
    }

    /// Deduct a paid-out snapshot from a node's counters.
    ///
    /// Runs in one critical section so a snapshot can never be consumed
    /// twice; counters are reduced, never cleared, so traffic recorded
    /// after the snapshot survives into the next period.
    pub async fn consume(&self, node: &NodeId, bytes: u64, sessions: u64) {
        let mut state = self.state.lock().await;
        if let Some(counters) = state.get_mut(node) {
            counters.bytes_forwarded = counters.bytes_forwarded.saturating_sub(bytes);
            counters.sessions_served = counters.sessions_served.saturating_sub(sessions);
        }
    }

    /// All tracked nodes in stable id order.
    pub async fn tracked_nodes(&self) -> Vec<NodeId> {
        let state = self.state.lock().await;
        let mut nodes: Vec<NodeId> = state.keys().copied().collect();
        nodes.sort();
        nodes
    }
}

impl Default for Accounting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::NODE_ID_SIZE;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; NODE_ID_SIZE])
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let accounting = Accounting::new();

        accounting.record_bytes(&node(1), 1_024).await;
        accounting.record_bytes(&node(1), 2_048).await;
        accounting.record_session(&node(1)).await;

        let snap = accounting.snapshot(&node(1)).await;
        assert_eq!(snap.bytes, 3_072);
        assert_eq!(snap.sessions, 1);
    }

    #[tokio::test]
    async fn test_unknown_node_snapshot_is_zero() {
        let accounting = Accounting::new();
        let snap = accounting.snapshot(&node(9)).await;

        assert_eq!(snap.bytes, 0);
        assert_eq!(snap.sessions, 0);
        assert_eq!(snap.performance.reputation, 0.5);
    }

    #[tokio::test]
    async fn test_consume_reduces_by_snapshot_not_to_zero() {
        let accounting = Accounting::new();
        accounting.record_bytes(&node(1), 1_000).await;
        accounting.record_session(&node(1)).await;

        let snap = accounting.snapshot(&node(1)).await;

        // Traffic lands between snapshot and consume
        accounting.record_bytes(&node(1), 500).await;

        accounting.consume(&node(1), snap.bytes, snap.sessions).await;

        let after = accounting.snapshot(&node(1)).await;
        assert_eq!(after.bytes, 500);
        assert_eq!(after.sessions, 0);
    }

    #[tokio::test]
    async fn test_consume_saturates() {
        let accounting = Accounting::new();
        accounting.record_bytes(&node(1), 100).await;

        accounting.consume(&node(1), 1_000, 5).await;

        let snap = accounting.snapshot(&node(1)).await;
        assert_eq!(snap.bytes, 0);
        assert_eq!(snap.sessions, 0);
    }

    #[tokio::test]
    async fn test_performance_round_trip() {
        let accounting = Accounting::new();
        let perf = NodePerformance {
            uptime_pct: 100.0,
            avg_latency_ms: 50.0,
            reputation: 1.0,
        };
        accounting.set_performance(&node(1), perf).await;

        assert_eq!(accounting.snapshot(&node(1)).await.performance, perf);
    }

    #[tokio::test]
    async fn test_tracked_nodes_sorted() {
        let accounting = Accounting::new();
        accounting.record_bytes(&node(5), 1).await;
        accounting.record_bytes(&node(1), 1).await;
        accounting.record_bytes(&node(3), 1).await;

        assert_eq!(
            accounting.tracked_nodes().await,
            vec![node(1), node(3), node(5)]
        );
    }
}
