//! Reward engine
//!
//! Computes and distributes periodic rewards to staked relays. One
//! distribution runs at a time: collect eligible nodes in stable order
//! with frozen snapshots, pay each atomically (credit plus counter
//! consumption), and skip the remainder of the period if the pool runs
//! dry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{info, warn};

use networkneuron_protocol::{Event, NodeId};
use tokio::sync::broadcast;

use crate::accounting::{Accounting, AccountingSnapshot};
use crate::error::{LedgerError, Result};
use crate::ledger::{Amount, Ledger};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reward computation parameters
#[derive(Debug, Clone)]
pub struct RewardConfig {
    /// Tokens per MiB forwarded
    pub reward_rate: f64,
    /// Stake floor for eligibility and the stake-multiplier unit
    pub min_stake: Amount,
    /// Hard cap per node per distribution
    pub max_reward_per_day: Amount,
}

impl Default for RewardConfig {
    fn default() -> Self {
        RewardConfig {
            reward_rate: 0.1,
            min_stake: 1_000.0,
            max_reward_per_day: 1_000.0,
        }
    }
}

/// Distribution lifecycle; only one runs at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionPhase {
    Idle,
    Collecting,
    Paying,
    Finalizing,
}

/// One paid reward, keyed by (node, distribution timestamp)
#[derive(Debug, Clone)]
pub struct RewardRecord {
    pub node: NodeId,
    pub period: String,
    pub distribution_ts: u64,
    pub amount: Amount,
    pub bytes_snapshot: u64,
    pub sessions_snapshot: u64,
}

/// Outcome of one distribution run
#[derive(Debug, Clone, Default)]
pub struct DistributionReport {
    pub paid: Vec<(NodeId, Amount)>,
    pub skipped_zero: usize,
    pub skipped_pool_exhausted: usize,
}

/// Computes and pays periodic rewards
pub struct RewardEngine {
    config: RewardConfig,
    ledger: Arc<Mutex<Ledger>>,
    accounting: Arc<Accounting>,
    events: broadcast::Sender<Event>,
    phase: Mutex<DistributionPhase>,
    records: Mutex<HashMap<(NodeId, u64), RewardRecord>>,
}

impl RewardEngine {
    pub fn new(
        config: RewardConfig,
        ledger: Arc<Mutex<Ledger>>,
        accounting: Arc<Accounting>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        RewardEngine {
            config,
            ledger,
            accounting,
            events,
            phase: Mutex::new(DistributionPhase::Idle),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// The reward formula, pure over a frozen snapshot.
    pub fn compute_reward(&self, snapshot: &AccountingSnapshot, stake: Amount) -> Amount {
        let mib = snapshot.bytes as f64 / (1024.0 * 1024.0);
        let base = mib * self.config.reward_rate;

        let stake_mult = (1.0 + (stake / self.config.min_stake) * 0.5).min(2.0);
        let uptime_bonus = snapshot.performance.uptime_pct / 100.0;
        let latency_bonus = (1.0 - snapshot.performance.avg_latency_ms / 1000.0).max(0.0);
        let sessions = snapshot.sessions.max(1) as f64;

        let raw = base * stake_mult * uptime_bonus * latency_bonus * sessions;
        raw.min(self.config.max_reward_per_day)
    }

    /// What one node would earn right now, without paying anything.
    pub async fn calculate_reward(&self, node: &NodeId) -> Amount {
        let stake = {
            let ledger = self.ledger.lock().await;
            ledger.stake_of(node)
        };
        if stake < self.config.min_stake {
            return 0.0;
        }
        let snapshot = self.accounting.snapshot(node).await;
        self.compute_reward(&snapshot, stake)
    }

    /// Current phase (Idle unless a distribution is executing).
    pub async fn phase(&self) -> DistributionPhase {
        *self.phase.lock().await
    }

    /// Rewards paid so far, newest unordered.
    pub async fn reward_records(&self) -> Vec<RewardRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Run one distribution for `period`.
    ///
    /// Already-distributed rewards are never rolled back; if the pool is
    /// exhausted mid-run the remaining nodes are skipped for this period.
    pub async fn distribute(&self, period: &str) -> Result<DistributionReport> {
        let mut phase = self.phase.try_lock().map_err(|_| {
            LedgerError::Internal("distribution already in flight".to_string())
        })?;
        if *phase != DistributionPhase::Idle {
            return Err(LedgerError::Internal(
                "distribution already in flight".to_string(),
            ));
        }

        // Collect: eligible nodes in stable order, snapshots frozen here
        *phase = DistributionPhase::Collecting;
        let eligible = {
            let ledger = self.ledger.lock().await;
            ledger.staked_nodes(self.config.min_stake)
        };
        let mut frozen: Vec<(NodeId, Amount, AccountingSnapshot)> =
            Vec::with_capacity(eligible.len());
        for (node, stake) in eligible {
            let snapshot = self.accounting.snapshot(&node).await;
            frozen.push((node, stake, snapshot));
        }

        // Pay: per node, credit and consume atomically
        *phase = DistributionPhase::Paying;
        let distribution_ts = now_ms();
        let mut report = DistributionReport::default();
        let mut exhausted = false;

        for (index, (node, stake, snapshot)) in frozen.iter().enumerate() {
            let amount = self.compute_reward(snapshot, *stake);
            if amount <= 0.0 {
                report.skipped_zero += 1;
                continue;
            }

            let credit = {
                let mut ledger = self.ledger.lock().await;
                ledger.credit_reward(*node, amount, period)
            };

            match credit {
                Ok(_) => {
                    self.accounting
                        .consume(node, snapshot.bytes, snapshot.sessions)
                        .await;

                    let mut records = self.records.lock().await;
                    records.insert(
                        (*node, distribution_ts),
                        RewardRecord {
                            node: *node,
                            period: period.to_string(),
                            distribution_ts,
                            amount,
                            bytes_snapshot: snapshot.bytes,
                            sessions_snapshot: snapshot.sessions,
                        },
                    );
                    drop(records);

                    info!(node = %node, amount, period, "reward distributed");
                    self.emit(Event::RewardDistributed {
                        node: *node,
                        amount,
                        period: period.to_string(),
                    });
                    report.paid.push((*node, amount));
                }
                Err(LedgerError::InsufficientRewardPool { .. }) => {
                    let remaining = frozen.len() - index;
                    warn!(period, skipped = remaining, "reward pool exhausted mid-run");
                    self.emit(Event::RewardPoolExhausted {
                        period: period.to_string(),
                        skipped_nodes: remaining,
                    });
                    report.skipped_pool_exhausted = remaining;
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    *phase = DistributionPhase::Idle;
                    return Err(e);
                }
            }
        }

        // Finalize
        *phase = DistributionPhase::Finalizing;
        if !exhausted {
            info!(
                period,
                paid = report.paid.len(),
                skipped_zero = report.skipped_zero,
                "distribution complete"
            );
        }
        *phase = DistributionPhase::Idle;

        Ok(report)
    }
}
