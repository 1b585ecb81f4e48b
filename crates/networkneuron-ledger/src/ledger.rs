//! The token ledger
//!
//! Two parallel mappings (balances and stakes), a signed append-only
//! transaction log with ring-buffer retention, and the transactional
//! operations over them. Every applied transaction keeps total supply
//! constant modulo stake moves; balances and stakes never go negative.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::{NodeId, TxId};

use crate::error::{LedgerError, Result};
use crate::journal::Journal;
use crate::transaction::{AccountId, Transaction, TxKind};

/// Token amount
pub type Amount = f64;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ledger tuning knobs
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Minimum amount per stake call
    pub min_stake: Amount,
    /// Transactions kept in the in-memory log
    pub tx_retention: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            min_stake: 1_000.0,
            tx_retention: 10_000,
        }
    }
}

/// Serializable snapshot of balances and stakes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balances: Vec<(AccountId, Amount)>,
    pub stakes: Vec<(NodeId, Amount)>,
    /// Sequence number of the last transaction folded into this snapshot
    pub last_seq: u64,
}

/// The single owner of balances, stakes and the transaction log
pub struct Ledger {
    identity: Arc<NodeIdentity>,
    config: LedgerConfig,
    balances: HashMap<AccountId, Amount>,
    stakes: HashMap<NodeId, Amount>,
    log: VecDeque<Transaction>,
    seq: u64,
    journal: Option<Journal>,
}

impl Ledger {
    pub fn new(identity: Arc<NodeIdentity>, config: LedgerConfig) -> Self {
        Ledger {
            identity,
            config,
            balances: HashMap::new(),
            stakes: HashMap::new(),
            log: VecDeque::new(),
            seq: 0,
            journal: None,
        }
    }

    /// Attach a journal; every applied transaction is appended to it.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Seed the genesis supply into the treasury and carve out the reward
    /// pool. Must run on an empty ledger.
    pub fn seed(
        &mut self,
        initial_supply: Amount,
        reward_pool_fraction: f64,
        bootstrap_balances: &[(NodeId, Amount)],
    ) -> Result<()> {
        if self.seq != 0 {
            return Err(LedgerError::Internal("ledger already seeded".to_string()));
        }

        self.balances.insert(AccountId::Treasury, initial_supply);

        let pool = initial_supply * reward_pool_fraction;
        self.transfer(AccountId::Treasury, AccountId::RewardPool, pool)?;
        for (node, amount) in bootstrap_balances {
            self.transfer(AccountId::Treasury, AccountId::Node(*node), *amount)?;
        }

        info!(supply = initial_supply, reward_pool = pool, "ledger seeded");
        Ok(())
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0.0)
    }

    pub fn stake_of(&self, node: &NodeId) -> Amount {
        self.stakes.get(node).copied().unwrap_or(0.0)
    }

    /// Sum of every balance (stakes live in the stake pool's balance).
    pub fn total_supply(&self) -> Amount {
        self.balances.values().sum()
    }

    /// Nodes with stake at or above the given floor, in stable id order.
    pub fn staked_nodes(&self, min_stake: Amount) -> Vec<(NodeId, Amount)> {
        let mut nodes: Vec<(NodeId, Amount)> = self
            .stakes
            .iter()
            .filter(|(_, stake)| **stake >= min_stake)
            .map(|(node, stake)| (*node, *stake))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }

    fn append(
        &mut self,
        kind: TxKind,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        metadata: Option<String>,
    ) -> Result<Transaction> {
        self.seq += 1;
        let tx = Transaction {
            tx_id: TxId::generate(),
            seq: self.seq,
            kind,
            from,
            to,
            amount,
            timestamp: now_ms(),
            signature: Vec::new(),
            metadata,
        }
        .sign(&self.identity);

        if let Some(journal) = &mut self.journal {
            journal.append(&tx)?;
        }

        self.log.push_back(tx.clone());
        while self.log.len() > self.config.tx_retention {
            self.log.pop_front();
        }

        debug!(tx = %tx.tx_id, kind = ?tx.kind, amount = tx.amount, "transaction applied");
        Ok(tx)
    }

    /// Lock tokens as stake. The staked amount moves from the node's
    /// balance into the stake pool.
    pub fn stake(&mut self, node: NodeId, amount: Amount) -> Result<Transaction> {
        if amount < self.config.min_stake {
            return Err(LedgerError::MinStakeNotMet {
                amount,
                min_stake: self.config.min_stake,
            });
        }

        let account = AccountId::Node(node);
        let balance = self.balance(&account);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                have: balance,
                need: amount,
            });
        }

        *self.balances.entry(account).or_insert(0.0) -= amount;
        *self.balances.entry(AccountId::StakePool).or_insert(0.0) += amount;
        *self.stakes.entry(node).or_insert(0.0) += amount;

        self.append(TxKind::Stake, account, AccountId::StakePool, amount, None)
    }

    /// Release staked tokens back to the node's balance.
    pub fn unstake(&mut self, node: NodeId, amount: Amount) -> Result<Transaction> {
        let staked = self.stake_of(&node);
        if staked < amount {
            return Err(LedgerError::InsufficientStake {
                have: staked,
                need: amount,
            });
        }

        let account = AccountId::Node(node);
        *self.stakes.entry(node).or_insert(0.0) -= amount;
        *self.balances.entry(AccountId::StakePool).or_insert(0.0) -= amount;
        *self.balances.entry(account).or_insert(0.0) += amount;

        self.append(TxKind::Unstake, AccountId::StakePool, account, amount, None)
    }

    /// Pay a reward out of the reward pool.
    pub fn credit_reward(
        &mut self,
        node: NodeId,
        amount: Amount,
        period: &str,
    ) -> Result<Transaction> {
        let pool = self.balance(&AccountId::RewardPool);
        if pool < amount {
            return Err(LedgerError::InsufficientRewardPool {
                have: pool,
                need: amount,
            });
        }

        let account = AccountId::Node(node);
        *self.balances.entry(AccountId::RewardPool).or_insert(0.0) -= amount;
        *self.balances.entry(account).or_insert(0.0) += amount;

        self.append(
            TxKind::Reward,
            AccountId::RewardPool,
            account,
            amount,
            Some(format!("period:{}", period)),
        )
    }

    /// Move tokens between two accounts.
    pub fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<Transaction> {
        let balance = self.balance(&from);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                have: balance,
                need: amount,
            });
        }

        *self.balances.entry(from).or_insert(0.0) -= amount;
        *self.balances.entry(to).or_insert(0.0) += amount;

        self.append(TxKind::Transfer, from, to, amount, None)
    }

    /// Verify a transaction against the coordinator public key.
    pub fn verify(&self, tx: &Transaction) -> Result<()> {
        tx.verify(&self.identity.export_public_key())
    }

    /// Recent transactions, newest last, optionally filtered by node.
    pub fn history(&self, node: Option<&NodeId>, limit: usize) -> Vec<Transaction> {
        let matches = |tx: &Transaction| match node {
            None => true,
            Some(node) => {
                tx.from == AccountId::Node(*node) || tx.to == AccountId::Node(*node)
            }
        };

        let mut out: Vec<Transaction> = self
            .log
            .iter()
            .rev()
            .filter(|tx| matches(tx))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Point-in-time snapshot for persistence.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut balances: Vec<(AccountId, Amount)> =
            self.balances.iter().map(|(k, v)| (*k, *v)).collect();
        balances.sort_by(|a, b| format!("{}", a.0).cmp(&format!("{}", b.0)));
        let mut stakes: Vec<(NodeId, Amount)> =
            self.stakes.iter().map(|(k, v)| (*k, *v)).collect();
        stakes.sort_by(|a, b| a.0.cmp(&b.0));

        LedgerSnapshot {
            balances,
            stakes,
            last_seq: self.seq,
        }
    }

    /// Restore state from a snapshot, then re-apply journaled
    /// transactions that postdate it.
    pub fn restore(&mut self, snapshot: LedgerSnapshot, tail: Vec<Transaction>) -> Result<()> {
        self.balances = snapshot.balances.into_iter().collect();
        self.stakes = snapshot.stakes.into_iter().collect();
        self.seq = snapshot.last_seq;

        for tx in tail {
            if tx.seq <= snapshot.last_seq {
                continue;
            }
            self.verify(&tx)?;
            self.replay(&tx)?;
        }
        Ok(())
    }

    fn replay(&mut self, tx: &Transaction) -> Result<()> {
        match tx.kind {
            TxKind::Stake => {
                if let AccountId::Node(node) = tx.from {
                    *self.balances.entry(tx.from).or_insert(0.0) -= tx.amount;
                    *self.balances.entry(tx.to).or_insert(0.0) += tx.amount;
                    *self.stakes.entry(node).or_insert(0.0) += tx.amount;
                }
            }
            TxKind::Unstake => {
                if let AccountId::Node(node) = tx.to {
                    *self.balances.entry(tx.from).or_insert(0.0) -= tx.amount;
                    *self.balances.entry(tx.to).or_insert(0.0) += tx.amount;
                    *self.stakes.entry(node).or_insert(0.0) -= tx.amount;
                }
            }
            TxKind::Reward | TxKind::Transfer => {
                *self.balances.entry(tx.from).or_insert(0.0) -= tx.amount;
                *self.balances.entry(tx.to).or_insert(0.0) += tx.amount;
            }
        }

        self.seq = tx.seq;
        self.log.push_back(tx.clone());
        while self.log.len() > self.config.tx_retention {
            self.log.pop_front();
        }
        Ok(())
    }

    /// Write a snapshot through the attached journal.
    pub fn persist_snapshot(&mut self) -> Result<()> {
        let snapshot = self.snapshot();
        if let Some(journal) = &mut self.journal {
            journal.write_snapshot(&snapshot)?;
        }
        Ok(())
    }

    /// Flush journaled transactions to disk (shutdown path).
    pub fn flush(&mut self) -> Result<()> {
        if let Some(journal) = &mut self.journal {
            journal.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::NODE_ID_SIZE;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; NODE_ID_SIZE])
    }

    fn seeded_ledger() -> Ledger {
        networkneuron_crypto::init().unwrap();
        let identity = Arc::new(NodeIdentity::generate().unwrap());
        let mut ledger = Ledger::new(identity, LedgerConfig::default());
        ledger
            .seed(100_000.0, 0.5, &[(node(1), 10_000.0), (node(2), 5_000.0)])
            .unwrap();
        ledger
    }

    #[test]
    fn test_seed_splits_supply() {
        let ledger = seeded_ledger();

        assert_eq!(ledger.balance(&AccountId::RewardPool), 50_000.0);
        assert_eq!(ledger.balance(&AccountId::Node(node(1))), 10_000.0);
        assert_eq!(ledger.balance(&AccountId::Node(node(2))), 5_000.0);
        assert_eq!(ledger.balance(&AccountId::Treasury), 35_000.0);
        assert_eq!(ledger.total_supply(), 100_000.0);
    }

    #[test]
    fn test_stake_moves_balance_into_pool() {
        let mut ledger = seeded_ledger();

        let tx = ledger.stake(node(1), 5_000.0).unwrap();
        assert_eq!(tx.kind, TxKind::Stake);

        assert_eq!(ledger.balance(&AccountId::Node(node(1))), 5_000.0);
        assert_eq!(ledger.stake_of(&node(1)), 5_000.0);
        assert_eq!(ledger.balance(&AccountId::StakePool), 5_000.0);
        assert_eq!(ledger.total_supply(), 100_000.0);
    }

    #[test]
    fn test_stake_boundaries() {
        let mut ledger = seeded_ledger();

        // Below the minimum fails
        assert!(matches!(
            ledger.stake(node(1), 999.0),
            Err(LedgerError::MinStakeNotMet { .. })
        ));

        // Exactly the minimum succeeds
        assert!(ledger.stake(node(1), 1_000.0).is_ok());

        // More than the balance fails
        assert!(matches!(
            ledger.stake(node(1), 50_000.0),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_stake_then_unstake_restores_state() {
        let mut ledger = seeded_ledger();
        let log_before = ledger.log_len();

        ledger.stake(node(1), 2_000.0).unwrap();
        ledger.unstake(node(1), 2_000.0).unwrap();

        assert_eq!(ledger.balance(&AccountId::Node(node(1))), 10_000.0);
        assert_eq!(ledger.stake_of(&node(1)), 0.0);
        assert_eq!(ledger.balance(&AccountId::StakePool), 0.0);
        assert_eq!(ledger.log_len(), log_before + 2);
    }

    #[test]
    fn test_unstake_more_than_staked_fails() {
        let mut ledger = seeded_ledger();
        ledger.stake(node(1), 1_000.0).unwrap();

        assert!(matches!(
            ledger.unstake(node(1), 1_500.0),
            Err(LedgerError::InsufficientStake { .. })
        ));
    }

    #[test]
    fn test_credit_reward_and_pool_exhaustion() {
        let mut ledger = seeded_ledger();

        ledger.credit_reward(node(1), 95.0, "daily").unwrap();
        assert_eq!(ledger.balance(&AccountId::Node(node(1))), 10_095.0);
        assert_eq!(ledger.balance(&AccountId::RewardPool), 49_905.0);

        let err = ledger.credit_reward(node(1), 1_000_000.0, "daily");
        assert!(matches!(
            err,
            Err(LedgerError::InsufficientRewardPool { .. })
        ));
    }

    #[test]
    fn test_every_transaction_is_verifiable() {
        let mut ledger = seeded_ledger();
        ledger.stake(node(1), 1_000.0).unwrap();
        ledger.unstake(node(1), 500.0).unwrap();
        ledger.credit_reward(node(2), 10.0, "daily").unwrap();

        for tx in ledger.history(None, 100) {
            assert!(ledger.verify(&tx).is_ok(), "tx {} must verify", tx.tx_id);
        }
    }

    #[test]
    fn test_history_filter_and_limit() {
        let mut ledger = seeded_ledger();
        ledger.stake(node(1), 1_000.0).unwrap();
        ledger.stake(node(2), 1_000.0).unwrap();
        ledger.credit_reward(node(1), 5.0, "daily").unwrap();

        let node1_history = ledger.history(Some(&node(1)), 100);
        assert_eq!(node1_history.len(), 3); // seed transfer + stake + reward
        assert!(node1_history
            .iter()
            .all(|tx| tx.from == AccountId::Node(node(1)) || tx.to == AccountId::Node(node(1))));

        let limited = ledger.history(None, 2);
        assert_eq!(limited.len(), 2);
        // Newest last, ordered by sequence
        assert!(limited[0].seq < limited[1].seq);
    }

    #[test]
    fn test_log_retention_ring() {
        networkneuron_crypto::init().unwrap();
        let identity = Arc::new(NodeIdentity::generate().unwrap());
        let mut ledger = Ledger::new(
            identity,
            LedgerConfig {
                tx_retention: 5,
                ..Default::default()
            },
        );
        ledger.seed(1_000_000.0, 0.5, &[(node(1), 500_000.0)]).unwrap();

        for _ in 0..10 {
            ledger.stake(node(1), 1_000.0).unwrap();
        }

        assert_eq!(ledger.log_len(), 5);
        // Oldest retained entry is not the first ever applied
        assert!(ledger.history(None, 100)[0].seq > 1);
    }

    #[test]
    fn test_balances_never_negative() {
        let mut ledger = seeded_ledger();

        let _ = ledger.stake(node(2), 5_000.0);
        let _ = ledger.stake(node(2), 5_000.0); // must fail, only 5k seeded
        let _ = ledger.unstake(node(2), 9_999.0);

        assert!(ledger.balance(&AccountId::Node(node(2))) >= 0.0);
        assert!(ledger.stake_of(&node(2)) >= 0.0);
        for (_, amount) in ledger.snapshot().balances {
            assert!(amount >= 0.0);
        }
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut ledger = seeded_ledger();
        ledger.stake(node(1), 2_000.0).unwrap();

        let snapshot = ledger.snapshot();

        // Two more transactions after the snapshot
        let tx1 = ledger.stake(node(2), 1_000.0).unwrap();
        let tx2 = ledger.credit_reward(node(1), 42.0, "daily").unwrap();

        let identity = Arc::new(NodeIdentity::generate().unwrap());
        let mut restored = Ledger::new(identity, LedgerConfig::default());
        // Restore must verify against the original coordinator key
        restored.identity = ledger.identity.clone();
        restored.restore(snapshot, vec![tx1, tx2]).unwrap();

        assert_eq!(
            restored.balance(&AccountId::Node(node(1))),
            ledger.balance(&AccountId::Node(node(1)))
        );
        assert_eq!(
            restored.balance(&AccountId::Node(node(2))),
            ledger.balance(&AccountId::Node(node(2)))
        );
        assert_eq!(restored.stake_of(&node(2)), ledger.stake_of(&node(2)));
        assert_eq!(
            restored.balance(&AccountId::RewardPool),
            ledger.balance(&AccountId::RewardPool)
        );
        assert_eq!(restored.total_supply(), ledger.total_supply());
    }

    #[test]
    fn test_restore_rejects_tampered_tail() {
        let mut ledger = seeded_ledger();
        let snapshot = ledger.snapshot();

        let mut tx = ledger.stake(node(1), 1_000.0).unwrap();
        tx.amount = 999_999.0; // forged

        let identity = ledger.identity.clone();
        let mut restored = Ledger::new(identity, LedgerConfig::default());
        assert!(restored.restore(snapshot, vec![tx]).is_err());
    }
}
