//! NetworkNeuron incentive ledger
//!
//! Balances, stakes and a signed transaction log; per-node accounting
//! counters fed by routing events; and the periodic reward engine that
//! pays relays out of the reward pool. The Ledger is the single writer
//! for balances, stakes and the log.

pub mod accounting;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod rewards;
pub mod transaction;

pub use accounting::{Accounting, AccountingSnapshot, NodePerformance};
pub use error::{LedgerError, Result};
pub use journal::Journal;
pub use ledger::{Amount, Ledger, LedgerConfig, LedgerSnapshot};
pub use rewards::{DistributionPhase, DistributionReport, RewardConfig, RewardEngine};
pub use transaction::{AccountId, Transaction, TxKind};
