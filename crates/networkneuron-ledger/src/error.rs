//! Error types for ledger operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: f64, need: f64 },

    #[error("Insufficient stake: have {have}, need {need}")]
    InsufficientStake { have: f64, need: f64 },

    #[error("Stake {amount} below minimum {min_stake}")]
    MinStakeNotMet { amount: f64, min_stake: f64 },

    #[error("Reward pool exhausted: have {have}, need {need}")]
    InsufficientRewardPool { have: f64, need: f64 },

    #[error("Bad transaction signature for {tx_id}")]
    BadSignature { tx_id: String },

    #[error("Journal I/O failed: {0}")]
    Journal(String),

    #[error("Internal: {0}")]
    Internal(String),
}
