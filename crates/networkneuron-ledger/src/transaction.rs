//! Signed ledger transactions

use serde::{Deserialize, Serialize};

use networkneuron_crypto::identity::verify;
use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::{NodeId, TxId};

use crate::error::{LedgerError, Result};

/// A party to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountId {
    Node(NodeId),
    /// Pays periodic rewards
    RewardPool,
    /// Holds locked stakes
    StakePool,
    /// Issuance account seeded with the initial supply
    Treasury,
}

impl AccountId {
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            AccountId::Node(id) => {
                let mut out = vec![0u8];
                out.extend_from_slice(id.as_bytes());
                out
            }
            AccountId::RewardPool => vec![1u8],
            AccountId::StakePool => vec![2u8],
            AccountId::Treasury => vec![3u8],
        }
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Node(id) => write!(f, "{}", id),
            AccountId::RewardPool => write!(f, "reward_pool"),
            AccountId::StakePool => write!(f, "stake_pool"),
            AccountId::Treasury => write!(f, "treasury"),
        }
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Stake,
    Unstake,
    Reward,
    Transfer,
}

impl TxKind {
    fn tag(self) -> u8 {
        match self {
            TxKind::Stake => 1,
            TxKind::Unstake => 2,
            TxKind::Reward => 3,
            TxKind::Transfer => 4,
        }
    }
}

/// One applied ledger operation, signed by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: TxId,
    /// Monotonic sequence number within this ledger
    pub seq: u64,
    pub kind: TxKind,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: f64,
    /// Unix milliseconds
    pub timestamp: u64,
    pub signature: Vec<u8>,
    pub metadata: Option<String>,
}

impl Transaction {
    /// Deterministic signing input; the signature field is excluded.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);

        out.extend_from_slice(self.tx_id.as_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.push(self.kind.tag());
        out.extend_from_slice(&self.from.canonical_bytes());
        out.extend_from_slice(&self.to.canonical_bytes());
        out.extend_from_slice(&self.amount.to_bits().to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        match &self.metadata {
            Some(meta) => {
                out.push(1);
                out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
                out.extend_from_slice(meta.as_bytes());
            }
            None => out.push(0),
        }

        out
    }

    /// Sign with the coordinator identity.
    pub fn sign(mut self, identity: &NodeIdentity) -> Self {
        self.signature = identity.sign(&self.canonical_bytes());
        self
    }

    /// Recompute the canonical bytes and check the coordinator signature.
    pub fn verify(&self, coordinator_public_key: &[u8]) -> Result<()> {
        verify(
            coordinator_public_key,
            &self.canonical_bytes(),
            &self.signature,
        )
        .map_err(|_| LedgerError::BadSignature {
            tx_id: self.tx_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::NODE_ID_SIZE;

    fn sample_tx(identity: &NodeIdentity) -> Transaction {
        Transaction {
            tx_id: TxId::from_bytes([7u8; 16]),
            seq: 42,
            kind: TxKind::Stake,
            from: AccountId::Node(NodeId::from_bytes([1u8; NODE_ID_SIZE])),
            to: AccountId::StakePool,
            amount: 1_000.0,
            timestamp: 1704067200000,
            signature: Vec::new(),
            metadata: None,
        }
        .sign(identity)
    }

    #[test]
    fn test_sign_verify_round_trip() {
        networkneuron_crypto::init().unwrap();
        let identity = NodeIdentity::generate().unwrap();

        let tx = sample_tx(&identity);
        assert!(tx.verify(&identity.export_public_key()).is_ok());
    }

    #[test]
    fn test_mutation_breaks_signature() {
        networkneuron_crypto::init().unwrap();
        let identity = NodeIdentity::generate().unwrap();
        let pk = identity.export_public_key();

        let mut amount_changed = sample_tx(&identity);
        amount_changed.amount += 0.5;
        assert!(amount_changed.verify(&pk).is_err());

        let mut kind_changed = sample_tx(&identity);
        kind_changed.kind = TxKind::Unstake;
        assert!(kind_changed.verify(&pk).is_err());

        let mut meta_changed = sample_tx(&identity);
        meta_changed.metadata = Some("period:daily".to_string());
        assert!(meta_changed.verify(&pk).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        networkneuron_crypto::init().unwrap();
        let identity = NodeIdentity::generate().unwrap();
        let other = NodeIdentity::generate().unwrap();

        let tx = sample_tx(&identity);
        assert_eq!(
            tx.verify(&other.export_public_key()),
            Err(LedgerError::BadSignature {
                tx_id: tx.tx_id.to_string()
            })
        );
    }

    #[test]
    fn test_canonical_bytes_distinguish_accounts() {
        let node = AccountId::Node(NodeId::from_bytes([0u8; NODE_ID_SIZE]));
        assert_ne!(node.canonical_bytes(), AccountId::RewardPool.canonical_bytes());
        assert_ne!(
            AccountId::RewardPool.canonical_bytes(),
            AccountId::StakePool.canonical_bytes()
        );
    }
}
