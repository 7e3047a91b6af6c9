//! Block implementation for the ledger
//!
//! A block carries its chain position, a proof-of-work target and nonce, and
//! an ordered list of transactions. Its hash covers every other field.

use crate::core::transaction::{
    Transaction, TransactionBody, TransactionError, TransactionType, TransferData,
};
use crate::crypto::{canonical_hash, meets_target, proof_of_work_measure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Largest target, and the genesis target (2^53 - 1)
pub const MAX_TARGET: u64 = 9_007_199_254_740_991;

/// Smallest target a retarget may produce.
///
/// A target of 1 only accepts a hash whose first 14 hex digits are all zero
/// (one hash in 2^56), so a chain retargeted this far cannot be extended in
/// practice. Bound the search with `MinerConfig::max_attempts`.
pub const MIN_TARGET: u64 = 1;

/// Previous hash recorded by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Fixed genesis timestamp (seconds)
pub const GENESIS_TIMESTAMP: i64 = 1_465_154_705;

/// Id of the single empty transaction in the genesis block
pub const GENESIS_TRANSACTION_ID: &str =
    "63ec3ac02f822450039df13ddf7c3c0f19bab4acd4dc928c62fcd78d5ebc6dba";

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Invalid index: expected '{expected}' got '{got}'")]
    StaleIndex { expected: u64, got: u64 },
    #[error("Invalid previous hash: expected '{expected}' got '{got}'")]
    InvalidPreviousHash { expected: String, got: String },
    #[error("Invalid hash: expected '{expected}' got '{got}'")]
    InvalidHash { expected: String, got: String },
    #[error("Invalid proof-of-work: measure '{measure}' is not below target '{target}'")]
    InsufficientProofOfWork { measure: u64, target: u64 },
    #[error("Invalid transaction in block {index}: {source}")]
    InvalidTransaction {
        index: u64,
        #[source]
        source: TransactionError,
    },
    #[error("Invalid block balance: inputs sum '{inputs}', outputs sum '{outputs}'")]
    InvalidBalance { inputs: u128, outputs: u128 },
    #[error("Unspent outputs used more than once in block: {0:?}")]
    DoubleSpend(Vec<String>),
    #[error("Invalid fee transaction count: expected '1' got '{0}'")]
    TooManyFeeTransactions(usize),
    #[error("Invalid reward transaction count: expected '1' got '{0}'")]
    TooManyRewardTransactions(usize),
}

impl BlockError {
    /// A block built on a last block that is no longer the tip. Miners can
    /// retry with a fresh read instead of treating this as fatal.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleIndex { .. })
    }
}

/// A block in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block index/height
    pub index: u64,
    /// Hash of the predecessor (`"0"` for genesis)
    pub previous_hash: String,
    /// Creation time in seconds
    pub timestamp: i64,
    /// Nonce used for proof of work
    pub nonce: u64,
    /// The block hash's measure must be strictly below this value
    pub target: u64,
    pub transactions: Vec<Transaction>,
    /// Hash over every other field (cached)
    pub hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHashMaterial<'a> {
    index: u64,
    previous_hash: &'a str,
    timestamp: i64,
    nonce: u64,
    target: u64,
    transactions: &'a [Transaction],
}

impl Block {
    /// Create a new block (unmined, nonce 0)
    pub fn new(
        index: u64,
        previous_hash: String,
        timestamp: i64,
        target: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            nonce: 0,
            target,
            transactions,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The fixed genesis block, identical on every instance
    pub fn genesis() -> Self {
        let transaction = Transaction {
            id: GENESIS_TRANSACTION_ID.to_string(),
            hash: None,
            body: TransactionBody::Regular(TransferData::default()),
        };

        Self::new(
            0,
            GENESIS_PREVIOUS_HASH.to_string(),
            GENESIS_TIMESTAMP,
            MAX_TARGET,
            vec![transaction],
        )
    }

    /// Calculate the hash of the block content
    pub fn calculate_hash(&self) -> String {
        canonical_hash(&BlockHashMaterial {
            index: self.index,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            nonce: self.nonce,
            target: self.target,
            transactions: &self.transactions,
        })
    }

    /// Verify the cached block hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Proof-of-work measure derived from the block hash
    pub fn proof_of_work(&self) -> u64 {
        proof_of_work_measure(&self.hash)
    }

    /// Check if the proof of work satisfies the block's own target
    pub fn is_valid_pow(&self) -> bool {
        meets_target(&self.hash, self.target)
    }

    /// Search nonces until the hash satisfies the target, returning the
    /// number of attempts, or `None` once `max_attempts` hashes failed. The
    /// timestamp is refreshed by `clock` between attempts so long searches
    /// record when the proof was found.
    pub fn mine_with(
        &mut self,
        mut clock: impl FnMut() -> i64,
        max_attempts: u64,
    ) -> Option<u64> {
        let mut attempts = 0u64;

        while attempts < max_attempts {
            self.timestamp = clock();
            self.hash = self.calculate_hash();
            attempts += 1;

            if self.is_valid_pow() {
                return Some(attempts);
            }

            self.nonce = self.nonce.wrapping_add(1);
        }

        None
    }

    /// Sum of the input amounts of every transaction
    pub fn total_input(&self) -> u128 {
        self.transactions.iter().map(Transaction::total_input).sum()
    }

    /// Sum of the output amounts of every transaction
    pub fn total_output(&self) -> u128 {
        self.transactions.iter().map(Transaction::total_output).sum()
    }

    /// Number of transactions of the given type
    pub fn count_of(&self, kind: TransactionType) -> usize {
        self.transactions.iter().filter(|tx| tx.kind() == kind).count()
    }

    /// Whether a transaction with this id is in the block
    pub fn contains_transaction(&self, id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id == id)
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::MINING_REWARD;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.timestamp, GENESIS_TIMESTAMP);
        assert_eq!(genesis.target, MAX_TARGET);
        assert_eq!(genesis.tx_count(), 1);
        assert_eq!(genesis.transactions[0].id, GENESIS_TRANSACTION_ID);
        assert!(genesis.verify_hash());
    }

    #[test]
    fn test_genesis_is_identical_everywhere() {
        let a = serde_json::to_string(&Block::genesis()).unwrap();
        let b = serde_json::to_string(&Block::genesis()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_block_mining() {
        let genesis = Block::genesis();
        let mut block = Block::new(
            1,
            genesis.hash.clone(),
            GENESIS_TIMESTAMP + 60,
            MAX_TARGET,
            vec![Transaction::reward("miner", MINING_REWARD)],
        );

        let attempts = block.mine_with(|| GENESIS_TIMESTAMP + 60, u64::MAX).unwrap();

        assert!(attempts >= 1);
        assert!(block.is_valid_pow());
        assert!(block.verify_hash());
        assert!(block.proof_of_work() < MAX_TARGET);
    }

    #[test]
    fn test_mining_gives_up_after_max_attempts() {
        let mut block = Block::new(
            1,
            Block::genesis().hash,
            GENESIS_TIMESTAMP + 60,
            MIN_TARGET,
            vec![Transaction::reward("miner", MINING_REWARD)],
        );

        assert_eq!(block.mine_with(|| GENESIS_TIMESTAMP + 60, 100), None);
        assert_eq!(block.nonce, 100);
        assert_eq!(block.mine_with(|| GENESIS_TIMESTAMP + 60, 0), None);
    }

    #[test]
    fn test_block_hash_verification() {
        let mut block = Block::genesis();
        assert!(block.verify_hash());

        block.nonce += 1;
        assert!(!block.verify_hash());
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(Block::genesis()).unwrap();
        assert_eq!(value["previousHash"], "0");
        assert_eq!(value["target"], MAX_TARGET);
        assert_eq!(value["transactions"][0]["type"], "regular");
    }

    #[test]
    fn test_stale_index_is_distinguished() {
        assert!(BlockError::StaleIndex {
            expected: 2,
            got: 1
        }
        .is_stale());
        assert!(!BlockError::TooManyFeeTransactions(2).is_stale());
    }
}
