//! Mining engine for the ledger
//!
//! Assembles a candidate block from the pending pool, searches for a nonce
//! that satisfies the current target and submits the result to the ledger.

use crate::core::{
    Block, BlockError, Ledger, LedgerError, SharedLedger, Transaction, TransactionType,
    FEE_PER_TRANSACTION, MINING_REWARD,
};
use chrono::Utc;
use log::info;
use std::collections::HashSet;
use std::time::Instant;
use thiserror::Error;

/// Default number of pending transactions taken per block
pub const TRANSACTIONS_PER_BLOCK: usize = 2;

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    /// Another block landed on the tip while this one was being mined
    #[error("Mined block is stale: {0}")]
    Stale(BlockError),
    #[error("Mined block rejected: {0}")]
    Rejected(LedgerError),
    /// No nonce met the target within the configured attempts
    #[error("Gave up mining block {index} after {attempts} attempts (target {target})")]
    Exhausted { index: u64, target: u64, attempts: u64 },
    #[error("Mining task failed: {0}")]
    Task(String),
}

impl From<LedgerError> for MiningError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Block(err) if err.is_stale() => Self::Stale(err),
            other => Self::Rejected(other),
        }
    }
}

/// Miner configuration
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub transactions_per_block: usize,
    /// Hash attempts per block before giving up
    pub max_attempts: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            transactions_per_block: TRANSACTIONS_PER_BLOCK,
            max_attempts: u64::MAX,
        }
    }
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Miner for creating new blocks
#[derive(Debug, Clone)]
pub struct Miner {
    /// Address receiving the block reward
    pub reward_address: String,
    /// Address receiving the collected fees
    pub fee_address: String,
    config: MinerConfig,
}

impl Miner {
    /// Create a new miner
    pub fn new(reward_address: &str, fee_address: &str) -> Self {
        Self::with_config(reward_address, fee_address, MinerConfig::default())
    }

    pub fn with_config(reward_address: &str, fee_address: &str, config: MinerConfig) -> Self {
        Self {
            reward_address: reward_address.to_string(),
            fee_address: fee_address.to_string(),
            config,
        }
    }

    /// Pick pending user transactions for the next block.
    ///
    /// A transaction is skipped when one of its inputs is already spent on
    /// chain or by a transaction selected before it, or when it registers a
    /// student id or key already claimed by an earlier selection.
    pub fn select_transactions(&self, blocks: &[Block], pending: &[Transaction]) -> Vec<Transaction> {
        let mut spent: HashSet<(&str, u32)> = blocks
            .iter()
            .flat_map(|block| &block.transactions)
            .flat_map(|tx| tx.inputs())
            .map(|input| (input.transaction.as_str(), input.index))
            .collect();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut selected = Vec::new();

        for tx in pending {
            if selected.len() >= self.config.transactions_per_block {
                break;
            }
            if matches!(tx.kind(), TransactionType::Fee | TransactionType::Reward) {
                continue;
            }
            if tx
                .inputs()
                .iter()
                .any(|input| spent.contains(&(input.transaction.as_str(), input.index)))
            {
                continue;
            }
            if let Some(data) = tx.registration() {
                if claimed.contains(data.student_id.as_str())
                    || claimed.contains(data.public_key.as_str())
                {
                    continue;
                }
                claimed.insert(&data.student_id);
                claimed.insert(&data.public_key);
            }

            spent.extend(
                tx.inputs()
                    .iter()
                    .map(|input| (input.transaction.as_str(), input.index)),
            );
            selected.push(tx.clone());
        }

        selected
    }

    /// Unmined block on top of the ledger's tip
    pub fn candidate_block(&self, ledger: &Ledger) -> Block {
        let previous = ledger.get_last_block();
        let mut transactions =
            self.select_transactions(ledger.get_all_blocks(), ledger.get_all_transactions());

        if !transactions.is_empty() {
            let fees = FEE_PER_TRANSACTION * transactions.len() as u64;
            transactions.push(Transaction::fee(&self.fee_address, fees));
        }
        transactions.push(Transaction::reward(&self.reward_address, MINING_REWARD));

        Block::new(
            previous.index + 1,
            previous.hash.clone(),
            Utc::now().timestamp(),
            ledger.get_difficulty(None),
            transactions,
        )
    }

    /// Search nonces until the block meets its target (CPU-intensive)
    pub fn prove_work(block: &mut Block, max_attempts: u64) -> Result<MiningStats, MiningError> {
        let start = Instant::now();

        info!(
            "Mining block {} with target {} ({} transactions)...",
            block.index,
            block.target,
            block.tx_count()
        );

        let attempts = block
            .mine_with(|| Utc::now().timestamp(), max_attempts)
            .ok_or_else(|| {
                log::warn!(
                    "Gave up mining block {} after {} attempts",
                    block.index,
                    max_attempts
                );
                MiningError::Exhausted {
                    index: block.index,
                    target: block.target,
                    attempts: max_attempts,
                }
            })?;

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };

        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.index, elapsed, attempts, hash_rate
        );

        Ok(MiningStats {
            hash_attempts: attempts,
            time_ms: elapsed,
            hash_rate,
        })
    }

    /// Mine the next block while holding the ledger exclusively
    pub fn mine_block(&self, ledger: &mut Ledger) -> Result<(Block, MiningStats), MiningError> {
        let mut block = self.candidate_block(ledger);
        let stats = Self::prove_work(&mut block, self.config.max_attempts)?;
        let block = ledger.add_block(block, true)?;
        Ok((block, stats))
    }

    /// Mine the next block without holding the ledger lock during the search.
    ///
    /// The candidate is assembled under a read lock, the nonce search runs on
    /// the blocking pool, and the write lock is taken only to submit. If the
    /// tip moved in the meantime the result is [`MiningError::Stale`].
    pub async fn mine(&self, ledger: &SharedLedger) -> Result<(Block, MiningStats), MiningError> {
        let mut block = {
            let ledger = ledger.read().await;
            self.candidate_block(&ledger)
        };

        let max_attempts = self.config.max_attempts;
        let (block, stats) = tokio::task::spawn_blocking(move || {
            let stats = Self::prove_work(&mut block, max_attempts);
            (block, stats)
        })
        .await
        .map_err(|e| MiningError::Task(e.to_string()))?;
        let stats = stats?;

        let block = ledger.write().await.add_block(block, true)?;
        Ok((block, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{memory_ledger, mine, seal_block};
    use crate::core::{LedgerEvent, MIN_TARGET};
    use crate::wallet::{TransactionBuilder, Wallet};

    #[test]
    fn test_miner() {
        let mut ledger = memory_ledger();
        let miner = Miner::new("reward_address", "fee_address");

        let (block, stats) = miner.mine_block(&mut ledger).unwrap();

        assert_eq!(block.index, 1);
        assert!(block.is_valid_pow());
        assert!(stats.hash_attempts > 0);
        assert_eq!(block.tx_count(), 1);
        assert_eq!(block.transactions[0].kind(), TransactionType::Reward);
        assert_eq!(ledger.get_balance_for_address("reward_address"), MINING_REWARD);
    }

    #[test]
    fn test_fee_transaction_collects_fees() {
        let mut ledger = memory_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        mine(&mut ledger, &alice.address());

        let first = alice.create_transaction(&ledger, &bob.address(), 10, None).unwrap();
        ledger.add_transaction(first, false).unwrap();
        let second = alice.create_transaction(&ledger, &bob.address(), 20, None).unwrap();
        ledger.add_transaction(second, false).unwrap();

        let miner = Miner::new("reward_address", "fee_address");
        let (block, _) = miner.mine_block(&mut ledger).unwrap();

        assert_eq!(block.tx_count(), 4);
        assert_eq!(block.count_of(TransactionType::Fee), 1);
        assert_eq!(ledger.get_balance_for_address("fee_address"), 2);
        assert_eq!(ledger.get_balance_for_address(&bob.address()), 30);
        assert!(ledger.get_all_transactions().is_empty());
    }

    #[test]
    fn test_selection_limit_and_conflicts() {
        let mut ledger = memory_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        mine(&mut ledger, &alice.address());

        let utxos = ledger.get_unspent_transactions_for_address(Some(&alice.address()));
        let spend = |amount| {
            TransactionBuilder::new()
                .from(utxos.clone())
                .to(&bob.address(), amount)
                .fee(1)
                .sign(alice.key_pair())
                .build()
                .unwrap()
        };
        // Both spend the same output; only the first may be selected
        ledger.add_transaction(spend(10), false).unwrap();
        ledger.add_transaction(spend(20), false).unwrap();

        let miner = Miner::new("m", "m");
        let selected = miner.select_transactions(ledger.get_all_blocks(), ledger.get_all_transactions());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0], ledger.get_all_transactions()[0]);

        let idle = Miner::with_config(
            "m",
            "m",
            MinerConfig {
                transactions_per_block: 0,
                ..MinerConfig::default()
            },
        );
        assert!(idle
            .select_transactions(ledger.get_all_blocks(), ledger.get_all_transactions())
            .is_empty());
    }

    #[test]
    fn test_stale_submission() {
        let mut ledger = memory_ledger();
        let miner = Miner::new("m", "m");

        let mut late = miner.candidate_block(&ledger);
        Miner::prove_work(&mut late, u64::MAX).unwrap();

        // Someone else extends the tip first
        let previous = ledger.get_last_block().clone();
        let winner = seal_block(&previous, vec![Transaction::reward("other", MINING_REWARD)]);
        ledger.add_block(winner, false).unwrap();

        let err: MiningError = ledger.add_block(late, true).unwrap_err().into();
        assert!(matches!(err, MiningError::Stale(_)));
    }

    #[test]
    fn test_bounded_search_gives_up() {
        let mut ledger = memory_ledger();
        let miner = Miner::new("m", "m");
        let mut block = miner.candidate_block(&ledger);
        block.target = MIN_TARGET;

        let err = Miner::prove_work(&mut block, 50).unwrap_err();
        assert!(matches!(
            err,
            MiningError::Exhausted {
                index: 1,
                target: MIN_TARGET,
                attempts: 50
            }
        ));

        let bounded = Miner::with_config(
            "m",
            "m",
            MinerConfig {
                max_attempts: 0,
                ..MinerConfig::default()
            },
        );
        assert!(matches!(
            bounded.mine_block(&mut ledger),
            Err(MiningError::Exhausted { attempts: 0, .. })
        ));
        assert_eq!(ledger.get_all_blocks().len(), 1);
    }

    #[tokio::test]
    async fn test_mine_shared_ledger() {
        let ledger = memory_ledger().into_shared();
        let mut events = ledger.read().await.subscribe();
        let miner = Miner::new("m", "m");

        let (block, _) = miner.mine(&ledger).await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(ledger.read().await.get_last_block(), &block);

        match events.recv().await.unwrap() {
            LedgerEvent::BlockAdded(added) => assert_eq!(added, block),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_miners_keep_chain_linked() {
        let ledger = memory_ledger().into_shared();

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    let address = format!("miner-{i}");
                    Miner::new(&address, &address).mine(&ledger).await
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(MiningError::Stale(_)) => {}
                Err(other) => panic!("unexpected mining error {other}"),
            }
        }

        let ledger = ledger.read().await;
        assert!(accepted >= 1);
        assert_eq!(ledger.get_all_blocks().len(), accepted + 1);
        assert!(ledger.validator().check_chain(ledger.get_all_blocks()).is_ok());
    }
}
