//! Fork choice and chain replacement
//!
//! A candidate chain replaces the local one when it carries strictly more
//! cumulative work. Blocks past the common ancestor are swapped out as one
//! unit, and the regular transactions they carried go back into the pool.

use crate::core::block::{Block, BlockError, MAX_TARGET};
use crate::core::ledger::{Ledger, LedgerError, LedgerEvent, LedgerState};
use crate::core::transaction::{Transaction, TransactionType};
use crate::core::validation::{contains_transaction, Validator};
use thiserror::Error;

/// Chain replacement errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Candidate chain has less cumulative work: {candidate} <= {local}")]
    InsufficientWork { candidate: f64, local: f64 },
    #[error("No common ancestor with the candidate chain")]
    NoCommonAncestor,
    #[error("Genesis blocks aren't the same")]
    GenesisMismatch,
    #[error("Invalid block sequence at block {index}: {source}")]
    InvalidBlockSequence {
        index: u64,
        #[source]
        source: BlockError,
    },
    #[error("Stale transaction '{0}' spends no output of the new chain")]
    UnresolvableStaleTransaction(String),
}

/// Work score of a chain: the sum of `(target + 1) / MAX_TARGET` per block.
///
/// Easier targets score higher, so this measures neither hashes nor time.
pub fn cumulative_difficulty(blocks: &[Block]) -> f64 {
    blocks
        .iter()
        .map(|block| (block.target as f64 + 1.0) / MAX_TARGET as f64)
        .sum()
}

/// Highest index `i` such that both chains hold the same block hash at
/// every position up to `i`, scanning position by position from genesis.
///
/// The scan stops at the first position where the hashes differ or where
/// either chain runs out.
pub fn common_ancestor(local: &[Block], candidate: &[Block]) -> Option<usize> {
    local
        .iter()
        .zip(candidate)
        .take_while(|(ours, theirs)| ours.hash == theirs.hash)
        .count()
        .checked_sub(1)
}

impl LedgerState {
    /// Return stale regular transactions to the pool
    fn readmit_stale(&mut self, stale: &[Block]) -> Result<Vec<Transaction>, LedgerError> {
        let mut readmitted = Vec::new();

        for transaction in stale.iter().flat_map(|block| &block.transactions) {
            if transaction.kind() != TransactionType::Regular
                || self.pending.iter().any(|tx| tx.id == transaction.id)
                || contains_transaction(&self.blocks, &transaction.id)
            {
                continue;
            }

            let resolvable = transaction
                .inputs()
                .iter()
                .any(|input| contains_transaction(&self.blocks, &input.transaction));
            if !resolvable {
                log::error!(
                    "Stale transaction {} spends no output of the new chain",
                    transaction.id
                );
                return Err(ChainError::UnresolvableStaleTransaction(transaction.id.clone()).into());
            }

            log::debug!("Returning stale transaction to the pool: {}", transaction.id);
            readmitted.push(self.admit_transaction(transaction.clone())?);
        }

        Ok(readmitted)
    }
}

impl Ledger {
    /// Replace the local chain with `candidate` when it carries more work.
    ///
    /// Returns the blocks applied on top of the common ancestor. On any
    /// failure the ledger is left exactly as it was.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<Vec<Block>, LedgerError> {
        let local_work = cumulative_difficulty(&self.state.blocks);
        let candidate_work = cumulative_difficulty(&candidate);
        if candidate_work <= local_work {
            log::error!(
                "Blockchain shorter than the current blockchain ({} <= {})",
                candidate_work,
                local_work
            );
            return Err(ChainError::InsufficientWork {
                candidate: candidate_work,
                local: local_work,
            }
            .into());
        }

        let ancestor = common_ancestor(&self.state.blocks, &candidate).ok_or_else(|| {
            log::error!("No common ancestor with the candidate chain");
            ChainError::NoCommonAncestor
        })?;

        let new_blocks = candidate[ancestor + 1..].to_vec();
        let spliced: Vec<Block> = self.state.blocks[..=ancestor]
            .iter()
            .chain(new_blocks.iter())
            .cloned()
            .collect();
        Validator::new(&spliced, &self.state.pending)
            .check_chain(&spliced)
            .map_err(|err| {
                log::error!("Invalid candidate chain: {}", err);
                err
            })?;

        let mut staged = self.state.clone();
        let stale = staged.blocks.split_off(ancestor + 1);
        for block in &new_blocks {
            staged
                .apply_block_within(block.clone(), &spliced)
                .map_err(|source| ChainError::InvalidBlockSequence {
                    index: block.index,
                    source,
                })?;
        }
        let readmitted = staged.readmit_stale(&stale)?;

        self.commit(staged)?;

        log::info!(
            "Blockchain replaced: {} blocks from #{} ({} stale, {} transactions returned to the pool)",
            new_blocks.len(),
            ancestor + 1,
            stale.len(),
            readmitted.len()
        );

        for transaction in readmitted {
            self.emit(LedgerEvent::TransactionAdded(transaction));
        }
        self.emit(LedgerEvent::BlockchainReplaced(new_blocks.clone()));

        Ok(new_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{memory_ledger, mine, seal_block};
    use crate::core::transaction::MINING_REWARD;
    use crate::wallet::Wallet;

    fn extend(chain: &mut Vec<Block>, count: usize) {
        for _ in 0..count {
            let previous = chain.last().unwrap().clone();
            chain.push(seal_block(
                &previous,
                vec![Transaction::reward("other", MINING_REWARD)],
            ));
        }
    }

    #[test]
    fn test_cumulative_difficulty() {
        assert_eq!(cumulative_difficulty(&[]), 0.0);

        let genesis = Block::genesis();
        let work = cumulative_difficulty(std::slice::from_ref(&genesis));
        assert!((work - (MAX_TARGET as f64 + 1.0) / MAX_TARGET as f64).abs() < 1e-12);

        let mut hard = genesis.clone();
        hard.target = 1;
        assert!(cumulative_difficulty(&[hard]) < work);
    }

    #[test]
    fn test_common_ancestor() {
        let mut local = vec![Block::genesis()];
        extend(&mut local, 2);
        let mut candidate = local[..2].to_vec();
        extend(&mut candidate, 3);

        assert_eq!(common_ancestor(&local, &candidate), Some(1));
        assert_eq!(common_ancestor(&local, &local), Some(2));
        assert_eq!(common_ancestor(&local, &[]), None);

        let mut foreign = Block::genesis();
        foreign.nonce = 1;
        foreign.hash = foreign.calculate_hash();
        assert_eq!(common_ancestor(&local, &[foreign]), None);
    }

    #[test]
    fn test_replacement_requires_more_work() {
        let mut ledger = memory_ledger();
        let miner = Wallet::new();
        mine(&mut ledger, &miner.address());
        mine(&mut ledger, &miner.address());
        let before = ledger.get_all_blocks().to_vec();

        let mut candidate = vec![Block::genesis()];
        extend(&mut candidate, 2);

        let err = ledger.replace_chain(candidate).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Chain(ChainError::InsufficientWork { .. })
        ));
        assert_eq!(ledger.get_all_blocks(), &before[..]);
    }

    #[test]
    fn test_longer_chain_replaces_local() {
        let mut ledger = memory_ledger();
        let miner = Wallet::new();
        mine(&mut ledger, &miner.address());

        let mut candidate = vec![Block::genesis()];
        extend(&mut candidate, 3);

        let mut events = ledger.subscribe();
        let applied = ledger.replace_chain(candidate.clone()).unwrap();

        assert_eq!(applied, candidate[1..].to_vec());
        assert_eq!(ledger.get_all_blocks(), &candidate[..]);
        assert_eq!(ledger.get_balance_for_address(&miner.address()), 0);

        match events.try_recv().unwrap() {
            LedgerEvent::BlockchainReplaced(blocks) => assert_eq!(blocks.len(), 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_stale_transactions_return_to_pool() {
        let mut ledger = memory_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        mine(&mut ledger, &alice.address());
        let funded = ledger.get_all_blocks().to_vec();

        let payment = alice.create_transaction(&ledger, &bob.address(), 25, None).unwrap();
        let payment = ledger.add_transaction(payment, false).unwrap();
        mine(&mut ledger, &alice.address());
        assert!(ledger.get_transaction_from_blocks(&payment.id).is_some());

        // Competing branch from the funding block, one block longer
        let mut candidate = funded;
        extend(&mut candidate, 2);

        let mut events = ledger.subscribe();
        ledger.replace_chain(candidate.clone()).unwrap();

        assert_eq!(ledger.get_all_blocks(), &candidate[..]);
        assert_eq!(ledger.get_all_transactions(), &[payment.clone()]);
        assert_eq!(ledger.get_balance_for_address(&bob.address()), 25);

        match events.try_recv().unwrap() {
            LedgerEvent::TransactionAdded(tx) => assert_eq!(tx.id, payment.id),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            LedgerEvent::BlockchainReplaced(_)
        ));
    }

    #[test]
    fn test_unresolvable_stale_transaction_aborts() {
        let mut ledger = memory_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        mine(&mut ledger, &alice.address());

        let payment = alice.create_transaction(&ledger, &bob.address(), 25, None).unwrap();
        ledger.add_transaction(payment, false).unwrap();
        mine(&mut ledger, &alice.address());
        let before = ledger.get_all_blocks().to_vec();

        // Branch from genesis: alice's funding reward disappears with it
        let mut candidate = vec![Block::genesis()];
        extend(&mut candidate, 3);

        let err = ledger.replace_chain(candidate).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Chain(ChainError::UnresolvableStaleTransaction(_))
        ));
        assert_eq!(ledger.get_all_blocks(), &before[..]);
        assert!(ledger.get_all_transactions().is_empty());
    }

    #[test]
    fn test_invalid_candidate_is_rejected() {
        let mut ledger = memory_ledger();

        let mut candidate = vec![Block::genesis()];
        extend(&mut candidate, 2);
        candidate[2].previous_hash = "ab".repeat(32);
        candidate[2].hash = candidate[2].calculate_hash();

        let err = ledger.replace_chain(candidate).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Chain(ChainError::InvalidBlockSequence { index: 2, .. })
        ));
        assert_eq!(ledger.get_all_blocks().len(), 1);
    }

    #[test]
    fn test_foreign_genesis_has_no_common_ancestor() {
        let mut ledger = memory_ledger();

        let mut genesis = Block::genesis();
        genesis.timestamp += 1;
        genesis.hash = genesis.calculate_hash();
        let mut candidate = vec![genesis];
        extend(&mut candidate, 2);

        assert!(matches!(
            ledger.replace_chain(candidate).unwrap_err(),
            LedgerError::Chain(ChainError::NoCommonAncestor)
        ));
    }

    #[test]
    fn test_chain_with_registration_and_attendance_in_one_block() {
        let mut ledger = memory_ledger();
        let student = Wallet::new();
        mine(&mut ledger, &student.address());

        let registration = student.create_registration(&ledger, "21100052d").unwrap();
        ledger.add_transaction(registration, false).unwrap();
        let attendance = student
            .create_attendance(&ledger, "21100052d", "LECTURE-1", 1_700_000_000)
            .unwrap();
        ledger.add_transaction(attendance, false).unwrap();

        let block = mine(&mut ledger, &student.address());
        assert_eq!(block.count_of(TransactionType::Registration), 1);
        assert_eq!(block.count_of(TransactionType::Attendance), 1);
        assert!(ledger.get_all_transactions().is_empty());
        assert!(ledger
            .validator()
            .check_chain(ledger.get_all_blocks())
            .is_ok());

        let mut candidate = ledger.get_all_blocks().to_vec();
        extend(&mut candidate, 2);
        let applied = ledger.replace_chain(candidate).unwrap();

        assert_eq!(applied.len(), 2);
        assert_eq!(ledger.get_all_blocks().len(), 5);
        assert_eq!(
            ledger.get_attendance_list_by_id("21100052d").unwrap().len(),
            1
        );
    }
}
