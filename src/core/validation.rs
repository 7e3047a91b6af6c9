//! Transaction, block and chain validation
//!
//! Validation is read-only: every check either passes or reports the first
//! violated rule, and nothing is mutated either way.

use crate::core::block::{Block, BlockError};
use crate::core::fork::ChainError;
use crate::core::transaction::{
    attendance_hash, Transaction, TransactionBody, TransactionError, TransactionInput,
    TransactionType, MINING_REWARD,
};
use crate::crypto::is_valid_signature;
use std::collections::BTreeMap;

/// Every transaction of every block, in chain order
pub fn chain_transactions(blocks: &[Block]) -> impl Iterator<Item = &Transaction> {
    blocks.iter().flat_map(|block| block.transactions.iter())
}

/// Whether a transaction with this id was mined into any of `blocks`
pub fn contains_transaction(blocks: &[Block], id: &str) -> bool {
    blocks.iter().any(|block| block.contains_transaction(id))
}

/// Whether any transaction in `blocks` already spends the output `input` refers to
pub fn is_spent_in(blocks: &[Block], input: &TransactionInput) -> bool {
    chain_transactions(blocks)
        .flat_map(|tx| tx.inputs().iter())
        .any(|other| other.spends(&input.transaction, input.index))
}

/// First registration in `transactions` binding `student_id`
pub fn find_registration_by_student_id<'a>(
    mut transactions: impl Iterator<Item = &'a Transaction>,
    student_id: &str,
) -> Option<&'a Transaction> {
    transactions.find(|tx| {
        tx.registration()
            .is_some_and(|data| data.student_id == student_id)
    })
}

/// First registration in `transactions` binding `public_key`
pub fn find_registration_by_public_key<'a>(
    mut transactions: impl Iterator<Item = &'a Transaction>,
    public_key: &str,
) -> Option<&'a Transaction> {
    transactions.find(|tx| {
        tx.registration()
            .is_some_and(|data| data.public_key == public_key)
    })
}

/// Validator bound to the registrations attendance records may refer to.
///
/// Duplicate and spent checks run against the reference chain passed to each
/// call. Attendance resolves its registration over `registry` (the whole
/// chain being validated), then the block under check, then the pending pool.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    registry: &'a [Block],
    pending: &'a [Transaction],
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a [Block], pending: &'a [Transaction]) -> Self {
        Self { registry, pending }
    }

    fn registration_for<'r>(
        &'r self,
        student_id: &str,
        block: &'r [Transaction],
    ) -> Option<&'r Transaction> {
        find_registration_by_student_id(chain_transactions(self.registry), student_id)
            .or_else(|| find_registration_by_student_id(block.iter(), student_id))
            .or_else(|| find_registration_by_student_id(self.pending.iter(), student_id))
    }

    /// Check a single transaction against `reference_chain`.
    ///
    /// Only the chain is consulted for duplicate ids and spent inputs; the
    /// pending pool is never part of those checks.
    pub fn check_transaction(
        &self,
        transaction: &Transaction,
        reference_chain: &[Block],
    ) -> Result<(), TransactionError> {
        self.check_transaction_within(transaction, reference_chain, &[])
    }

    fn check_transaction_within(
        &self,
        transaction: &Transaction,
        reference_chain: &[Block],
        block: &[Transaction],
    ) -> Result<(), TransactionError> {
        transaction.check_structure()?;

        log::debug!("Checking transaction: {}", transaction.id);

        if contains_transaction(reference_chain, &transaction.id) {
            return Err(TransactionError::AlreadyInBlockchain(
                transaction.id.clone(),
            ));
        }

        if let Some(input) = transaction
            .inputs()
            .iter()
            .find(|input| is_spent_in(reference_chain, input))
        {
            return Err(TransactionError::InputAlreadySpent {
                id: transaction.id.clone(),
                transaction: input.transaction.clone(),
                index: input.index,
            });
        }

        match &transaction.body {
            TransactionBody::Registration(data) => {
                if find_registration_by_student_id(
                    chain_transactions(reference_chain),
                    &data.student_id,
                )
                .is_some()
                {
                    return Err(TransactionError::StudentAlreadyRegistered(
                        data.student_id.clone(),
                    ));
                }
                if find_registration_by_public_key(
                    chain_transactions(reference_chain),
                    &data.public_key,
                )
                .is_some()
                {
                    return Err(TransactionError::PublicKeyAlreadyRegistered(
                        data.public_key.clone(),
                    ));
                }
            }
            TransactionBody::Attendance(data) => {
                let bound_key = self
                    .registration_for(&data.student_id, block)
                    .and_then(Transaction::registration)
                    .map(|registration| registration.public_key.as_str())
                    .ok_or_else(|| TransactionError::NotRegistered(data.student_id.clone()))?;

                let hash = attendance_hash(&data.student_id, &data.event_id, data.time_stamp);
                if !is_valid_signature(bound_key, &data.signature, &hash) {
                    return Err(TransactionError::InvalidAttendanceSignature {
                        id: transaction.id.clone(),
                        student_id: data.student_id.clone(),
                    });
                }
            }
            TransactionBody::Regular(_) | TransactionBody::Fee(_) | TransactionBody::Reward(_) => {}
        }

        Ok(())
    }

    /// Check `new_block` as the successor of `previous_block`.
    ///
    /// The proof of work is measured against the block's own claimed target;
    /// the target is not re-derived from the difficulty policy here.
    pub fn check_block(
        &self,
        new_block: &Block,
        previous_block: &Block,
        reference_chain: &[Block],
    ) -> Result<(), BlockError> {
        let expected_index = previous_block.index + 1;
        if new_block.index != expected_index {
            return Err(BlockError::StaleIndex {
                expected: expected_index,
                got: new_block.index,
            });
        }

        if new_block.previous_hash != previous_block.hash {
            return Err(BlockError::InvalidPreviousHash {
                expected: previous_block.hash.clone(),
                got: new_block.previous_hash.clone(),
            });
        }

        let block_hash = new_block.calculate_hash();
        if block_hash != new_block.hash {
            return Err(BlockError::InvalidHash {
                expected: block_hash,
                got: new_block.hash.clone(),
            });
        }

        if !new_block.is_valid_pow() {
            return Err(BlockError::InsufficientProofOfWork {
                measure: new_block.proof_of_work(),
                target: new_block.target,
            });
        }

        for transaction in &new_block.transactions {
            self.check_transaction_within(transaction, reference_chain, &new_block.transactions)
                .map_err(|source| BlockError::InvalidTransaction {
                    index: new_block.index,
                    source,
                })?;
        }

        let inputs = new_block.total_input() + u128::from(MINING_REWARD);
        let outputs = new_block.total_output();
        if inputs < outputs {
            return Err(BlockError::InvalidBalance { inputs, outputs });
        }

        let mut uses: BTreeMap<(&str, u32), usize> = BTreeMap::new();
        for input in new_block.transactions.iter().flat_map(|tx| tx.inputs()) {
            *uses.entry((input.transaction.as_str(), input.index)).or_default() += 1;
        }
        let reused: Vec<String> = uses
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((transaction, index), _)| format!("{}|{}", transaction, index))
            .collect();
        if !reused.is_empty() {
            return Err(BlockError::DoubleSpend(reused));
        }

        let fees = new_block.count_of(TransactionType::Fee);
        if fees > 1 {
            return Err(BlockError::TooManyFeeTransactions(fees));
        }
        let rewards = new_block.count_of(TransactionType::Reward);
        if rewards > 1 {
            return Err(BlockError::TooManyRewardTransactions(rewards));
        }

        Ok(())
    }

    /// Check a full chain: the genesis block must be the fixed constant and
    /// every block must be a valid successor of the one before it, validated
    /// against the chain prefix that precedes it. Attendance registrations
    /// resolve over the whole of `chain`.
    pub fn check_chain(&self, chain: &[Block]) -> Result<(), ChainError> {
        match chain.first() {
            Some(genesis) if *genesis == Block::genesis() => {}
            _ => return Err(ChainError::GenesisMismatch),
        }

        let validator = Validator::new(chain, self.pending);
        for i in 1..chain.len() {
            validator
                .check_block(&chain[i], &chain[i - 1], &chain[..i])
                .map_err(|source| ChainError::InvalidBlockSequence {
                    index: chain[i].index,
                    source,
                })?;
        }

        Ok(())
    }
}
