//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model with registration and attendance payloads)
//! - Blocks (with proof of work against a claimed target)
//! - Difficulty policy (periodic retargeting)
//! - Validation (transactions, blocks and whole chains)
//! - Ledger (blocks plus pending pool, persisted and observable)
//! - Fork choice (cumulative work and chain replacement)

pub mod block;
pub mod difficulty;
pub mod fork;
pub mod ledger;
pub mod transaction;
pub mod utxo;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use block::{
    Block, BlockError, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP, GENESIS_TRANSACTION_ID,
    MAX_TARGET, MIN_TARGET,
};
pub use difficulty::{get_difficulty, DIFFICULTY_ADJUSTMENT_INTERVAL, TARGET_BLOCK_TIME};
pub use fork::{common_ancestor, cumulative_difficulty, ChainError};
pub use ledger::{AttendanceRecord, Ledger, LedgerError, LedgerEvent, SharedLedger};
pub use transaction::{
    attendance_hash, input_hash, registration_hash, AttendanceData, RegistrationData,
    Transaction, TransactionBody, TransactionError, TransactionInput, TransactionOutput,
    TransactionType, TransferData, FEE_PER_TRANSACTION, MINING_REWARD,
};
pub use utxo::{total_amount, unspent_outputs, UTXO};
pub use validation::Validator;
