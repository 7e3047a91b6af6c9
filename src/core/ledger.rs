//! Ledger management
//!
//! The ledger owns the confirmed block list and the pending transaction pool.
//! Every mutation is validated and persisted before it becomes visible: the
//! change is applied to a staged copy, both documents are written, and only
//! then is the copy committed and an event broadcast.

use crate::core::block::{Block, BlockError};
use crate::core::difficulty;
use crate::core::fork::ChainError;
use crate::core::transaction::{Transaction, TransactionError};
use crate::core::utxo::{total_amount, unspent_outputs, UTXO};
use crate::core::validation::{
    chain_transactions, find_registration_by_public_key, find_registration_by_student_id,
    Validator,
};
use crate::storage::{read_collection, write_collection, Collection, DocumentStore, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A ledger shared between tasks. Mutations take the write lock for the
/// whole validate, persist and emit sequence.
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No registration found for student id '{0}'")]
    NotRegistered(String),
}

impl LedgerError {
    /// A block rejected because the tip moved on
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Block(err) if err.is_stale())
    }
}

/// Notifications sent after a mutation has been persisted
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    BlockAdded(Block),
    TransactionAdded(Transaction),
    /// The blocks applied on top of the common ancestor
    BlockchainReplaced(Vec<Block>),
}

/// One attendance record as seen in queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Id of the attendance transaction
    pub transaction: String,
    pub student_id: String,
    pub event_id: String,
    pub time_stamp: i64,
}

impl AttendanceRecord {
    fn from_transaction(tx: &Transaction) -> Option<Self> {
        tx.attendance().map(|data| Self {
            transaction: tx.id.clone(),
            student_id: data.student_id.clone(),
            event_id: data.event_id.clone(),
            time_stamp: data.time_stamp,
        })
    }
}

/// Confirmed blocks plus the pending pool
#[derive(Debug, Clone, Default)]
pub(crate) struct LedgerState {
    pub(crate) blocks: Vec<Block>,
    pub(crate) pending: Vec<Transaction>,
}

impl LedgerState {
    pub(crate) fn validator(&self) -> Validator<'_> {
        Validator::new(&self.blocks, &self.pending)
    }

    fn last_block(&self) -> &Block {
        self.blocks
            .last()
            .expect("Ledger should have at least genesis block")
    }

    /// Validate `block` as the next block and apply it
    pub(crate) fn apply_block(&mut self, block: Block) -> Result<(), BlockError> {
        self.validator()
            .check_block(&block, self.last_block(), &self.blocks)?;
        self.append_block(block);
        Ok(())
    }

    /// Like [`apply_block`](Self::apply_block), with attendance registrations
    /// resolved over `registry` instead of the local blocks
    pub(crate) fn apply_block_within(
        &mut self,
        block: Block,
        registry: &[Block],
    ) -> Result<(), BlockError> {
        Validator::new(registry, &self.pending).check_block(
            &block,
            self.last_block(),
            &self.blocks,
        )?;
        self.append_block(block);
        Ok(())
    }

    fn append_block(&mut self, block: Block) {
        self.pending.retain(|tx| !block.contains_transaction(&tx.id));
        self.blocks.push(block);
    }

    /// Seal, validate and pool `transaction`, returning the pooled copy
    pub(crate) fn admit_transaction(
        &mut self,
        mut transaction: Transaction,
    ) -> Result<Transaction, TransactionError> {
        transaction.seal();

        if self.pending.iter().any(|tx| tx.id == transaction.id) {
            return Err(TransactionError::AlreadyPending(transaction.id));
        }

        self.validator()
            .check_transaction(&transaction, &self.blocks)?;

        self.pending.push(transaction.clone());
        Ok(transaction)
    }

    fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        chain_transactions(&self.blocks).chain(self.pending.iter())
    }
}

/// The ledger aggregate
pub struct Ledger {
    pub(crate) state: LedgerState,
    store: Box<dyn DocumentStore>,
    events: broadcast::Sender<LedgerEvent>,
}

impl Ledger {
    /// Load the ledger from `store`.
    ///
    /// An empty store is initialised with the genesis block. Pool entries
    /// that were already mined (left behind by an interrupted write) are
    /// dropped.
    pub fn open(store: impl DocumentStore + 'static) -> Result<Self, LedgerError> {
        let store: Box<dyn DocumentStore> = Box::new(store);
        let mut blocks: Vec<Block> = read_collection(store.as_ref(), Collection::Blocks)?;
        let pending: Vec<Transaction> = read_collection(store.as_ref(), Collection::Transactions)?;

        if blocks.is_empty() {
            log::info!("Ledger empty, adding genesis block");
            blocks.push(Block::genesis());
            write_collection(store.as_ref(), Collection::Blocks, &blocks)?;
        }

        let pending_count = pending.len();
        let pending: Vec<Transaction> = pending
            .into_iter()
            .filter(|tx| !blocks.iter().any(|block| block.contains_transaction(&tx.id)))
            .collect();
        if pending.len() != pending_count {
            log::info!(
                "Removed {} already mined transactions from the pool",
                pending_count - pending.len()
            );
            write_collection(store.as_ref(), Collection::Transactions, &pending)?;
        }

        log::info!(
            "Ledger loaded: {} blocks, {} pending transactions",
            blocks.len(),
            pending.len()
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            state: LedgerState { blocks, pending },
            store,
            events,
        })
    }

    /// Wrap the ledger for sharing between tasks
    pub fn into_shared(self) -> SharedLedger {
        Arc::new(RwLock::new(self))
    }

    /// Receive events for mutations committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Validator over the current blocks and pool
    pub fn validator(&self) -> Validator<'_> {
        self.state.validator()
    }

    pub(crate) fn emit(&self, event: LedgerEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Persist `staged` and make it the current state
    pub(crate) fn commit(&mut self, staged: LedgerState) -> Result<(), LedgerError> {
        write_collection(self.store.as_ref(), Collection::Blocks, &staged.blocks)?;
        write_collection(self.store.as_ref(), Collection::Transactions, &staged.pending)?;
        self.state = staged;
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a block on top of the current tip
    pub fn add_block(&mut self, block: Block, emit: bool) -> Result<Block, LedgerError> {
        let mut staged = self.state.clone();
        if let Err(err) = staged.apply_block(block.clone()) {
            if err.is_stale() {
                log::debug!("Stale block {} rejected: {}", block.index, err);
            } else {
                log::warn!("Block {} rejected: {}", block.index, err);
            }
            return Err(err.into());
        }
        self.commit(staged)?;

        log::info!(
            "Block added: #{} {} ({} transactions)",
            block.index,
            block.hash,
            block.tx_count()
        );

        if emit {
            self.emit(LedgerEvent::BlockAdded(block.clone()));
        }
        Ok(block)
    }

    /// Add a transaction to the pending pool
    pub fn add_transaction(
        &mut self,
        transaction: Transaction,
        emit: bool,
    ) -> Result<Transaction, LedgerError> {
        let mut staged = self.state.clone();
        let transaction = staged.admit_transaction(transaction).map_err(|err| {
            log::warn!("Transaction rejected: {}", err);
            err
        })?;
        self.commit(staged)?;

        log::info!(
            "Transaction added: {} ({})",
            transaction.id,
            transaction.kind()
        );

        if emit {
            self.emit(LedgerEvent::TransactionAdded(transaction.clone()));
        }
        Ok(transaction)
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    pub fn get_all_blocks(&self) -> &[Block] {
        &self.state.blocks
    }

    pub fn get_block_by_index(&self, index: u64) -> Option<&Block> {
        self.state.blocks.iter().find(|block| block.index == index)
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.state.blocks.iter().find(|block| block.hash == hash)
    }

    pub fn get_last_block(&self) -> &Block {
        self.state.last_block()
    }

    /// Target for the block at `index`, or for the next block when `None`
    pub fn get_difficulty(&self, index: Option<u64>) -> u64 {
        difficulty::get_difficulty(&self.state.blocks, index)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// The pending pool
    pub fn get_all_transactions(&self) -> &[Transaction] {
        &self.state.pending
    }

    /// Pending transaction by id
    pub fn get_transaction_by_id(&self, id: &str) -> Option<&Transaction> {
        self.state.pending.iter().find(|tx| tx.id == id)
    }

    /// Confirmed transaction by id
    pub fn get_transaction_from_blocks(&self, id: &str) -> Option<&Transaction> {
        chain_transactions(&self.state.blocks).find(|tx| tx.id == id)
    }

    // ========================================================================
    // Registrations
    // ========================================================================

    /// Registration for `student_id`, confirmed first, then pending
    pub fn get_registration_by_student_id(&self, student_id: &str) -> Option<&Transaction> {
        find_registration_by_student_id(chain_transactions(&self.state.blocks), student_id)
            .or_else(|| find_registration_by_student_id(self.state.pending.iter(), student_id))
    }

    /// Registration for `public_key`, confirmed first, then pending
    pub fn get_registration_by_public_key(&self, public_key: &str) -> Option<&Transaction> {
        find_registration_by_public_key(chain_transactions(&self.state.blocks), public_key)
            .or_else(|| find_registration_by_public_key(self.state.pending.iter(), public_key))
    }

    pub fn get_student_id_by_public_key(&self, public_key: &str) -> Option<&str> {
        self.get_registration_by_public_key(public_key)
            .and_then(Transaction::registration)
            .map(|data| data.student_id.as_str())
    }

    // ========================================================================
    // Attendance
    // ========================================================================

    fn attendance_where(&self, predicate: impl Fn(&Transaction) -> bool) -> Vec<AttendanceRecord> {
        self.state
            .transactions()
            .filter(|&tx| predicate(tx))
            .filter_map(AttendanceRecord::from_transaction)
            .collect()
    }

    /// Attendance of the student registered as `student_id`
    pub fn get_attendance_list_by_id(
        &self,
        student_id: &str,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let public_key = self
            .get_registration_by_student_id(student_id)
            .and_then(Transaction::registration)
            .map(|data| data.public_key.clone())
            .ok_or_else(|| LedgerError::NotRegistered(student_id.to_string()))?;

        Ok(self.get_attendance_list_by_address(&public_key))
    }

    /// Attendance records whose first input is owned by `address`
    pub fn get_attendance_list_by_address(&self, address: &str) -> Vec<AttendanceRecord> {
        self.attendance_where(|tx| {
            tx.inputs()
                .first()
                .is_some_and(|input| input.address == address)
        })
    }

    /// Attendance records with `from <= timeStamp <= to`
    pub fn get_attendance_list_by_time(&self, from: i64, to: i64) -> Vec<AttendanceRecord> {
        self.attendance_where(|tx| {
            tx.attendance()
                .is_some_and(|data| (from..=to).contains(&data.time_stamp))
        })
    }

    pub fn get_attendance_list_for_id_by_time(
        &self,
        student_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut records = self.get_attendance_list_by_id(student_id)?;
        records.retain(|record| (from..=to).contains(&record.time_stamp));
        Ok(records)
    }

    pub fn get_attendance_list_by_event_id(&self, event_id: &str) -> Vec<AttendanceRecord> {
        self.attendance_where(|tx| tx.attendance().is_some_and(|data| data.event_id == event_id))
    }

    // ========================================================================
    // Balances
    // ========================================================================

    /// Unspent outputs over blocks and pool; every address when `None`
    pub fn get_unspent_transactions_for_address(&self, address: Option<&str>) -> Vec<UTXO> {
        unspent_outputs(&self.state.blocks, &self.state.pending, address)
    }

    pub fn get_balance_for_address(&self, address: &str) -> u64 {
        total_amount(&self.get_unspent_transactions_for_address(Some(address)))
    }
}
