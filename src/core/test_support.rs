//! Helpers shared by unit tests

use crate::core::block::{Block, MAX_TARGET};
use crate::core::ledger::Ledger;
use crate::core::transaction::Transaction;
use crate::mining::Miner;
use crate::storage::MemoryStore;

/// Fresh ledger holding only the genesis block
pub fn memory_ledger() -> Ledger {
    Ledger::open(MemoryStore::new()).unwrap()
}

/// Mine the next block through [`Miner`], paying `address`
pub fn mine(ledger: &mut Ledger, address: &str) -> Block {
    let miner = Miner::new(address, address);
    let (block, _) = miner.mine_block(ledger).unwrap();
    block
}

/// Successor of `previous` holding `transactions`, timestamped one second
/// later and mined against the maximum target
pub fn seal_block(previous: &Block, transactions: Vec<Transaction>) -> Block {
    let timestamp = previous.timestamp + 1;
    let mut block = Block::new(
        previous.index + 1,
        previous.hash.clone(),
        timestamp,
        MAX_TARGET,
        transactions,
    );
    block.mine_with(|| timestamp, u64::MAX);
    block
}
