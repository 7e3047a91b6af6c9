//! Mining module for block creation

pub mod miner;

pub use miner::{Miner, MinerConfig, MiningError, MiningStats, TRANSACTIONS_PER_BLOCK};
