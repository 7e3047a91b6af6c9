//! Attendance Ledger: a proof-of-work ledger for student registration and
//! attendance in Rust
//!
//! This crate provides:
//! - UTXO-based transactions with ECDSA signatures (secp256k1)
//! - Registration transactions binding a public key to a student id
//! - Attendance transactions signed by the registered key
//! - Proof of Work with periodic retargeting
//! - Chain replacement by cumulative work with stale transaction recovery
//! - JSON document persistence and change notifications
//!
//! # Example
//!
//! ```rust
//! use attendance_ledger::core::Ledger;
//! use attendance_ledger::mining::Miner;
//! use attendance_ledger::storage::MemoryStore;
//! use attendance_ledger::wallet::Wallet;
//!
//! let mut ledger = Ledger::open(MemoryStore::new()).unwrap();
//! let student = Wallet::new();
//!
//! // Mine a block to fund the wallet
//! let miner = Miner::new(&student.address(), &student.address());
//! let (block, stats) = miner.mine_block(&mut ledger).unwrap();
//! println!("Mined block {} in {}ms", block.index, stats.time_ms);
//!
//! // Register and record attendance
//! let registration = student.create_registration(&ledger, "21100052d").unwrap();
//! ledger.add_transaction(registration, true).unwrap();
//! let attendance = student
//!     .create_attendance(&ledger, "21100052d", "LECTURE-1", 1_700_000_000)
//!     .unwrap();
//! ledger.add_transaction(attendance, true).unwrap();
//!
//! let records = ledger.get_attendance_list_by_id("21100052d").unwrap();
//! assert_eq!(records.len(), 1);
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use core::{Block, Ledger, LedgerError, LedgerEvent, SharedLedger, Transaction};
pub use crypto::KeyPair;
pub use mining::Miner;
pub use storage::{JsonFileStore, MemoryStore, StorageConfig};
pub use wallet::{TransactionBuilder, Wallet};
