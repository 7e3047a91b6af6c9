//! Wallet module for key and transaction management

pub mod builder;
pub mod wallet;

pub use builder::{BuilderError, TransactionBuilder};
pub use wallet::{Wallet, WalletError};
