//! Wallet implementation for the ledger
//!
//! Provides key management and the operator actions a student or lecturer
//! performs: payments, registration of a student id and attendance records.

use crate::core::{Ledger, Transaction, FEE_PER_TRANSACTION, UTXO};
use crate::crypto::KeyPair;
use crate::wallet::builder::{BuilderError, TransactionBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Transaction error: {0}")]
    BuilderError(#[from] BuilderError),
    #[error("Student id '{0}' already registered")]
    StudentAlreadyRegistered(String),
    #[error("Public key '{0}' already registered")]
    PublicKeyAlreadyRegistered(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),
}

/// Serializable wallet data for persistence
#[derive(Debug, Serialize, Deserialize)]
struct WalletData {
    private_key_hex: String,
    address: String,
    label: Option<String>,
}

/// A ledger wallet: one key pair, whose public key is the address
#[derive(Debug, Clone)]
pub struct Wallet {
    /// The key pair for signing transactions
    key_pair: KeyPair,
    /// Optional label for the wallet
    pub label: Option<String>,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
            label: None,
        }
    }

    /// Create a wallet with a label
    pub fn with_label(label: &str) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            label: Some(label.to_string()),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self {
            key_pair,
            label: None,
        })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Get the wallet's address
    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Get the wallet's private key (hex)
    /// WARNING: Keep this secret!
    pub fn private_key(&self) -> String {
        self.key_pair.private_key_hex()
    }

    /// Balance over confirmed and pending transactions
    pub fn balance(&self, ledger: &Ledger) -> u64 {
        ledger.get_balance_for_address(&self.address())
    }

    /// Get UTXOs owned by this wallet, pending change included
    pub fn utxos(&self, ledger: &Ledger) -> Vec<UTXO> {
        ledger.get_unspent_transactions_for_address(Some(&self.address()))
    }

    fn spend_all(&self, ledger: &Ledger) -> TransactionBuilder {
        TransactionBuilder::new()
            .from(self.utxos(ledger))
            .fee(FEE_PER_TRANSACTION)
            .sign(&self.key_pair)
    }

    /// Pay `amount` to `recipient`, returning the remainder to `change` (or
    /// to this wallet)
    pub fn create_transaction(
        &self,
        ledger: &Ledger,
        recipient: &str,
        amount: u64,
        change: Option<&str>,
    ) -> Result<Transaction, WalletError> {
        let mut builder = self.spend_all(ledger).to(recipient, amount);
        if let Some(address) = change {
            builder = builder.change(address);
        }
        Ok(builder.build()?)
    }

    /// Bind this wallet's key to `student_id`.
    ///
    /// Fails early when the id or the key is already registered, confirmed
    /// or pending.
    pub fn create_registration(
        &self,
        ledger: &Ledger,
        student_id: &str,
    ) -> Result<Transaction, WalletError> {
        let address = self.address();
        if ledger.get_registration_by_student_id(student_id).is_some() {
            return Err(WalletError::StudentAlreadyRegistered(student_id.to_string()));
        }
        if ledger.get_registration_by_public_key(&address).is_some() {
            return Err(WalletError::PublicKeyAlreadyRegistered(address));
        }

        Ok(self
            .spend_all(ledger)
            .to(&address, 0)
            .registration(&address, student_id)
            .build()?)
    }

    /// Record presence of `student_id` at `event_id`
    pub fn create_attendance(
        &self,
        ledger: &Ledger,
        student_id: &str,
        event_id: &str,
        time_stamp: i64,
    ) -> Result<Transaction, WalletError> {
        let address = self.address();
        Ok(self
            .spend_all(ledger)
            .to(&address, 0)
            .attendance(&address, student_id, event_id, time_stamp)
            .build()?)
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            private_key_hex: self.private_key(),
            address: self.address(),
            label: self.label.clone(),
        };

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;

        let mut wallet = Self::from_private_key(&data.private_key_hex)?;
        wallet.label = data.label;
        Ok(wallet)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{memory_ledger, mine};
    use crate::core::MINING_REWARD;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert_eq!(wallet.address(), wallet.key_pair().public_key_hex());
        assert!(!wallet.private_key().is_empty());
    }

    #[test]
    fn test_wallet_import() {
        let wallet1 = Wallet::new();
        let private_key = wallet1.private_key();

        let wallet2 = Wallet::from_private_key(&private_key).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
    }

    #[test]
    fn test_wallet_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test_wallet.json");

        let wallet1 = Wallet::with_label("Test Wallet");
        wallet1.save(&path).unwrap();

        let wallet2 = Wallet::load(&path).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
        assert_eq!(wallet1.label, wallet2.label);
    }

    #[test]
    fn test_transaction_creation() {
        let mut ledger = memory_ledger();
        let wallet = Wallet::new();
        mine(&mut ledger, &wallet.address());
        assert_eq!(wallet.balance(&ledger), MINING_REWARD);

        let recipient = Wallet::new().address();
        let tx = wallet
            .create_transaction(&ledger, &recipient, 10, None)
            .unwrap();

        assert!(tx.check_structure().is_ok());
        assert_eq!(tx.outputs()[1].amount, MINING_REWARD - 10 - FEE_PER_TRANSACTION);
        assert!(ledger.add_transaction(tx, false).is_ok());
    }

    #[test]
    fn test_empty_wallet_cannot_pay() {
        let ledger = memory_ledger();
        let wallet = Wallet::new();

        let err = wallet
            .create_transaction(&ledger, "recipient", 10, None)
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::BuilderError(BuilderError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn test_registration_precheck() {
        let mut ledger = memory_ledger();
        let student = Wallet::new();
        let other = Wallet::new();
        mine(&mut ledger, &student.address());
        mine(&mut ledger, &other.address());

        let registration = student.create_registration(&ledger, "21100052d").unwrap();
        ledger.add_transaction(registration, false).unwrap();

        // Pending registrations already count
        assert!(matches!(
            other.create_registration(&ledger, "21100052d"),
            Err(WalletError::StudentAlreadyRegistered(_))
        ));
        assert!(matches!(
            student.create_registration(&ledger, "another"),
            Err(WalletError::PublicKeyAlreadyRegistered(_))
        ));
        assert!(other.create_registration(&ledger, "another").is_ok());
    }
}
