//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model with digital signatures over
//! five transaction kinds: regular transfers, block fee and reward payouts,
//! identity registrations and attendance records.

use crate::crypto::{canonical_hash, is_valid_signature, random_id};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Reward paid to the miner of every block
pub const MINING_REWARD: u64 = 5_000_000_000;

/// Fixed fee every user transaction must leave for the miner
pub const FEE_PER_TRANSACTION: u64 = 1;

/// Length of a transaction id in hex characters
pub const TRANSACTION_ID_LEN: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid transaction hash for '{id}': expected '{expected}' got '{got}'")]
    InvalidHash {
        id: String,
        expected: String,
        got: String,
    },
    #[error("Invalid signature for input {transaction}:{index} of transaction '{id}'")]
    InvalidInputSignature {
        id: String,
        transaction: String,
        index: u32,
    },
    #[error("Invalid transaction balance for '{id}': inputs sum '{inputs}', outputs sum '{outputs}'")]
    InvalidBalance { id: String, inputs: u128, outputs: u128 },
    #[error("Not enough fee for '{id}': expected '{required}' got '{fee}'")]
    InsufficientFee { id: String, fee: u128, required: u128 },
    #[error("Invalid registration signature for transaction '{0}'")]
    InvalidRegistrationSignature(String),
    #[error("Transaction '{0}' is already in the blockchain")]
    AlreadyInBlockchain(String),
    #[error("Transaction '{0}' is already pending")]
    AlreadyPending(String),
    #[error("Not all inputs are unspent for transaction '{id}': {transaction}:{index} already spent")]
    InputAlreadySpent {
        id: String,
        transaction: String,
        index: u32,
    },
    #[error("Student id '{0}' already registered")]
    StudentAlreadyRegistered(String),
    #[error("Public key '{0}' already registered")]
    PublicKeyAlreadyRegistered(String),
    #[error("No registration found for student id '{0}'")]
    NotRegistered(String),
    #[error("Invalid attendance signature for student id '{student_id}' in transaction '{id}'")]
    InvalidAttendanceSignature { id: String, student_id: String },
}

impl TransactionError {
    /// Whether the error comes from the structural check (the transaction is
    /// malformed on its own, independent of any chain)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidHash { .. }
                | Self::InvalidInputSignature { .. }
                | Self::InvalidBalance { .. }
                | Self::InsufficientFee { .. }
                | Self::InvalidRegistrationSignature(_)
        )
    }
}

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Transaction input: a reference to a prior output, signed by its owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionInput {
    /// Id of the transaction that produced the output
    pub transaction: String,
    /// Position of the output in that transaction
    pub index: u32,
    /// Owner of the output (public key hex)
    pub address: String,
    pub amount: u64,
    /// Owner's signature over [`input_hash`]
    pub signature: String,
}

impl TransactionInput {
    /// Hash the owner signs to authorize spending this output
    pub fn signing_hash(&self) -> String {
        input_hash(&self.transaction, self.index, &self.address)
    }

    /// Whether this input spends the given output
    pub fn spends(&self, transaction: &str, index: u32) -> bool {
        self.transaction == transaction && self.index == index
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    /// Recipient's address (public key hex)
    pub address: String,
}

#[derive(Serialize)]
struct InputHashMaterial<'a> {
    transaction: &'a str,
    index: u32,
    address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationHashMaterial<'a> {
    public_key: &'a str,
    student_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceHashMaterial<'a> {
    student_id: &'a str,
    event_id: &'a str,
    time_stamp: i64,
}

/// Hash signed to authorize spending output `index` of `transaction`
pub fn input_hash(transaction: &str, index: u32, address: &str) -> String {
    canonical_hash(&InputHashMaterial {
        transaction,
        index,
        address,
    })
}

/// Hash signed to bind `public_key` to `student_id`
pub fn registration_hash(public_key: &str, student_id: &str) -> String {
    canonical_hash(&RegistrationHashMaterial {
        public_key,
        student_id,
    })
}

/// Hash signed to record a student's presence at an event
pub fn attendance_hash(student_id: &str, event_id: &str, time_stamp: i64) -> String {
    canonical_hash(&AttendanceHashMaterial {
        student_id,
        event_id,
        time_stamp,
    })
}

// =============================================================================
// Transaction Bodies
// =============================================================================

/// Inputs and outputs of a plain value transfer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferData {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

/// Binds a public key to a student identity, once, chain-wide
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationData {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub public_key: String,
    pub student_id: String,
    /// Signature over [`registration_hash`] by `public_key`
    pub signature: String,
}

/// A signed presence event for a registered student
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceData {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub public_key: String,
    pub student_id: String,
    pub event_id: String,
    pub time_stamp: i64,
    /// Signature over [`attendance_hash`] by the key bound at registration
    pub signature: String,
}

/// Kind-specific payload of a transaction, serialized as `type` + `data`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TransactionBody {
    Regular(TransferData),
    Fee(TransferData),
    Reward(TransferData),
    Registration(RegistrationData),
    Attendance(AttendanceData),
}

/// Tag of a [`TransactionBody`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Regular,
    Fee,
    Reward,
    Registration,
    Attendance,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Regular => "regular",
            Self::Fee => "fee",
            Self::Reward => "reward",
            Self::Registration => "registration",
            Self::Attendance => "attendance",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Unique identifier (64 hex characters)
    pub id: String,
    /// Hash over id and body; unset until the ledger or miner seals it
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(flatten)]
    pub body: TransactionBody,
}

#[derive(Serialize)]
struct TransactionHashMaterial<'a> {
    id: &'a str,
    #[serde(flatten)]
    body: &'a TransactionBody,
}

impl Transaction {
    /// Wrap a body with a fresh random id; the hash stays unset
    pub fn new(body: TransactionBody) -> Self {
        Self {
            id: random_id(TRANSACTION_ID_LEN),
            hash: None,
            body,
        }
    }

    /// Fee payout collected by the miner of a block
    pub fn fee(address: &str, amount: u64) -> Self {
        Self::new(TransactionBody::Fee(Self::payout(address, amount))).sealed()
    }

    /// Mining reward payout
    pub fn reward(address: &str, amount: u64) -> Self {
        Self::new(TransactionBody::Reward(Self::payout(address, amount))).sealed()
    }

    fn payout(address: &str, amount: u64) -> TransferData {
        TransferData {
            inputs: Vec::new(),
            outputs: vec![TransactionOutput {
                amount,
                address: address.to_string(),
            }],
        }
    }

    /// Transaction type tag
    pub fn kind(&self) -> TransactionType {
        match &self.body {
            TransactionBody::Regular(_) => TransactionType::Regular,
            TransactionBody::Fee(_) => TransactionType::Fee,
            TransactionBody::Reward(_) => TransactionType::Reward,
            TransactionBody::Registration(_) => TransactionType::Registration,
            TransactionBody::Attendance(_) => TransactionType::Attendance,
        }
    }

    pub fn inputs(&self) -> &[TransactionInput] {
        match &self.body {
            TransactionBody::Regular(data)
            | TransactionBody::Fee(data)
            | TransactionBody::Reward(data) => &data.inputs,
            TransactionBody::Registration(data) => &data.inputs,
            TransactionBody::Attendance(data) => &data.inputs,
        }
    }

    pub fn outputs(&self) -> &[TransactionOutput] {
        match &self.body {
            TransactionBody::Regular(data)
            | TransactionBody::Fee(data)
            | TransactionBody::Reward(data) => &data.outputs,
            TransactionBody::Registration(data) => &data.outputs,
            TransactionBody::Attendance(data) => &data.outputs,
        }
    }

    pub fn registration(&self) -> Option<&RegistrationData> {
        match &self.body {
            TransactionBody::Registration(data) => Some(data),
            _ => None,
        }
    }

    pub fn attendance(&self) -> Option<&AttendanceData> {
        match &self.body {
            TransactionBody::Attendance(data) => Some(data),
            _ => None,
        }
    }

    /// Get total input amount
    pub fn total_input(&self) -> u128 {
        self.inputs().iter().map(|i| u128::from(i.amount)).sum()
    }

    /// Get total output amount
    pub fn total_output(&self) -> u128 {
        self.outputs().iter().map(|o| u128::from(o.amount)).sum()
    }

    /// Calculate the transaction hash over its id and body
    pub fn calculate_hash(&self) -> String {
        canonical_hash(&TransactionHashMaterial {
            id: &self.id,
            body: &self.body,
        })
    }

    /// Assign the hash if it is still unset
    pub fn seal(&mut self) {
        if self.hash.is_none() {
            self.hash = Some(self.calculate_hash());
        }
    }

    /// Consuming variant of [`Transaction::seal`]
    pub fn sealed(mut self) -> Self {
        self.seal();
        self
    }

    /// Structural validation, independent of any chain.
    ///
    /// - a present hash must match the recomputed one
    /// - every input must be signed by its address
    /// - user transactions (regular, registration, attendance) must not
    ///   create value and must leave at least [`FEE_PER_TRANSACTION`]
    /// - a registration must be signed by the key it registers
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if let Some(hash) = &self.hash {
            let expected = self.calculate_hash();
            if *hash != expected {
                return Err(TransactionError::InvalidHash {
                    id: self.id.clone(),
                    expected,
                    got: hash.clone(),
                });
            }
        }

        for input in self.inputs() {
            if !is_valid_signature(&input.address, &input.signature, &input.signing_hash()) {
                return Err(TransactionError::InvalidInputSignature {
                    id: self.id.clone(),
                    transaction: input.transaction.clone(),
                    index: input.index,
                });
            }
        }

        match &self.body {
            TransactionBody::Fee(_) | TransactionBody::Reward(_) => return Ok(()),
            TransactionBody::Registration(data) => {
                let hash = registration_hash(&data.public_key, &data.student_id);
                if !is_valid_signature(&data.public_key, &data.signature, &hash) {
                    return Err(TransactionError::InvalidRegistrationSignature(
                        self.id.clone(),
                    ));
                }
            }
            TransactionBody::Regular(_) | TransactionBody::Attendance(_) => {}
        }

        let inputs = self.total_input();
        let outputs = self.total_output();
        if inputs < outputs {
            return Err(TransactionError::InvalidBalance {
                id: self.id.clone(),
                inputs,
                outputs,
            });
        }
        let fee = inputs - outputs;
        if fee < u128::from(FEE_PER_TRANSACTION) {
            return Err(TransactionError::InsufficientFee {
                id: self.id.clone(),
                fee,
                required: u128::from(FEE_PER_TRANSACTION),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
