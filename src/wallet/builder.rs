//! Transaction builder
//!
//! Collects the spent outputs, recipient, fee and signing key, then produces
//! a fully signed transaction in a single [`TransactionBuilder::build`] call.

use crate::core::{
    attendance_hash, input_hash, registration_hash, AttendanceData, RegistrationData,
    Transaction, TransactionBody, TransactionInput, TransactionOutput, TransferData, UTXO,
};
use crate::crypto::{KeyError, KeyPair};
use thiserror::Error;

/// Builder argument errors
#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("It's necessary to inform a list of unspent output transactions")]
    MissingUtxos,
    #[error("It's necessary to inform the destination address and value")]
    MissingRecipient,
    #[error("It's necessary to inform the signing key")]
    MissingSecret,
    #[error("The sender does not have enough to pay for the transaction: have {available}, need more than {spend}")]
    InsufficientFunds { available: u128, spend: u128 },
    #[error("Signing failed: {0}")]
    Signing(#[from] KeyError),
}

#[derive(Debug, Clone, Default)]
enum Payload {
    #[default]
    Transfer,
    Registration {
        public_key: String,
        student_id: String,
    },
    Attendance {
        public_key: String,
        student_id: String,
        event_id: String,
        time_stamp: i64,
    },
}

/// Builder for creating transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    utxos: Option<Vec<UTXO>>,
    recipient: Option<(String, u64)>,
    change_address: Option<String>,
    fee: u64,
    secret: Option<KeyPair>,
    payload: Payload,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs to spend, all of them
    pub fn from(mut self, utxos: Vec<UTXO>) -> Self {
        self.utxos = Some(utxos);
        self
    }

    pub fn to(mut self, address: &str, amount: u64) -> Self {
        self.recipient = Some((address.to_string(), amount));
        self
    }

    /// Where the remainder goes; the signer's address when unset
    pub fn change(mut self, address: &str) -> Self {
        self.change_address = Some(address.to_string());
        self
    }

    pub fn fee(mut self, amount: u64) -> Self {
        self.fee = amount;
        self
    }

    pub fn sign(mut self, key_pair: &KeyPair) -> Self {
        self.secret = Some(key_pair.clone());
        self
    }

    /// Turn the transaction into a registration of `public_key` as `student_id`
    pub fn registration(mut self, public_key: &str, student_id: &str) -> Self {
        self.payload = Payload::Registration {
            public_key: public_key.to_string(),
            student_id: student_id.to_string(),
        };
        self
    }

    /// Turn the transaction into an attendance record
    pub fn attendance(
        mut self,
        public_key: &str,
        student_id: &str,
        event_id: &str,
        time_stamp: i64,
    ) -> Self {
        self.payload = Payload::Attendance {
            public_key: public_key.to_string(),
            student_id: student_id.to_string(),
            event_id: event_id.to_string(),
            time_stamp,
        };
        self
    }

    /// Build and sign the transaction. The result has a fresh id and no hash.
    pub fn build(self) -> Result<Transaction, BuilderError> {
        let utxos = self.utxos.ok_or(BuilderError::MissingUtxos)?;
        let (recipient, amount) = self
            .recipient
            .filter(|(address, _)| !address.is_empty())
            .ok_or(BuilderError::MissingRecipient)?;
        let key_pair = self.secret.ok_or(BuilderError::MissingSecret)?;

        let available: u128 = utxos.iter().map(|utxo| u128::from(utxo.amount)).sum();
        let spend = u128::from(amount) + u128::from(self.fee);
        if available <= spend {
            return Err(BuilderError::InsufficientFunds { available, spend });
        }
        // Change must fit in a single output
        let change = u64::try_from(available - spend)
            .map_err(|_| BuilderError::InsufficientFunds { available, spend })?;

        let inputs = utxos
            .into_iter()
            .map(|utxo| {
                let signature =
                    key_pair.sign_hash(&input_hash(&utxo.transaction, utxo.index, &utxo.address))?;
                Ok(TransactionInput {
                    transaction: utxo.transaction,
                    index: utxo.index,
                    address: utxo.address,
                    amount: utxo.amount,
                    signature,
                })
            })
            .collect::<Result<Vec<_>, KeyError>>()?;

        let change_address = self.change_address.unwrap_or_else(|| key_pair.address());
        let outputs = vec![
            TransactionOutput {
                amount,
                address: recipient,
            },
            TransactionOutput {
                amount: change,
                address: change_address,
            },
        ];

        let body = match self.payload {
            Payload::Transfer => TransactionBody::Regular(TransferData { inputs, outputs }),
            Payload::Registration {
                public_key,
                student_id,
            } => {
                let signature = key_pair.sign_hash(&registration_hash(&public_key, &student_id))?;
                TransactionBody::Registration(RegistrationData {
                    inputs,
                    outputs,
                    public_key,
                    student_id,
                    signature,
                })
            }
            Payload::Attendance {
                public_key,
                student_id,
                event_id,
                time_stamp,
            } => {
                let signature =
                    key_pair.sign_hash(&attendance_hash(&student_id, &event_id, time_stamp))?;
                TransactionBody::Attendance(AttendanceData {
                    inputs,
                    outputs,
                    public_key,
                    student_id,
                    event_id,
                    time_stamp,
                    signature,
                })
            }
        };

        Ok(Transaction::new(body))
    }
}
