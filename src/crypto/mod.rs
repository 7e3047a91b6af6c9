//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 canonical hashing and the proof-of-work measure
//! - ECDSA key management and hash signing (secp256k1)

pub mod hash;
pub mod keys;

pub(crate) use hash::canonical_hash;
pub use hash::{meets_target, proof_of_work_measure, random_id, sha256, sha256_hex};
pub use keys::{
    is_valid_signature, public_key_from_hex, sign_hash, verify_hash_signature, KeyError, KeyPair,
};
