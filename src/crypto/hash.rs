//! Cryptographic hashing utilities for the ledger
//!
//! Provides the canonical SHA-256 hash used for block hashes, transaction
//! hashes and every signed payload, plus the proof-of-work measure derived
//! from a block hash.

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Number of leading hex digits of a hash that make up its proof-of-work measure
pub const POW_MEASURE_HEX_DIGITS: usize = 14;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Canonical hash of structured data: SHA-256 over its JSON encoding.
///
/// Struct fields serialize in declaration order, so two values that compare
/// equal always produce the same hash.
///
/// # Panics
///
/// If `value` does not serialize to JSON, i.e. it holds a map with non-string
/// keys. Every hash material in the crate is a struct of strings, integers
/// and vectors of such structs, which always serializes.
pub(crate) fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let encoded = serde_json::to_vec(value).expect("hash material must serialize to JSON");
    sha256_hex(&encoded)
}

/// Proof-of-work measure of a hex hash: the integer value of its first
/// [`POW_MEASURE_HEX_DIGITS`] digits. A hash that is too short or not hex
/// scores `u64::MAX`, which never satisfies a target.
pub fn proof_of_work_measure(hash: &str) -> u64 {
    hash.get(..POW_MEASURE_HEX_DIGITS)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .unwrap_or(u64::MAX)
}

/// Checks if a hash satisfies a target (its measure must be strictly below it)
pub fn meets_target(hash: &str, target: u64) -> bool {
    proof_of_work_measure(hash) < target
}

/// Fresh random identifier of `len` hex characters
pub fn random_id(len: usize) -> String {
    let mut bytes = vec![0u8; len.div_ceil(2)];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = hex::encode(bytes);
    id.truncate(len);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_canonical_hash_is_stable() {
        let a = json!({"studentId": "21100052d", "eventId": "E1", "timeStamp": 10});
        let b = json!({"studentId": "21100052d", "eventId": "E1", "timeStamp": 10});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
        assert_eq!(canonical_hash(&a).len(), 64);

        let c = json!({"studentId": "21100052d", "eventId": "E2", "timeStamp": 10});
        assert_ne!(canonical_hash(&a), canonical_hash(&c));
    }

    #[test]
    fn test_canonical_hash_covers_encoding() {
        let value = json!({"publicKey": "02ab", "studentId": "21100052d"});
        let encoded = serde_json::to_vec(&value).unwrap();
        assert_eq!(canonical_hash(&value), sha256_hex(&encoded));
        assert_ne!(canonical_hash(&value), sha256_hex(b""));
    }

    #[test]
    #[should_panic(expected = "hash material must serialize to JSON")]
    fn test_canonical_hash_refuses_unserializable_material() {
        let mut material = std::collections::BTreeMap::new();
        material.insert((1u8, 2u8), "tuple keys are not JSON");
        canonical_hash(&material);
    }

    #[test]
    fn test_proof_of_work_measure() {
        let hash = format!("{}{}", "0000000000000f", "f".repeat(50));
        assert_eq!(proof_of_work_measure(&hash), 15);
        assert!(meets_target(&hash, 16));
        assert!(!meets_target(&hash, 15));

        assert_eq!(proof_of_work_measure("abc"), u64::MAX);
        assert_eq!(proof_of_work_measure("zzzzzzzzzzzzzzzz"), u64::MAX);
    }

    #[test]
    fn test_random_id() {
        let id = random_id(64);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id(64));
    }
}
