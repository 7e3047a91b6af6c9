//! ECDSA key management for the ledger
//!
//! Key pairs live on the secp256k1 curve. An address is the hex-encoded
//! compressed public key, so anything signed by an address owner can be
//! verified from the address alone.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Invalid message hash: {0}")]
    InvalidHash(String),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Ledger address of this key pair
    pub fn address(&self) -> String {
        self.public_key_hex()
    }

    /// Sign a hex-encoded SHA-256 hash
    pub fn sign_hash(&self, hash_hex: &str) -> Result<String, KeyError> {
        sign_hash(&self.secret_key, hash_hex)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

fn message_from_hash(hash_hex: &str) -> Result<Message, KeyError> {
    let digest = hex::decode(hash_hex).map_err(|_| KeyError::InvalidHash(hash_hex.to_string()))?;
    Message::from_digest_slice(&digest).map_err(|_| KeyError::InvalidHash(hash_hex.to_string()))
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes =
        hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey(hex_key.to_string()))?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey(hex_key.to_string()))
}

/// Sign a hex-encoded hash, returning a hex compact signature
pub fn sign_hash(secret_key: &SecretKey, hash_hex: &str) -> Result<String, KeyError> {
    let secp = Secp256k1::new();
    let message = message_from_hash(hash_hex)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(hex::encode(signature.serialize_compact()))
}

/// Verify a hex compact signature over a hex-encoded hash against a
/// hex-encoded public key.
///
/// Returns `Ok(false)` for a well-formed signature that does not match.
pub fn verify_hash_signature(
    public_key_hex: &str,
    signature_hex: &str,
    hash_hex: &str,
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let public_key = public_key_from_hex(public_key_hex)?;
    let message = message_from_hash(hash_hex)?;
    let bytes = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
    let signature = Signature::from_compact(&bytes).map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
}

/// Like [`verify_hash_signature`], treating any malformed input as a failed check
pub fn is_valid_signature(public_key_hex: &str, signature_hex: &str, hash_hex: &str) -> bool {
    verify_hash_signature(public_key_hex, signature_hex, hash_hex).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256_hex;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert_eq!(kp.public_key_hex().len(), 66);
        assert_eq!(kp.address(), kp.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let hash = sha256_hex(b"Hello, ledger!");

        let signature = kp.sign_hash(&hash).unwrap();
        assert!(verify_hash_signature(&kp.address(), &signature, &hash).unwrap());

        let other = KeyPair::generate();
        assert!(!verify_hash_signature(&other.address(), &signature, &hash).unwrap());
    }

    #[test]
    fn test_malformed_inputs_fail_verification() {
        let kp = KeyPair::generate();
        let hash = sha256_hex(b"payload");
        let signature = kp.sign_hash(&hash).unwrap();

        assert!(verify_hash_signature("not-hex", &signature, &hash).is_err());
        assert!(verify_hash_signature(&kp.address(), "00", &hash).is_err());
        assert!(!is_valid_signature(&kp.address(), &signature, "abcd"));
        assert!(kp.sign_hash("xyz").is_err());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.address(), kp2.address());

        assert!(KeyPair::from_private_key_hex("zz").is_err());
    }

    #[test]
    fn test_key_errors_name_the_bad_input() {
        // Zero is outside the secp256k1 scalar range
        assert!(matches!(
            KeyPair::from_private_key_hex(&"00".repeat(32)),
            Err(KeyError::InvalidPrivateKey)
        ));
        let bad_prefix = format!("05{}", "00".repeat(32));
        assert!(matches!(
            public_key_from_hex(&bad_prefix),
            Err(KeyError::InvalidPublicKey(key)) if key == bad_prefix
        ));
        assert!(matches!(
            KeyPair::generate().sign_hash("abcd"),
            Err(KeyError::InvalidHash(hash)) if hash == "abcd"
        ));
    }
}
