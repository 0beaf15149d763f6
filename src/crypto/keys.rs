//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. An address is the hex encoding of the
//! uncompressed public key, so no separate address derivation exists.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Length of a hex-encoded uncompressed public key
pub const ADDRESS_HEX_LEN: usize = 130;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Message digest must be 32 bytes, got {0}")]
    InvalidDigest(usize),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
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

    /// Create a key pair from a hex-encoded private key.
    ///
    /// Keys written without leading zeros are left-padded to 32 bytes.
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let trimmed = hex_key.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(KeyError::InvalidPrivateKey);
        }
        let padded = format!("{:0>64}", trimmed);
        let bytes = hex::decode(padded).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (uncompressed, `04` prefix)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize_uncompressed())
    }

    /// The ledger address owned by this key pair
    pub fn address(&self) -> String {
        self.public_key_hex()
    }

    /// Sign a 32-byte digest, returning the DER-encoded signature
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, digest)
    }
}

/// Whether `address` is a well-formed uncompressed public key in hex
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_HEX_LEN
        && address.chars().all(|c| c.is_ascii_hexdigit())
        && address.starts_with("04")
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

fn digest_message(digest: &[u8]) -> Result<Message, KeyError> {
    if digest.len() != 32 {
        return Err(KeyError::InvalidDigest(digest.len()));
    }
    Ok(Message::from_digest_slice(digest)?)
}

/// Sign a 32-byte digest with a secret key (DER encoding)
pub fn sign_message(secret_key: &SecretKey, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();
    let message = digest_message(digest)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_der().to_vec())
}

/// Verify a DER signature over a 32-byte digest against a hex address.
///
/// High-S signatures are normalized before verification; libsecp256k1
/// only accepts the low-S form.
pub fn verify_signature(address: &str, digest: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let public_key = public_key_from_hex(address)?;
    let message = digest_message(digest)?;
    let mut sig = Signature::from_der(signature).map_err(|_| KeyError::InvalidSignature)?;
    sig.normalize_s();

    match secp.verify_ecdsa(&message, &sig, &public_key) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert!(is_valid_address(&kp.address()));
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let digest = sha256(b"Hello, ledger!");

        let signature = kp.sign(&digest).unwrap();
        assert!(verify_signature(&kp.address(), &digest, &signature).unwrap());

        let other = KeyPair::generate();
        assert!(!verify_signature(&other.address(), &digest, &signature).unwrap());
    }

    #[test]
    fn test_sign_rejects_short_digest() {
        let kp = KeyPair::generate();
        assert!(matches!(kp.sign(b"short"), Err(KeyError::InvalidDigest(5))));
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let private_hex = kp1.private_key_hex();

        let kp2 = KeyPair::from_private_key_hex(&private_hex).unwrap();
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_unpadded_private_key() {
        let kp = KeyPair::from_private_key_hex("1").unwrap();
        assert_eq!(kp.private_key_hex(), format!("{:0>64}", "1"));
        assert!(KeyPair::from_private_key_hex("").is_err());
        assert!(KeyPair::from_private_key_hex("zz").is_err());
    }

    #[test]
    fn test_address_format() {
        assert!(!is_valid_address("04abc"));
        assert!(!is_valid_address(&format!("05{}", "a".repeat(128))));
        assert!(!is_valid_address(&format!("04{}", "g".repeat(128))));
        assert!(is_valid_address(&format!("04{}", "a".repeat(128))));
    }
}
