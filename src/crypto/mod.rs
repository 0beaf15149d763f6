//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and the difficulty predicate
//! - ECDSA key management (secp256k1)

pub mod hash;
pub mod keys;

pub use hash::{hash_matches_difficulty, hex_to_binary, is_hash_shaped, sha256, sha256_hex};
pub use keys::{
    is_valid_address, public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair,
};
