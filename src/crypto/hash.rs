//! Cryptographic hashing utilities for the ledger
//!
//! Provides the SHA-256 content hash used for block hashes and transaction
//! IDs, and the hex-to-binary expansion used by the difficulty check.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Expand a hex string into its binary representation.
///
/// Every hex digit becomes exactly four binary digits, left-padded with
/// zeros, so `"0f"` becomes `"00001111"`. Returns `None` if the input
/// contains a character that is not a hex digit.
pub fn hex_to_binary(hex: &str) -> Option<String> {
    let mut binary = String::with_capacity(hex.len() * 4);
    for c in hex.chars() {
        let nibble = c.to_digit(16)?;
        binary.push_str(&format!("{:04b}", nibble));
    }
    Some(binary)
}

/// Checks if a hex hash meets the difficulty target.
///
/// The binary form of the hash must start with `difficulty` zero bits.
pub fn hash_matches_difficulty(hash: &str, difficulty: u32) -> bool {
    let Some(binary) = hex_to_binary(hash) else {
        return false;
    };
    let required = difficulty as usize;
    binary.len() >= required && binary.bytes().take(required).all(|b| b == b'0')
}

/// Whether `value` looks like a hex-encoded SHA-256 digest
pub fn is_hash_shaped(value: &str) -> bool {
    value.len() == HASH_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
