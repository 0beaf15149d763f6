//! Block implementation for the ledger
//!
//! A block links to its parent by hash and carries the transactions it
//! commits, the first of which is always the coinbase.

use crate::core::error::ValidationError;
use crate::core::transaction::Transaction;
use crate::crypto::{hash_matches_difficulty, is_hash_shaped, sha256_hex};
use serde::{Deserialize, Serialize};

// =============================================================================
// Genesis Constants
// =============================================================================

/// Address paid by the genesis coinbase
pub const GENESIS_ADDRESS: &str = "04bfcab8722991ae774db48f934ca79cfb7dd991229153b9f732ba5334aafcd8e7266e47076996b55a14bf9913ee3145ce0cfc1372ada8ada74bd287450313534a";

/// Id of the genesis coinbase transaction
pub const GENESIS_TX_ID: &str = "e655f6a5f26dc9b4cac6e46f52336428287759cf81ef5ff10854f69d68f43fa3";

/// Hash of the genesis block
pub const GENESIS_HASH: &str = "2828826c4fc4a69f81baf026ae22eb5a1de2b74583764f272cfb2c3421aa7084";

/// Genesis timestamp (unix seconds)
pub const GENESIS_TIMESTAMP: i64 = 1_465_154_705;

/// A block in the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block height
    pub index: u64,
    /// Hash of the parent block, `None` only for genesis
    pub previous_hash: Option<String>,
    /// Creation time in unix seconds
    pub timestamp: i64,
    /// Committed transactions, coinbase first
    pub transactions: Vec<Transaction>,
    /// Required number of leading zero bits in the hash
    pub difficulty: u32,
    /// Nonce found by mining
    pub nonce: u64,
    /// Content hash over every other field
    pub hash: String,
}

impl Block {
    /// Assemble a block and fill in its hash
    pub fn new(
        index: u64,
        previous_hash: Option<String>,
        timestamp: i64,
        transactions: Vec<Transaction>,
        difficulty: u32,
        nonce: u64,
    ) -> Self {
        let hash = calculate_hash(
            index,
            previous_hash.as_deref(),
            timestamp,
            &transactions,
            difficulty,
            nonce,
        );
        Self {
            index,
            previous_hash,
            timestamp,
            transactions,
            difficulty,
            nonce,
            hash,
        }
    }

    /// The fixed genesis block every chain must start with
    pub fn genesis() -> Self {
        Self {
            index: 0,
            previous_hash: None,
            timestamp: GENESIS_TIMESTAMP,
            transactions: vec![Transaction::coinbase(GENESIS_ADDRESS, 0)],
            difficulty: 0,
            nonce: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    /// Whether this block equals the genesis constant field by field
    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Recompute the hash from the block's content
    pub fn calculate_hash(&self) -> String {
        calculate_hash(
            self.index,
            self.previous_hash.as_deref(),
            self.timestamp,
            &self.transactions,
            self.difficulty,
            self.nonce,
        )
    }

    /// Whether the stored hash matches the content
    pub fn verify_hash(&self) -> bool {
        self.calculate_hash() == self.hash
    }

    /// Whether the stored hash satisfies the declared difficulty
    pub fn is_valid_pow(&self) -> bool {
        hash_matches_difficulty(&self.hash, self.difficulty)
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Check field shapes. Any failure here stops further validation
    /// of the block.
    pub fn validate_structure(&self) -> Result<(), ValidationError> {
        if !is_hash_shaped(&self.hash) {
            return Err(ValidationError::structural(format!(
                "block {} hash is not a hash: {}",
                self.index, self.hash
            )));
        }

        match (&self.previous_hash, self.index) {
            (None, 0) => {}
            (Some(prev), i) if i > 0 && is_hash_shaped(prev) => {}
            (Some(prev), 0) => {
                return Err(ValidationError::structural(format!(
                    "genesis must not have a previous hash, got {}",
                    prev
                )))
            }
            (prev, i) => {
                return Err(ValidationError::structural(format!(
                    "block {} has invalid previous hash {:?}",
                    i, prev
                )))
            }
        }

        if self.transactions.is_empty() {
            return Err(ValidationError::structural(format!(
                "block {} has no transactions",
                self.index
            )));
        }
        for tx in &self.transactions {
            tx.validate_structure()?;
        }
        Ok(())
    }
}

/// Block hash over `index ‖ previousHash ‖ timestamp ‖ Σ tx.id ‖ difficulty ‖ nonce`.
/// A missing previous hash contributes the empty string.
pub fn calculate_hash(
    index: u64,
    previous_hash: Option<&str>,
    timestamp: i64,
    transactions: &[Transaction],
    difficulty: u32,
    nonce: u64,
) -> String {
    let tx_ids: String = transactions.iter().map(|tx| tx.id.as_str()).collect();
    let data = format!(
        "{}{}{}{}{}{}",
        index,
        previous_hash.unwrap_or(""),
        timestamp,
        tx_ids,
        difficulty,
        nonce
    );
    sha256_hex(data.as_bytes())
}
