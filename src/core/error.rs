//! Validation errors for blocks, transactions and the pool
//!
//! Every consensus check returns one of these instead of panicking. The
//! block, chain or transaction under test is discarded and the node keeps
//! serving.

use thiserror::Error;

/// Reasons a block, chain or transaction is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Malformed field or missing required field
    #[error("Structural error: {0}")]
    Structural(String),
    /// Index or previous hash does not follow the parent block
    #[error("Linkage error: {0}")]
    Linkage(String),
    /// Hash does not recompute or does not meet the declared difficulty
    #[error("Proof of work error: {0}")]
    ProofOfWork(String),
    /// Timestamp outside the accepted drift window
    #[error("Timestamp error: {0}")]
    Timestamp(String),
    /// Unknown or duplicate output reference, bad signature, bad coinbase,
    /// or unbalanced amounts
    #[error("Ledger error: {0}")]
    Ledger(String),
    /// Input already claimed by another pooled transaction
    #[error("Pool conflict: input {tx_out_id}:{tx_out_index} is already spent by a pending transaction")]
    PoolConflict { tx_out_id: String, tx_out_index: u64 },
}

impl ValidationError {
    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub(crate) fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }
}
