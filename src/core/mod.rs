//! Core ledger components
//!
//! This module contains the consensus-critical building blocks:
//! - Transactions (UTXO model, secp256k1 signatures)
//! - The UTXO set and transaction validation
//! - Blocks and the genesis constant
//! - Chain validation and difficulty retargeting
//! - Blockchain (chain, UTXO set and pool as one unit)

pub mod block;
pub mod blockchain;
pub mod error;
pub mod transaction;
pub mod utxo;
pub mod validation;

pub use block::{Block, GENESIS_ADDRESS, GENESIS_HASH, GENESIS_TIMESTAMP, GENESIS_TX_ID};
pub use blockchain::{Blockchain, BlockchainError, SyncOutcome};
pub use error::ValidationError;
pub use transaction::{Transaction, TransactionError, TxIn, TxOut, COINBASE_AMOUNT};
pub use utxo::{process_transactions, validate_transaction, UnspentTxOut, UtxoSet};
pub use validation::{
    cumulative_difficulty, current_difficulty, current_timestamp, validate_chain,
    validate_new_block, BLOCK_GENERATION_INTERVAL, DIFFICULTY_ADJUSTMENT_INTERVAL,
};
