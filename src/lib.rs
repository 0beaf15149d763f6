//! UTXO Ledger: a proof-of-work cryptocurrency node in Rust
//!
//! This crate provides:
//! - An append-only chain with difficulty retargeting
//! - Fork resolution by cumulative difficulty
//! - ECDSA signed transactions over an unspent output set (secp256k1)
//! - A pending transaction pool with double-spend conflict checks
//! - A single-key wallet with first-fit coin selection
//! - Framed TCP gossip between peers and an HTTP control plane
//!
//! # Example
//!
//! ```rust
//! use utxo_ledger::core::{current_timestamp, Blockchain};
//! use utxo_ledger::mining::Miner;
//! use utxo_ledger::wallet::Wallet;
//!
//! let mut blockchain = Blockchain::new();
//! let wallet = Wallet::generate();
//!
//! // Mine a block paying the coinbase to our wallet
//! let now = current_timestamp();
//! let template = blockchain.pool_template(&wallet.address(), now);
//! let (block, stats) = Miner::find_block(&template, || false).unwrap();
//! println!("Mined block {} in {}ms", block.index, stats.time_ms);
//!
//! blockchain.commit_block(block, now).unwrap();
//! assert_eq!(wallet.balance(blockchain.unspent()), 50);
//! ```

pub mod api;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Block, Blockchain, Transaction, TxIn, TxOut, UnspentTxOut, UtxoSet};
pub use crypto::KeyPair;
pub use mining::{Miner, TransactionPool};
pub use network::{Node, NodeConfig};
pub use wallet::Wallet;
