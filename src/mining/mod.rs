//! Mining module for block creation and transaction pooling

pub mod mempool;
pub mod miner;

pub use mempool::TransactionPool;
pub use miner::{BlockTemplate, Miner, MiningStats, CANCEL_CHECK_INTERVAL};
