//! Proof-of-work search
//!
//! Mining runs on a snapshot taken from the chain. The caller decides
//! what to do with the result; committing it re-validates against the
//! then-current tip.

use crate::core::block::{calculate_hash, Block};
use crate::core::transaction::Transaction;
use crate::crypto::hash_matches_difficulty;
use log::info;
use serde::Serialize;
use std::time::Instant;

/// Nonces tried between two checks of the cancel predicate
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Everything needed to search for a block, taken from a consistent
/// snapshot of the chain
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub difficulty: u32,
}

/// Mining statistics
#[derive(Debug, Clone, Serialize)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Single-threaded nonce search
pub struct Miner;

impl Miner {
    /// Search nonces from 0 upward until the block hash meets the
    /// template's difficulty.
    ///
    /// `cancelled` is polled every `CANCEL_CHECK_INTERVAL` nonces; once it
    /// returns true the search stops and `None` is returned. For a fixed
    /// template the result is deterministic.
    pub fn find_block<F>(template: &BlockTemplate, cancelled: F) -> Option<(Block, MiningStats)>
    where
        F: Fn() -> bool,
    {
        let start = Instant::now();
        info!(
            "Mining block {} with difficulty {}...",
            template.index, template.difficulty
        );

        let mut nonce: u64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                info!(
                    "Mining of block {} cancelled after {} attempts",
                    template.index, nonce
                );
                return None;
            }

            let hash = calculate_hash(
                template.index,
                Some(&template.previous_hash),
                template.timestamp,
                &template.transactions,
                template.difficulty,
                nonce,
            );

            if hash_matches_difficulty(&hash, template.difficulty) {
                let attempts = nonce + 1;
                let elapsed = start.elapsed().as_millis();
                let hash_rate = if elapsed > 0 {
                    (attempts as f64) / (elapsed as f64 / 1000.0)
                } else {
                    attempts as f64
                };

                info!(
                    "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
                    template.index, elapsed, attempts, hash_rate
                );

                let block = Block {
                    index: template.index,
                    previous_hash: Some(template.previous_hash.clone()),
                    timestamp: template.timestamp,
                    transactions: template.transactions.clone(),
                    difficulty: template.difficulty,
                    nonce,
                    hash,
                };
                let stats = MiningStats {
                    hash_attempts: attempts,
                    time_ms: elapsed,
                    hash_rate,
                };
                return Some((block, stats));
            }

            nonce = nonce.checked_add(1)?;
        }
    }
}
