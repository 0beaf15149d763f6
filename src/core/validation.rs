//! Consensus rules over blocks and chains
//!
//! Difficulty retargeting, the timestamp window, single-block validation
//! against a parent, and full-chain validation from genesis.

use crate::core::block::Block;
use crate::core::error::ValidationError;
use crate::core::utxo::{process_transactions, UtxoSet};
use chrono::Utc;

/// Target seconds between blocks
pub const BLOCK_GENERATION_INTERVAL: i64 = 10;

/// Blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Allowed clock drift in seconds
pub const MAX_TIMESTAMP_DRIFT: i64 = 60;

/// Current unix time in seconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Difficulty the next block on `chain` must carry.
///
/// Only changes when the tip's index is a positive multiple of
/// `DIFFICULTY_ADJUSTMENT_INTERVAL`; otherwise the tip's difficulty is kept.
pub fn current_difficulty(chain: &[Block]) -> u32 {
    let latest = match chain.last() {
        Some(block) => block,
        None => return 0,
    };
    if latest.index == 0 || latest.index % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
        return latest.difficulty;
    }
    adjusted_difficulty(chain, latest)
}

fn adjusted_difficulty(chain: &[Block], latest: &Block) -> u32 {
    let interval = DIFFICULTY_ADJUSTMENT_INTERVAL as usize;
    let prev_adjustment = match chain.len().checked_sub(interval) {
        Some(i) => &chain[i],
        None => return latest.difficulty,
    };

    let time_expected = BLOCK_GENERATION_INTERVAL * DIFFICULTY_ADJUSTMENT_INTERVAL as i64;
    let time_taken = latest.timestamp - prev_adjustment.timestamp;

    let next = if time_taken < time_expected / 2 {
        prev_adjustment.difficulty.saturating_add(1)
    } else if time_taken > time_expected * 2 {
        prev_adjustment.difficulty.saturating_sub(1)
    } else {
        prev_adjustment.difficulty
    };

    if next != latest.difficulty {
        log::info!(
            "Difficulty adjusted from {} to {} (time taken: {}s, expected: {}s)",
            latest.difficulty,
            next,
            time_taken,
            time_expected
        );
    }
    next
}

/// Chain weight: Σ 2^difficulty over every block
pub fn cumulative_difficulty(chain: &[Block]) -> u128 {
    chain.iter().fold(0u128, |acc, block| {
        let weight = 1u128.checked_shl(block.difficulty).unwrap_or(u128::MAX);
        acc.saturating_add(weight)
    })
}

/// Timestamp must be newer than `parent − 60s` and at most 60s ahead of `now`
pub fn validate_timestamp(block: &Block, previous: &Block, now: i64) -> Result<(), ValidationError> {
    if previous.timestamp - MAX_TIMESTAMP_DRIFT >= block.timestamp {
        return Err(ValidationError::Timestamp(format!(
            "block {} timestamp {} is too far behind parent {}",
            block.index, block.timestamp, previous.timestamp
        )));
    }
    if block.timestamp - MAX_TIMESTAMP_DRIFT >= now {
        return Err(ValidationError::Timestamp(format!(
            "block {} timestamp {} is too far ahead of local time {}",
            block.index, block.timestamp, now
        )));
    }
    Ok(())
}

/// Validate `block` as the direct successor of `previous`.
///
/// Checks structure, linkage, timestamp, hash and proof of work, but not
/// the transactions against any ledger state.
pub fn validate_new_block(block: &Block, previous: &Block, now: i64) -> Result<(), ValidationError> {
    block.validate_structure()?;

    if block.index != previous.index + 1 {
        return Err(ValidationError::Linkage(format!(
            "invalid index: expected {}, got {}",
            previous.index + 1,
            block.index
        )));
    }
    if block.previous_hash.as_deref() != Some(previous.hash.as_str()) {
        return Err(ValidationError::Linkage(format!(
            "block {} does not link to parent {}",
            block.index, previous.hash
        )));
    }

    validate_timestamp(block, previous, now)?;

    if !block.verify_hash() {
        return Err(ValidationError::ProofOfWork(format!(
            "block {} hash does not match its content",
            block.index
        )));
    }
    if !block.is_valid_pow() {
        return Err(ValidationError::ProofOfWork(format!(
            "block {} hash {} does not meet difficulty {}",
            block.index, block.hash, block.difficulty
        )));
    }
    Ok(())
}

/// Validate a full candidate chain from genesis and return the UTXO set it
/// produces
pub fn validate_chain(chain: &[Block], now: i64) -> Result<UtxoSet, ValidationError> {
    let genesis = chain
        .first()
        .ok_or_else(|| ValidationError::structural("chain is empty"))?;
    if !genesis.is_genesis() {
        return Err(ValidationError::Linkage(
            "chain does not start with the genesis block".to_string(),
        ));
    }

    let mut utxos = process_transactions(&genesis.transactions, &UtxoSet::default(), 0)?;

    for pair in chain.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);
        validate_new_block(block, previous, now)?;
        utxos = process_transactions(&block.transactions, &utxos, block.index)?;
    }

    Ok(utxos)
}
