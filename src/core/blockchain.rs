//! Blockchain implementation
//!
//! `Blockchain` owns the chain, the UTXO set derived from it and the
//! transaction pool. Every mutating method moves all three together or
//! leaves all three untouched.

use crate::core::block::Block;
use crate::core::error::ValidationError;
use crate::core::transaction::Transaction;
use crate::core::utxo::{process_transactions, UnspentTxOut, UtxoSet};
use crate::core::validation::{
    cumulative_difficulty, current_difficulty, validate_chain, validate_new_block,
};
use crate::mining::{BlockTemplate, TransactionPool};
use log::{info, warn};
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("Invalid: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Received chain is not heavier: {candidate} <= {current}")]
    NotHeavier { candidate: u128, current: u128 },
}

/// What `handle_received_blocks` did with a batch from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Received tip is already part of our chain
    Ignored,
    /// Received tip linked onto ours and was committed
    Appended,
    /// A single block that does not link; the full chain is needed
    QueryAll,
    /// Our chain was replaced by the received one
    Replaced,
    /// Received blocks failed validation or were not heavier
    Rejected(BlockchainError),
}

/// The chain together with its ledger state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blockchain {
    blocks: Vec<Block>,
    unspent: UtxoSet,
    pool: TransactionPool,
}

impl Blockchain {
    /// Create a new blockchain holding only the genesis block
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let unspent: UtxoSet = genesis
            .transactions
            .iter()
            .flat_map(|tx| {
                tx.outputs.iter().enumerate().map(move |(i, out)| {
                    UnspentTxOut::new(&tx.id, i as u64, &out.address, out.amount)
                })
            })
            .collect::<Vec<_>>()
            .into();
        Self {
            blocks: vec![genesis],
            unspent,
            pool: TransactionPool::new(),
        }
    }

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        // `blocks` is never empty: it starts at genesis and is only ever
        // replaced by a validated chain
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn unspent(&self) -> &UtxoSet {
        &self.unspent
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Get blockchain height
    pub fn height(&self) -> u64 {
        self.latest_block().index
    }

    /// Difficulty the next block should be mined at
    pub fn difficulty(&self) -> u32 {
        current_difficulty(&self.blocks)
    }

    /// Weight of the current chain
    pub fn cumulative_difficulty(&self) -> u128 {
        cumulative_difficulty(&self.blocks)
    }

    /// Get a block by hash
    pub fn find_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash == hash)
    }

    /// Find a committed transaction by id
    pub fn find_transaction(&self, id: &str) -> Option<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.id == id)
    }

    /// Template for the next block carrying exactly `transactions`; the
    /// caller supplies the coinbase
    pub fn raw_template(&self, transactions: Vec<Transaction>, now: i64) -> BlockTemplate {
        let latest = self.latest_block();
        BlockTemplate {
            index: latest.index + 1,
            previous_hash: latest.hash.clone(),
            timestamp: now,
            transactions,
            difficulty: self.difficulty(),
        }
    }

    /// Template for the next block: a coinbase paying `miner_address`
    /// followed by `transactions`
    pub fn block_template(
        &self,
        miner_address: &str,
        transactions: Vec<Transaction>,
        now: i64,
    ) -> BlockTemplate {
        let mut all = vec![Transaction::coinbase(miner_address, self.height() + 1)];
        all.extend(transactions);
        self.raw_template(all, now)
    }

    /// Template including every pooled transaction
    pub fn pool_template(&self, miner_address: &str, now: i64) -> BlockTemplate {
        self.block_template(miner_address, self.pool.transactions().to_vec(), now)
    }

    /// Append `block` to the tip.
    ///
    /// Validates the block against the current tip and its transactions
    /// against the current UTXO set; on success pushes the block, swaps in
    /// the new set and prunes the pool.
    pub fn commit_block(&mut self, block: Block, now: i64) -> Result<(), BlockchainError> {
        validate_new_block(&block, self.latest_block(), now)?;
        let unspent = process_transactions(&block.transactions, &self.unspent, block.index)?;

        info!(
            "Committed block {} ({}) with {} transactions",
            block.index,
            block.hash,
            block.tx_count()
        );
        self.blocks.push(block);
        self.unspent = unspent;
        self.pool.reconcile(&self.unspent);
        Ok(())
    }

    /// Replace the chain with `candidate` if it is valid and strictly
    /// heavier. State is unchanged on rejection.
    pub fn replace_chain(&mut self, candidate: Vec<Block>, now: i64) -> Result<(), BlockchainError> {
        let unspent = match validate_chain(&candidate, now) {
            Ok(unspent) => unspent,
            Err(e) => {
                warn!("Received blockchain invalid: {}", e);
                return Err(e.into());
            }
        };

        let candidate_weight = cumulative_difficulty(&candidate);
        let current_weight = self.cumulative_difficulty();
        if candidate_weight <= current_weight {
            warn!(
                "Received blockchain not heavier ({} <= {}), keeping current chain",
                candidate_weight, current_weight
            );
            return Err(BlockchainError::NotHeavier {
                candidate: candidate_weight,
                current: current_weight,
            });
        }

        info!(
            "Replacing blockchain: height {} -> {}, weight {} -> {}",
            self.height(),
            candidate.len() - 1,
            current_weight,
            candidate_weight
        );
        self.blocks = candidate;
        self.unspent = unspent;
        self.pool.reconcile(&self.unspent);
        Ok(())
    }

    /// Admit a transaction to the pool against the current UTXO set
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<(), ValidationError> {
        self.pool.submit(tx, &self.unspent)
    }

    /// Decide what to do with blocks announced by a peer
    pub fn handle_received_blocks(&mut self, mut received: Vec<Block>, now: i64) -> SyncOutcome {
        received.sort_by_key(|b| b.index);
        let Some(received_tip) = received.last() else {
            return SyncOutcome::Ignored;
        };

        if self.find_block(&received_tip.hash).is_some() {
            log::debug!(
                "Received tip {} is already in our chain, ignoring",
                received_tip.index
            );
            return SyncOutcome::Ignored;
        }

        let latest = self.latest_block();
        info!(
            "Received unknown tip. We got: {}, peer got: {}",
            latest.index, received_tip.index
        );

        if received_tip.previous_hash.as_deref() == Some(latest.hash.as_str()) {
            let block = received_tip.clone();
            return match self.commit_block(block, now) {
                Ok(()) => SyncOutcome::Appended,
                Err(e) => {
                    warn!("Received block rejected: {}", e);
                    SyncOutcome::Rejected(e)
                }
            };
        }

        // Weight, not height, decides between forks
        if received.len() == 1 {
            info!("Received a single unlinked block, querying the full chain");
            return SyncOutcome::QueryAll;
        }

        match self.replace_chain(received, now) {
            Ok(()) => SyncOutcome::Replaced,
            Err(e) => SyncOutcome::Rejected(e),
        }
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}
