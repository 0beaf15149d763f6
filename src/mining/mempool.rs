//! Transaction pool for pending transactions
//!
//! Holds validated transactions waiting to be mined. Pooled transactions
//! never spend the same output twice, and the pool is reconciled against
//! the UTXO set every time that set changes.

use crate::core::error::ValidationError;
use crate::core::transaction::{Transaction, TxIn};
use crate::core::utxo::{validate_transaction, UtxoSet};
use log::{debug, info};
use std::collections::HashSet;

/// Pending transactions in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `tx` if it validates against `utxos` and does not spend an
    /// output already claimed by a pooled transaction. The pool is left
    /// untouched on rejection.
    pub fn submit(&mut self, tx: Transaction, utxos: &UtxoSet) -> Result<(), ValidationError> {
        tx.validate_structure()?;
        validate_transaction(&tx, utxos)?;

        if self.contains(&tx.id) {
            return Err(ValidationError::ledger(format!(
                "transaction {} is already pooled",
                tx.id
            )));
        }

        let pending = self.pending_inputs();
        if let Some(input) = tx
            .inputs
            .iter()
            .find(|i| pending.contains(&(i.tx_out_id.as_str(), i.tx_out_index)))
        {
            return Err(ValidationError::PoolConflict {
                tx_out_id: input.tx_out_id.clone(),
                tx_out_index: input.tx_out_index,
            });
        }

        info!("Adding transaction {} to pool", tx.id);
        self.transactions.push(tx);
        Ok(())
    }

    /// Drop every pooled transaction with an input no longer in `utxos`.
    /// Returns the ids that were evicted.
    pub fn reconcile(&mut self, utxos: &UtxoSet) -> Vec<String> {
        let (keep, evicted): (Vec<_>, Vec<_>) = self
            .transactions
            .drain(..)
            .partition(|tx| tx.inputs.iter().all(|i| utxos.contains_input(i)));
        self.transactions = keep;

        let ids: Vec<String> = evicted.into_iter().map(|tx| tx.id).collect();
        if !ids.is_empty() {
            info!("Removing transactions from pool: {:?}", ids);
        } else {
            debug!("Pool reconciled, {} transactions kept", self.len());
        }
        ids
    }

    /// Every `(tx_out_id, tx_out_index)` claimed by a pooled transaction
    pub fn pending_inputs(&self) -> HashSet<(&str, u64)> {
        self.inputs()
            .map(|i| (i.tx_out_id.as_str(), i.tx_out_index))
            .collect()
    }

    /// Every input of every pooled transaction
    pub fn inputs(&self) -> impl Iterator<Item = &TxIn> {
        self.transactions.iter().flat_map(|tx| tx.inputs.iter())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.id == id)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
