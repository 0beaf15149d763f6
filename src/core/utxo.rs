//! UTXO ledger and transaction validation
//!
//! The unspent-output set is derived from the chain and replaced wholesale
//! every time a block or chain is accepted. `process_transactions` is the
//! state-transition function: it either returns the next set or rejects the
//! whole batch.

use crate::core::error::ValidationError;
use crate::core::transaction::{Transaction, TxIn, COINBASE_AMOUNT};
use crate::crypto::verify_signature;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An output that has not been consumed yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnspentTxOut {
    pub tx_out_id: String,
    pub tx_out_index: u64,
    pub address: String,
    pub amount: u64,
}

impl UnspentTxOut {
    pub fn new(tx_out_id: &str, tx_out_index: u64, address: &str, amount: u64) -> Self {
        Self {
            tx_out_id: tx_out_id.to_string(),
            tx_out_index,
            address: address.to_string(),
            amount,
        }
    }
}

/// Ordered set of unspent outputs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct UtxoSet(Vec<UnspentTxOut>);

impl From<Vec<UnspentTxOut>> for UtxoSet {
    fn from(outputs: Vec<UnspentTxOut>) -> Self {
        Self(outputs)
    }
}

impl UtxoSet {
    /// Find the unspent output `(tx_out_id, tx_out_index)`
    pub fn find(&self, tx_out_id: &str, tx_out_index: u64) -> Option<&UnspentTxOut> {
        self.0
            .iter()
            .find(|u| u.tx_out_id == tx_out_id && u.tx_out_index == tx_out_index)
    }

    /// Whether `input` still references an unspent output
    pub fn contains_input(&self, input: &TxIn) -> bool {
        self.find(&input.tx_out_id, input.tx_out_index).is_some()
    }

    /// Unspent outputs locked to `address`
    pub fn for_address(&self, address: &str) -> Vec<UnspentTxOut> {
        self.0
            .iter()
            .filter(|u| u.address == address)
            .cloned()
            .collect()
    }

    /// Total unspent amount locked to `address`
    pub fn balance(&self, address: &str) -> u64 {
        self.0
            .iter()
            .filter(|u| u.address == address)
            .map(|u| u.amount)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentTxOut> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the next set: drop every output consumed by `transactions`,
    /// then append every output they create
    fn apply(&self, transactions: &[Transaction]) -> UtxoSet {
        let consumed: HashSet<(&str, u64)> = transactions
            .iter()
            .flat_map(|tx| &tx.inputs)
            .map(|i| (i.tx_out_id.as_str(), i.tx_out_index))
            .collect();

        let created = transactions.iter().flat_map(|tx| {
            tx.outputs.iter().enumerate().map(move |(index, out)| {
                UnspentTxOut::new(&tx.id, index as u64, &out.address, out.amount)
            })
        });

        let next: Vec<UnspentTxOut> = self
            .0
            .iter()
            .filter(|u| !consumed.contains(&(u.tx_out_id.as_str(), u.tx_out_index)))
            .cloned()
            .chain(created)
            .collect();
        UtxoSet(next)
    }
}

/// Validate a non-coinbase transaction against `utxos`.
///
/// The id must recompute, no output may be spent twice within the
/// transaction, every input must resolve and carry a valid signature by the
/// referenced output's address, and inputs must sum exactly to outputs.
pub fn validate_transaction(tx: &Transaction, utxos: &UtxoSet) -> Result<(), ValidationError> {
    if !tx.has_valid_id() {
        return Err(ValidationError::ledger(format!("invalid tx id: {}", tx.id)));
    }

    let mut seen = HashSet::new();
    for input in &tx.inputs {
        if !seen.insert((input.tx_out_id.as_str(), input.tx_out_index)) {
            return Err(ValidationError::ledger(format!(
                "tx {} spends {}:{} twice",
                tx.id, input.tx_out_id, input.tx_out_index
            )));
        }
    }

    let digest = hex::decode(&tx.id)
        .map_err(|_| ValidationError::structural(format!("tx id is not hex: {}", tx.id)))?;

    let mut total_in: u64 = 0;
    for input in &tx.inputs {
        let referenced = utxos
            .find(&input.tx_out_id, input.tx_out_index)
            .ok_or_else(|| {
                ValidationError::ledger(format!(
                    "referenced txOut not found: {}:{}",
                    input.tx_out_id, input.tx_out_index
                ))
            })?;

        let signature = hex::decode(&input.signature)
            .map_err(|_| ValidationError::structural("signature is not hex"))?;
        let valid = verify_signature(&referenced.address, &digest, &signature)
            .map_err(|e| ValidationError::ledger(format!("signature check failed: {}", e)))?;
        if !valid {
            return Err(ValidationError::ledger(format!(
                "invalid signature for input {}:{} in tx {}",
                input.tx_out_id, input.tx_out_index, tx.id
            )));
        }

        total_in = total_in
            .checked_add(referenced.amount)
            .ok_or_else(|| ValidationError::ledger("input amount overflow"))?;
    }

    let total_out = tx
        .outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
        .ok_or_else(|| ValidationError::ledger("output amount overflow"))?;

    if total_in != total_out {
        return Err(ValidationError::ledger(format!(
            "inputs ({}) != outputs ({}) in tx {}",
            total_in, total_out, tx.id
        )));
    }

    Ok(())
}

/// Validate the coinbase transaction of the block at `block_index`
pub fn validate_coinbase(tx: &Transaction, block_index: u64) -> Result<(), ValidationError> {
    if !tx.has_valid_id() {
        return Err(ValidationError::ledger(format!(
            "invalid coinbase tx id: {}",
            tx.id
        )));
    }
    if tx.inputs.len() != 1 {
        return Err(ValidationError::ledger(
            "one txIn must be specified in the coinbase transaction",
        ));
    }
    if tx.inputs[0].tx_out_index != block_index {
        return Err(ValidationError::ledger(format!(
            "coinbase txIn index {} must equal block height {}",
            tx.inputs[0].tx_out_index, block_index
        )));
    }
    if tx.outputs.len() != 1 {
        return Err(ValidationError::ledger(
            "invalid number of txOuts in coinbase transaction",
        ));
    }
    if tx.outputs[0].amount != COINBASE_AMOUNT {
        return Err(ValidationError::ledger(format!(
            "invalid coinbase amount {}",
            tx.outputs[0].amount
        )));
    }
    Ok(())
}

/// Validate a block's transaction list and compute the next UTXO set.
///
/// The first transaction must be the coinbase for `block_index`. Any
/// failure rejects the whole batch and leaves `utxos` untouched.
pub fn process_transactions(
    transactions: &[Transaction],
    utxos: &UtxoSet,
    block_index: u64,
) -> Result<UtxoSet, ValidationError> {
    for tx in transactions {
        tx.validate_structure()?;
    }

    let coinbase = transactions
        .first()
        .ok_or_else(|| ValidationError::structural("block has no transactions"))?;
    validate_coinbase(coinbase, block_index)?;

    let mut seen = HashSet::new();
    for input in transactions.iter().flat_map(|tx| &tx.inputs) {
        if !seen.insert((input.tx_out_id.as_str(), input.tx_out_index)) {
            return Err(ValidationError::ledger(format!(
                "duplicate txIn: {}:{}",
                input.tx_out_id, input.tx_out_index
            )));
        }
    }

    for tx in &transactions[1..] {
        validate_transaction(tx, utxos)?;
    }

    Ok(utxos.apply(transactions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::TxOut;
    use crate::crypto::KeyPair;

    /// Funds `owner` with a coinbase at height 1 and returns the set
    fn funded(owner: &KeyPair) -> (Transaction, UtxoSet) {
        let coinbase = Transaction::coinbase(&owner.address(), 1);
        let utxos = process_transactions(&[coinbase.clone()], &UtxoSet::default(), 1).unwrap();
        (coinbase, utxos)
    }

    fn spend(
        owner: &KeyPair,
        utxos: &UtxoSet,
        inputs: &[(&str, u64)],
        outputs: Vec<TxOut>,
    ) -> Transaction {
        let inputs = inputs.iter().map(|(id, i)| TxIn::unsigned(id, *i)).collect();
        let mut tx = Transaction::new(inputs, outputs);
        tx.sign(owner, utxos).unwrap();
        tx
    }

    #[test]
    fn test_coinbase_creates_output() {
        let owner = KeyPair::generate();
        let (coinbase, utxos) = funded(&owner);
        assert_eq!(utxos.len(), 1);
        assert_eq!(
            utxos.find(&coinbase.id, 0).unwrap().amount,
            COINBASE_AMOUNT
        );
        assert_eq!(utxos.balance(&owner.address()), 50);
    }

    #[test]
    fn test_coinbase_shape_rules() {
        let kp = KeyPair::generate();

        let wrong_height = Transaction::coinbase(&kp.address(), 2);
        assert!(validate_coinbase(&wrong_height, 1).is_err());

        let wrong_amount = Transaction::new(
            vec![TxIn::unsigned("", 1)],
            vec![TxOut::new(&kp.address(), 51)],
        );
        assert!(validate_coinbase(&wrong_amount, 1).is_err());

        let two_outputs = Transaction::new(
            vec![TxIn::unsigned("", 1)],
            vec![TxOut::new(&kp.address(), 25), TxOut::new(&kp.address(), 25)],
        );
        assert!(validate_coinbase(&two_outputs, 1).is_err());

        let mut bad_id = Transaction::coinbase(&kp.address(), 1);
        bad_id.id = "0".repeat(64);
        assert!(validate_coinbase(&bad_id, 1).is_err());
    }

    #[test]
    fn test_valid_spend_moves_funds() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice);

        let tx = spend(
            &alice,
            &utxos,
            &[(&coinbase.id, 0)],
            vec![TxOut::new(&bob.address(), 30), TxOut::new(&alice.address(), 20)],
        );
        assert!(validate_transaction(&tx, &utxos).is_ok());

        let block_txs = vec![Transaction::coinbase(&alice.address(), 2), tx.clone()];
        let next = process_transactions(&block_txs, &utxos, 2).unwrap();

        assert!(next.find(&coinbase.id, 0).is_none());
        assert_eq!(next.balance(&bob.address()), 30);
        assert_eq!(next.balance(&alice.address()), 70);
        assert_eq!(next.find(&tx.id, 1).unwrap().amount, 20);
    }

    #[test]
    fn test_unbalanced_transaction_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let coinbase = Transaction::coinbase(&alice.address(), 1);
        let utxos = UtxoSet::from(vec![UnspentTxOut::new(&coinbase.id, 0, &alice.address(), 30)]);
        let before = utxos.clone();

        let tx = spend(
            &alice,
            &utxos,
            &[(&coinbase.id, 0)],
            vec![TxOut::new(&bob.address(), 40)],
        );
        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(ValidationError::Ledger(_))
        ));

        let block_txs = vec![Transaction::coinbase(&alice.address(), 2), tx];
        assert!(matches!(
            process_transactions(&block_txs, &utxos, 2),
            Err(ValidationError::Ledger(_))
        ));
        assert_eq!(utxos, before);
    }

    #[test]
    fn test_forged_signature_rejected() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice);

        let mut tx = Transaction::new(
            vec![TxIn::unsigned(&coinbase.id, 0)],
            vec![TxOut::new(&mallory.address(), 50)],
        );
        let digest = hex::decode(&tx.id).unwrap();
        tx.inputs[0].signature = hex::encode(mallory.sign(&digest).unwrap());

        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(ValidationError::Ledger(_))
        ));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let alice = KeyPair::generate();
        let (_, utxos) = funded(&alice);
        let tx = Transaction::new(
            vec![TxIn::unsigned(&"ab".repeat(32), 0)],
            vec![TxOut::new(&alice.address(), 50)],
        );
        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(ValidationError::Ledger(_))
        ));
    }

    #[test]
    fn test_self_duplicate_input_rejected() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice);
        let tx = spend(
            &alice,
            &utxos,
            &[(&coinbase.id, 0), (&coinbase.id, 0)],
            vec![TxOut::new(&alice.address(), 100)],
        );
        assert!(validate_transaction(&tx, &utxos).is_err());
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice);

        let to_bob = spend(
            &alice,
            &utxos,
            &[(&coinbase.id, 0)],
            vec![TxOut::new(&bob.address(), 50)],
        );
        let to_self = spend(
            &alice,
            &utxos,
            &[(&coinbase.id, 0)],
            vec![TxOut::new(&alice.address(), 50)],
        );
        assert!(validate_transaction(&to_bob, &utxos).is_ok());
        assert!(validate_transaction(&to_self, &utxos).is_ok());

        let block_txs = vec![Transaction::coinbase(&alice.address(), 2), to_bob, to_self];
        let err = process_transactions(&block_txs, &utxos, 2).unwrap_err();
        assert!(err.to_string().contains("duplicate txIn"));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            process_transactions(&[], &UtxoSet::default(), 1),
            Err(ValidationError::Structural(_))
        ));
    }
}
