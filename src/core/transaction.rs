//! Transaction handling for the ledger
//!
//! Implements the UTXO transaction model: inputs reference earlier outputs
//! and carry a signature over the transaction id, outputs lock an amount to
//! an address (a secp256k1 public key).

use crate::core::error::ValidationError;
use crate::core::utxo::UtxoSet;
use crate::crypto::{is_hash_shaped, is_valid_address, sha256_hex, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reward paid by every coinbase transaction
pub const COINBASE_AMOUNT: u64 = 50;

/// Errors raised while building or signing a transaction
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("Referenced output {0}:{1} not found")]
    ReferencedOutputNotFound(String, u64),
    #[error("Signing key does not own the referenced output")]
    KeyMismatch,
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    /// Id of the transaction that created the output
    pub tx_out_id: String,
    /// Index of the output in that transaction (block height for coinbase)
    pub tx_out_index: u64,
    /// Hex DER signature over the spending transaction's id
    pub signature: String,
}

impl TxIn {
    /// Create an unsigned input
    pub fn unsigned(tx_out_id: &str, tx_out_index: u64) -> Self {
        Self {
            tx_out_id: tx_out_id.to_string(),
            tx_out_index,
            signature: String::new(),
        }
    }

    fn validate_structure(&self) -> Result<(), ValidationError> {
        if !self.tx_out_id.is_empty() && !is_hash_shaped(&self.tx_out_id) {
            return Err(ValidationError::structural(format!(
                "txOutId is not a hash: {}",
                self.tx_out_id
            )));
        }
        if hex::decode(&self.signature).is_err() {
            return Err(ValidationError::structural("signature is not hex"));
        }
        Ok(())
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOut {
    /// Recipient's address (uncompressed public key hex)
    pub address: String,
    /// Amount of coins
    pub amount: u64,
}

impl TxOut {
    pub fn new(address: &str, amount: u64) -> Self {
        Self {
            address: address.to_string(),
            amount,
        }
    }

    fn validate_structure(&self) -> Result<(), ValidationError> {
        if !is_valid_address(&self.address) {
            return Err(ValidationError::structural(format!(
                "invalid output address: {}",
                self.address
            )));
        }
        if self.amount == 0 {
            return Err(ValidationError::structural("output amount must be positive"));
        }
        Ok(())
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Hash over inputs and outputs
    pub id: String,
    #[serde(rename = "txIns")]
    pub inputs: Vec<TxIn>,
    #[serde(rename = "txOuts")]
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Create a new transaction (unsigned) with its id filled in
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        let mut tx = Self {
            id: String::new(),
            inputs,
            outputs,
        };
        tx.id = tx.calculate_id();
        tx
    }

    /// Create the reward transaction for the block at `block_index`.
    ///
    /// The single input carries no output reference; its index binds the
    /// reward to the block height so identical addresses still get
    /// distinct ids per block.
    pub fn coinbase(address: &str, block_index: u64) -> Self {
        Self::new(
            vec![TxIn::unsigned("", block_index)],
            vec![TxOut::new(address, COINBASE_AMOUNT)],
        )
    }

    /// Recompute the transaction id: every `txOutId ‖ txOutIndex`, then
    /// every `address ‖ amount`
    pub fn calculate_id(&self) -> String {
        let inputs: String = self
            .inputs
            .iter()
            .map(|i| format!("{}{}", i.tx_out_id, i.tx_out_index))
            .collect();
        let outputs: String = self
            .outputs
            .iter()
            .map(|o| format!("{}{}", o.address, o.amount))
            .collect();
        sha256_hex(format!("{}{}", inputs, outputs).as_bytes())
    }

    /// Whether the stored id matches the content
    pub fn has_valid_id(&self) -> bool {
        self.calculate_id() == self.id
    }

    /// Get total output amount
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Sign input `index`, returning the hex signature.
    ///
    /// Fails if the referenced output is not in `utxos` or is not owned by
    /// `key_pair`.
    pub fn sign_input(
        &self,
        index: usize,
        key_pair: &KeyPair,
        utxos: &UtxoSet,
    ) -> Result<String, TransactionError> {
        let input = self
            .inputs
            .get(index)
            .ok_or(TransactionError::InputOutOfRange(index))?;
        let referenced = utxos
            .find(&input.tx_out_id, input.tx_out_index)
            .ok_or_else(|| {
                TransactionError::ReferencedOutputNotFound(
                    input.tx_out_id.clone(),
                    input.tx_out_index,
                )
            })?;
        if referenced.address != key_pair.address() {
            return Err(TransactionError::KeyMismatch);
        }

        let digest = hex::decode(&self.id).map_err(|_| KeyError::InvalidSignature)?;
        let signature = key_pair.sign(&digest)?;
        Ok(hex::encode(signature))
    }

    /// Sign every input with `key_pair`
    pub fn sign(&mut self, key_pair: &KeyPair, utxos: &UtxoSet) -> Result<(), TransactionError> {
        let signatures = (0..self.inputs.len())
            .map(|i| self.sign_input(i, key_pair, utxos))
            .collect::<Result<Vec<_>, _>>()?;
        for (input, signature) in self.inputs.iter_mut().zip(signatures) {
            input.signature = signature;
        }
        Ok(())
    }

    /// Check field shapes before any ledger rule is applied
    pub fn validate_structure(&self) -> Result<(), ValidationError> {
        if !is_hash_shaped(&self.id) {
            return Err(ValidationError::structural(format!(
                "transaction id is not a hash: {}",
                self.id
            )));
        }
        if self.inputs.is_empty() {
            return Err(ValidationError::structural(format!(
                "transaction {} has no inputs",
                self.id
            )));
        }
        if self.outputs.is_empty() {
            return Err(ValidationError::structural(format!(
                "transaction {} has no outputs",
                self.id
            )));
        }
        for input in &self.inputs {
            input.validate_structure()?;
        }
        for output in &self.outputs {
            output.validate_structure()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{GENESIS_ADDRESS, GENESIS_TX_ID};
    use crate::core::utxo::UnspentTxOut;

    #[test]
    fn test_genesis_coinbase_id() {
        let tx = Transaction::coinbase(GENESIS_ADDRESS, 0);
        assert_eq!(tx.id, GENESIS_TX_ID);
        assert!(tx.has_valid_id());
        assert!(tx.validate_structure().is_ok());
    }

    #[test]
    fn test_coinbase_bound_to_height() {
        let a = Transaction::coinbase(GENESIS_ADDRESS, 1);
        let b = Transaction::coinbase(GENESIS_ADDRESS, 2);
        assert_ne!(a.id, b.id);
        assert_eq!(a.inputs[0].tx_out_index, 1);
        assert_eq!(a.total_output(), COINBASE_AMOUNT);
    }

    #[test]
    fn test_tampered_id_detected() {
        let mut tx = Transaction::coinbase(GENESIS_ADDRESS, 3);
        tx.outputs[0].amount = 51;
        assert!(!tx.has_valid_id());
    }

    #[test]
    fn test_structure_rejects_bad_fields() {
        let kp = KeyPair::generate();

        let mut tx = Transaction::coinbase(&kp.address(), 1);
        tx.outputs[0].address = "04abc".to_string();
        assert!(matches!(
            tx.validate_structure(),
            Err(ValidationError::Structural(_))
        ));

        let tx = Transaction::new(vec![TxIn::unsigned("", 1)], vec![TxOut::new(&kp.address(), 0)]);
        assert!(tx.validate_structure().is_err());

        let tx = Transaction::new(vec![], vec![TxOut::new(&kp.address(), 5)]);
        assert!(tx.validate_structure().is_err());

        let mut tx = Transaction::coinbase(&kp.address(), 1);
        tx.inputs[0].signature = "xyz".to_string();
        assert!(tx.validate_structure().is_err());
    }

    #[test]
    fn test_sign_input_requires_owner() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let funding = Transaction::coinbase(&owner.address(), 1);
        let utxos = UtxoSet::from(vec![UnspentTxOut::new(&funding.id, 0, &owner.address(), 50)]);

        let tx = Transaction::new(
            vec![TxIn::unsigned(&funding.id, 0)],
            vec![TxOut::new(&thief.address(), 50)],
        );

        assert!(tx.sign_input(0, &owner, &utxos).is_ok());
        assert!(matches!(
            tx.sign_input(0, &thief, &utxos),
            Err(TransactionError::KeyMismatch)
        ));
        assert!(matches!(
            tx.sign_input(1, &owner, &utxos),
            Err(TransactionError::InputOutOfRange(1))
        ));
        assert!(matches!(
            tx.sign_input(0, &owner, &UtxoSet::default()),
            Err(TransactionError::ReferencedOutputNotFound(_, 0))
        ));
    }

    #[test]
    fn test_json_field_names() {
        let tx = Transaction::coinbase(GENESIS_ADDRESS, 0);
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("txIns").is_some());
        assert!(json.get("txOuts").is_some());
        assert!(json["txIns"][0].get("txOutId").is_some());
        assert!(json["txIns"][0].get("txOutIndex").is_some());
    }
}
