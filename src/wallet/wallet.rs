//! Wallet implementation for the ledger
//!
//! Provides key management and transaction creation. The private key is
//! kept in a plain hex file so the node keeps its address across restarts.

use crate::core::{Transaction, TransactionError, TxIn, TxOut, UnspentTxOut, UtxoSet};
use crate::crypto::{is_valid_address, KeyError, KeyPair};
use crate::mining::TransactionPool;
use log::info;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Invalid receiver address: {0}")]
    InvalidAddress(String),
    #[error("Amount must be positive")]
    InvalidAmount,
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// A single-key wallet
#[derive(Clone)]
pub struct Wallet {
    key_pair: KeyPair,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn generate() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self { key_pair })
    }

    /// Load the key stored at `path`, or generate one and write it there
    pub fn load_or_create(path: &Path) -> Result<Self, WalletError> {
        if path.exists() {
            let hex_key = fs::read_to_string(path)?;
            let wallet = Self::from_private_key(&hex_key)?;
            info!("Loaded wallet {} from {}", wallet.address(), path.display());
            return Ok(wallet);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let wallet = Self::generate();
        fs::write(path, wallet.private_key())?;
        info!("New wallet with private key created at {}", path.display());
        Ok(wallet)
    }

    /// Get the wallet's address
    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Get the wallet's private key (hex)
    pub fn private_key(&self) -> String {
        self.key_pair.private_key_hex()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Balance held by this wallet in `utxos`
    pub fn balance(&self, utxos: &UtxoSet) -> u64 {
        utxos.balance(&self.address())
    }

    /// Outputs owned by this wallet
    pub fn utxos(&self, utxos: &UtxoSet) -> Vec<UnspentTxOut> {
        utxos.for_address(&self.address())
    }

    /// Build and sign a payment of `amount` to `receiver`.
    ///
    /// Outputs already claimed by a pooled transaction are skipped. Inputs
    /// are taken in order until they cover `amount`; any remainder goes
    /// back to this wallet as change.
    pub fn create_transaction(
        &self,
        receiver: &str,
        amount: u64,
        utxos: &UtxoSet,
        pool: &TransactionPool,
    ) -> Result<Transaction, WalletError> {
        if !is_valid_address(receiver) {
            return Err(WalletError::InvalidAddress(receiver.to_string()));
        }
        if amount == 0 {
            return Err(WalletError::InvalidAmount);
        }

        let pending = pool.pending_inputs();
        let available: Vec<UnspentTxOut> = self
            .utxos(utxos)
            .into_iter()
            .filter(|u| !pending.contains(&(u.tx_out_id.as_str(), u.tx_out_index)))
            .collect();

        // Select UTXOs to cover the amount
        let mut selected = Vec::new();
        let mut selected_amount = 0u64;
        for utxo in &available {
            selected.push(TxIn::unsigned(&utxo.tx_out_id, utxo.tx_out_index));
            selected_amount = selected_amount.saturating_add(utxo.amount);
            if selected_amount >= amount {
                break;
            }
        }

        if selected_amount < amount {
            return Err(WalletError::InsufficientFunds {
                have: selected_amount,
                need: amount,
            });
        }

        let mut outputs = vec![TxOut::new(receiver, amount)];
        let change = selected_amount - amount;
        if change > 0 {
            outputs.push(TxOut::new(&self.address(), change));
        }

        let mut tx = Transaction::new(selected, outputs);
        tx.sign(&self.key_pair, utxos)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate_transaction;

    /// A UTXO set paying `wallet` one coinbase per amount
    fn funded(wallet: &Wallet, amounts: &[u64]) -> UtxoSet {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                let id = Transaction::coinbase(&wallet.address(), i as u64 + 1).id;
                UnspentTxOut::new(&id, 0, &wallet.address(), *amount)
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_wallet_import() {
        let wallet1 = Wallet::generate();
        let wallet2 = Wallet::from_private_key(&wallet1.private_key()).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
    }

    #[test]
    fn test_load_or_create() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("wallet").join("private_key");

        let created = Wallet::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = Wallet::load_or_create(&path).unwrap();
        assert_eq!(created.address(), loaded.address());
    }

    #[test]
    fn test_load_rejects_garbage_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("private_key");
        fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            Wallet::load_or_create(&path),
            Err(WalletError::CryptoError(_))
        ));
    }

    #[test]
    fn test_transaction_with_change() {
        let wallet = Wallet::generate();
        let receiver = Wallet::generate().address();
        let utxos = funded(&wallet, &[50, 50]);

        let tx = wallet
            .create_transaction(&receiver, 70, &utxos, &TransactionPool::new())
            .unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs[0], TxOut::new(&receiver, 70));
        assert_eq!(tx.outputs[1], TxOut::new(&wallet.address(), 30));
        assert!(validate_transaction(&tx, &utxos).is_ok());
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let wallet = Wallet::generate();
        let receiver = Wallet::generate().address();
        let utxos = funded(&wallet, &[50, 50]);

        let tx = wallet
            .create_transaction(&receiver, 50, &utxos, &TransactionPool::new())
            .unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_pooled_outputs_are_skipped() {
        let wallet = Wallet::generate();
        let receiver = Wallet::generate().address();
        let utxos = funded(&wallet, &[50, 50]);
        let mut pool = TransactionPool::new();

        let first = wallet
            .create_transaction(&receiver, 50, &utxos, &pool)
            .unwrap();
        pool.submit(first.clone(), &utxos).unwrap();

        let second = wallet
            .create_transaction(&receiver, 50, &utxos, &pool)
            .unwrap();
        assert_ne!(first.inputs[0], second.inputs[0]);
        assert!(pool.submit(second, &utxos).is_ok());

        assert!(matches!(
            wallet.create_transaction(&receiver, 1, &utxos, &pool),
            Err(WalletError::InsufficientFunds { have: 0, need: 1 })
        ));
    }

    #[test]
    fn test_rejects_bad_requests() {
        let wallet = Wallet::generate();
        let utxos = funded(&wallet, &[50]);
        let pool = TransactionPool::new();
        let receiver = Wallet::generate().address();

        assert!(matches!(
            wallet.create_transaction("nope", 10, &utxos, &pool),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(
            wallet.create_transaction(&receiver, 0, &utxos, &pool),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            wallet.create_transaction(&receiver, 51, &utxos, &pool),
            Err(WalletError::InsufficientFunds { have: 50, need: 51 })
        ));
    }
}
