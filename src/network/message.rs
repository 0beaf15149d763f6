//! Network message types for P2P communication
//!
//! Defines the gossip protocol: chain queries and responses, and pool
//! queries and responses.

use crate::core::{Block, Transaction, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = *b"LDGR";

/// Largest message body a peer may send
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Errors decoding a message body
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid message payload: {0}")]
    Invalid(#[from] ValidationError),
}

/// Network message types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Ask for the peer's latest block
    QueryLatest,

    /// Ask for the peer's full chain
    QueryAll,

    /// One or more blocks, in any order
    ResponseBlockchain(Vec<Block>),

    /// Ask for the peer's pending transactions
    QueryTransactionPool,

    /// Pending transactions
    ResponseTransactionPool(Vec<Transaction>),
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes. Every block and transaction in the
    /// payload is structurally valid on success.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        let msg: Message = serde_json::from_slice(data)?;
        msg.validate_structure()?;
        Ok(msg)
    }

    fn validate_structure(&self) -> Result<(), ValidationError> {
        match self {
            Message::ResponseBlockchain(blocks) => {
                blocks.iter().try_for_each(|block| block.validate_structure())
            }
            Message::ResponseTransactionPool(transactions) => {
                transactions.iter().try_for_each(|tx| tx.validate_structure())
            }
            _ => Ok(()),
        }
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::QueryLatest => "QueryLatest",
            Message::QueryAll => "QueryAll",
            Message::ResponseBlockchain(_) => "ResponseBlockchain",
            Message::QueryTransactionPool => "QueryTransactionPool",
            Message::ResponseTransactionPool(_) => "ResponseTransactionPool",
        }
    }
}
