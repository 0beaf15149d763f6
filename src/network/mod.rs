//! P2P Networking module
//!
//! Provides peer-to-peer gossip between ledger nodes.
//!
//! # Features
//! - TCP-based peer connections with length-prefixed JSON framing
//! - Latest-block and full-chain queries
//! - Transaction pool exchange

pub mod message;
pub mod node;
pub mod peer;
pub mod server;

pub use message::{Message, MessageError, MAGIC, MAX_MESSAGE_SIZE};
pub use node::{Node, NodeConfig, NodeError};
pub use peer::{PeerError, PeerHandle, PeerManager, MAX_PEERS};
pub use server::{connect_to_peer, handle_connection, MessageCodec, Server};
