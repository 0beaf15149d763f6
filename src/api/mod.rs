//! HTTP control plane
//!
//! # Endpoints
//!
//! ## Chain
//! - `GET /blocks` - Full chain
//! - `GET /block/{hash}` - Block by hash
//! - `GET /transaction/{id}` - Committed transaction by id
//! - `GET /address/{address}` - Unspent outputs of an address
//! - `GET /unspentTransactionOutputs` - Whole UTXO set
//! - `GET /myUnspentTransactionOutputs` - The node wallet's outputs
//! - `GET /transactionPool` - Pending transactions
//!
//! ## Mining
//! - `POST /mineRawBlock` - Mine caller-supplied block data, coinbase included
//! - `POST /mineBlock` - Mine the pool
//! - `POST /mineTransaction` - Mine one wallet payment
//! - `POST /sendTransaction` - Pool and announce a wallet payment
//!
//! ## Wallet
//! - `GET /balance`, `GET /address`
//!
//! ## Peers
//! - `GET /peers`, `POST /addPeer`, `POST /stop`

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
