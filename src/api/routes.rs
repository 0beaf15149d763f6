//! HTTP routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the control-plane router with all routes
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Chain
        .route("/blocks", get(handlers::get_blocks))
        .route("/block/{hash}", get(handlers::get_block))
        .route("/transaction/{id}", get(handlers::get_transaction))
        .route("/address/{address}", get(handlers::get_address_utxos))
        .route("/unspentTransactionOutputs", get(handlers::get_unspent))
        .route("/myUnspentTransactionOutputs", get(handlers::get_my_unspent))
        .route("/transactionPool", get(handlers::get_transaction_pool))
        // Mining
        .route("/mineRawBlock", post(handlers::mine_raw_block))
        .route("/mineBlock", post(handlers::mine_block))
        .route("/mineTransaction", post(handlers::mine_transaction))
        .route("/sendTransaction", post(handlers::send_transaction))
        // Wallet
        .route("/balance", get(handlers::get_balance))
        .route("/address", get(handlers::get_address))
        // Peers & control
        .route("/peers", get(handlers::get_peers))
        .route("/addPeer", post(handlers::add_peer))
        .route("/stop", post(handlers::stop))
        .with_state(state)
        .layer(cors)
}
