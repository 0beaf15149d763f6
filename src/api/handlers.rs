//! HTTP handlers for the node's control plane

use crate::core::{Block, Transaction, UnspentTxOut, UtxoSet};
use crate::crypto::is_valid_address;
use crate::network::{Node, NodeError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
}

fn node_error(e: NodeError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        NodeError::Blockchain(_)
        | NodeError::Validation(_)
        | NodeError::Wallet(_)
        | NodeError::Peer(_) => StatusCode::BAD_REQUEST,
        NodeError::MiningCancelled => StatusCode::CONFLICT,
        NodeError::Io(_) | NodeError::MiningTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::warn!("Request failed: {}", e);
    api_error(status, e)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxosResponse {
    pub unspent_tx_outs: Vec<UnspentTxOut>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: u64,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawBlockRequest {
    pub data: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddPeerRequest {
    pub peer: String,
}

// ============================================================================
// Chain
// ============================================================================

/// GET /blocks
pub async fn get_blocks(State(state): State<ApiState>) -> Json<Vec<Block>> {
    let chain = state.node.blockchain().read().await;
    Json(chain.blocks().to_vec())
}

/// GET /block/{hash}
pub async fn get_block(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<Block> {
    let chain = state.node.blockchain().read().await;
    chain
        .find_block(&hash)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Block {} not found", hash)))
}

/// GET /transaction/{id}
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Transaction> {
    let chain = state.node.blockchain().read().await;
    chain
        .find_transaction(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Transaction {} not found", id),
            )
        })
}

/// GET /address/{address}
pub async fn get_address_utxos(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<AddressUtxosResponse> {
    if !is_valid_address(&address) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid address: {}", address),
        ));
    }
    let chain = state.node.blockchain().read().await;
    Ok(Json(AddressUtxosResponse {
        unspent_tx_outs: chain.unspent().for_address(&address),
    }))
}

/// GET /unspentTransactionOutputs
pub async fn get_unspent(State(state): State<ApiState>) -> Json<UtxoSet> {
    let chain = state.node.blockchain().read().await;
    Json(chain.unspent().clone())
}

/// GET /myUnspentTransactionOutputs
pub async fn get_my_unspent(State(state): State<ApiState>) -> Json<Vec<UnspentTxOut>> {
    let chain = state.node.blockchain().read().await;
    Json(state.node.wallet().utxos(chain.unspent()))
}

/// GET /transactionPool
pub async fn get_transaction_pool(State(state): State<ApiState>) -> Json<Vec<Transaction>> {
    let chain = state.node.blockchain().read().await;
    Json(chain.pool().transactions().to_vec())
}

// ============================================================================
// Mining & Transactions
// ============================================================================

/// POST /mineRawBlock
pub async fn mine_raw_block(
    State(state): State<ApiState>,
    Json(req): Json<RawBlockRequest>,
) -> ApiResult<Block> {
    state
        .node
        .mine_raw_block(req.data)
        .await
        .map(Json)
        .map_err(node_error)
}

/// POST /mineBlock
pub async fn mine_block(State(state): State<ApiState>) -> ApiResult<Block> {
    state.node.mine_block().await.map(Json).map_err(node_error)
}

/// POST /mineTransaction
pub async fn mine_transaction(
    State(state): State<ApiState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Block> {
    state
        .node
        .mine_transaction(&req.address, req.amount)
        .await
        .map(Json)
        .map_err(node_error)
}

/// POST /sendTransaction
pub async fn send_transaction(
    State(state): State<ApiState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Transaction> {
    state
        .node
        .send_transaction(&req.address, req.amount)
        .await
        .map(Json)
        .map_err(node_error)
}

// ============================================================================
// Wallet
// ============================================================================

/// GET /balance
pub async fn get_balance(State(state): State<ApiState>) -> Json<BalanceResponse> {
    let chain = state.node.blockchain().read().await;
    Json(BalanceResponse {
        balance: state.node.wallet().balance(chain.unspent()),
    })
}

/// GET /address
pub async fn get_address(State(state): State<ApiState>) -> Json<AddressResponse> {
    Json(AddressResponse {
        address: state.node.wallet().address(),
    })
}

// ============================================================================
// Peers & Control
// ============================================================================

/// GET /peers
pub async fn get_peers(State(state): State<ApiState>) -> Json<Vec<String>> {
    let peers = state.node.peer_manager().get_peers().await;
    Json(peers.iter().map(|p| p.to_string()).collect())
}

/// POST /addPeer
pub async fn add_peer(
    State(state): State<ApiState>,
    Json(req): Json<AddPeerRequest>,
) -> ApiResult<MessageResponse> {
    state
        .node
        .connect_to(&req.peer)
        .await
        .map_err(node_error)?;
    Ok(Json(MessageResponse {
        message: format!("Connecting to {}", req.peer),
    }))
}

/// POST /stop
pub async fn stop(State(state): State<ApiState>) -> Json<MessageResponse> {
    state.node.shutdown();
    Json(MessageResponse {
        message: "Stopping server".to_string(),
    })
}
