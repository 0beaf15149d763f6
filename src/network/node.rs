//! P2P Node implementation
//!
//! The node is the single owner of the shared `Blockchain`. Every mutation
//! is one call into `Blockchain` under the write lock; mining searches
//! outside the lock and only takes it again to commit. Announcements to
//! peers are spawned and never awaited.

use crate::core::{
    current_timestamp, Block, Blockchain, BlockchainError, SyncOutcome, Transaction,
    ValidationError,
};
use crate::mining::{BlockTemplate, Miner};
use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerManager};
use crate::network::server::{connect_to_peer, handle_connection, Server};
use crate::wallet::{Wallet, WalletError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};

/// Capacity of the channel carrying peer messages to the node
const MESSAGE_CHANNEL_SIZE: usize = 1000;

/// Pause after a failed round of continuous mining
const MINER_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Mining cancelled: the tip changed or the node is stopping")]
    MiningCancelled,
    #[error("Mining task failed: {0}")]
    MiningTask(String),
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Port for the HTTP control plane
    pub http_port: u16,
    /// Port for peer connections
    pub p2p_port: u16,
    /// Peers to connect to at startup
    pub peers: Vec<String>,
    /// File holding the wallet's private key
    pub private_key_path: PathBuf,
    /// Mine continuously in the background
    pub mine: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_port: 3001,
            p2p_port: 6001,
            peers: Vec::new(),
            private_key_path: PathBuf::from("node/wallet/private_key"),
            mine: false,
        }
    }
}

/// The ledger node
pub struct Node {
    config: NodeConfig,
    blockchain: Arc<RwLock<Blockchain>>,
    wallet: Wallet,
    peer_manager: Arc<PeerManager>,
    /// Current tip hash, watched by running miners
    tip_tx: watch::Sender<String>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Notify,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
    message_rx: Mutex<Option<mpsc::Receiver<(SocketAddr, Message)>>>,
}

impl Node {
    /// Create a node, loading or creating the wallet at the configured path
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let wallet = Wallet::load_or_create(&config.private_key_path)?;
        Ok(Self::with_wallet(config, wallet))
    }

    /// Create a node around an existing wallet
    pub fn with_wallet(config: NodeConfig, wallet: Wallet) -> Self {
        let blockchain = Blockchain::new();
        let (tip_tx, _) = watch::channel(blockchain.latest_block().hash.clone());
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_SIZE);

        Self {
            config,
            blockchain: Arc::new(RwLock::new(blockchain)),
            wallet,
            peer_manager: Arc::new(PeerManager::new()),
            tip_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Notify::new(),
            message_tx,
            message_rx: Mutex::new(Some(message_rx)),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn blockchain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.blockchain
    }

    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peer_manager
    }

    /// Bind the p2p port, start accepting peers and processing their
    /// messages, and connect to the configured peers. Returns the bound
    /// address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        let server = Server::bind(self.config.p2p_port).await?;
        let local_addr = server.local_addr()?;

        let message_rx = self.message_rx.lock().await.take();
        if let Some(mut message_rx) = message_rx {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                while let Some((from, msg)) = message_rx.recv().await {
                    node.handle_message(from, msg).await;
                }
            });
        }

        let peer_manager = self.peer_manager.clone();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => {
                        log::info!("Incoming connection from {}", addr);
                        let pm = peer_manager.clone();
                        let tx = message_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr, pm, greeting(), tx).await
                            {
                                log::warn!("Connection error with {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                    }
                }
            }
        });

        for peer in &self.config.peers {
            if let Err(e) = self.connect_to(peer).await {
                log::warn!("Could not connect to {}: {}", peer, e);
            }
        }

        if self.config.mine {
            let node = Arc::clone(self);
            tokio::spawn(async move { node.run_miner().await });
        }

        Ok(local_addr)
    }

    /// Connect to a peer
    pub async fn connect_to(&self, addr: &str) -> Result<(), NodeError> {
        log::info!("Connecting to peer: {}", addr);
        let (stream, peer_addr) = connect_to_peer(addr).await?;

        let pm = self.peer_manager.clone();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, pm, greeting(), message_tx).await
            {
                log::warn!("Connection error with {}: {}", peer_addr, e);
            }
        });
        Ok(())
    }

    /// Handle a message from a peer
    pub async fn handle_message(&self, from: SocketAddr, msg: Message) {
        match msg {
            Message::QueryLatest | Message::QueryAll | Message::QueryTransactionPool => {
                let Some(reply) = self.respond(&msg).await else {
                    return;
                };
                if let Err(e) = self.peer_manager.send_to(&from, reply).await {
                    log::warn!("Failed to answer {} from {}: {}", msg.type_name(), from, e);
                }
            }
            Message::ResponseBlockchain(blocks) => {
                self.receive_blocks(blocks).await;
            }
            Message::ResponseTransactionPool(transactions) => {
                self.receive_pool(transactions).await;
            }
        }
    }

    /// Reply to a query, `None` for messages that are not queries
    pub async fn respond(&self, msg: &Message) -> Option<Message> {
        let chain = self.blockchain.read().await;
        match msg {
            Message::QueryLatest => Some(Message::ResponseBlockchain(vec![chain
                .latest_block()
                .clone()])),
            Message::QueryAll => Some(Message::ResponseBlockchain(chain.blocks().to_vec())),
            Message::QueryTransactionPool => Some(Message::ResponseTransactionPool(
                chain.pool().transactions().to_vec(),
            )),
            _ => None,
        }
    }

    /// Process blocks announced by a peer
    pub async fn receive_blocks(&self, blocks: Vec<Block>) -> SyncOutcome {
        if blocks.is_empty() {
            log::debug!("Received block chain of size 0");
            return SyncOutcome::Ignored;
        }

        let outcome = {
            let mut chain = self.blockchain.write().await;
            let outcome = chain.handle_received_blocks(blocks, current_timestamp());
            self.publish_tip(&chain);
            outcome
        };

        match &outcome {
            SyncOutcome::Appended | SyncOutcome::Replaced => self.announce_latest_block().await,
            SyncOutcome::QueryAll => self.spawn_broadcast(Message::QueryAll),
            SyncOutcome::Rejected(e) => log::warn!("Received blocks rejected: {}", e),
            SyncOutcome::Ignored => {}
        }
        outcome
    }

    /// Admit a transaction received from a peer or the control plane
    pub async fn receive_transaction(&self, tx: Transaction) -> Result<(), ValidationError> {
        self.blockchain.write().await.submit_transaction(tx)
    }

    /// Admit every new transaction of a peer's pool; announce ours if
    /// anything was added
    pub async fn receive_pool(&self, transactions: Vec<Transaction>) {
        let mut accepted = 0usize;
        {
            let mut chain = self.blockchain.write().await;
            for tx in transactions {
                if chain.pool().contains(&tx.id) {
                    continue;
                }
                let id = tx.id.clone();
                match chain.submit_transaction(tx) {
                    Ok(()) => accepted += 1,
                    Err(e) => log::warn!("Rejected transaction {} from peer: {}", id, e),
                }
            }
        }
        if accepted > 0 {
            self.announce_pool().await;
        }
    }

    /// Broadcast our latest block
    pub async fn announce_latest_block(&self) {
        let latest = self.blockchain.read().await.latest_block().clone();
        self.spawn_broadcast(Message::ResponseBlockchain(vec![latest]));
    }

    /// Broadcast our pool
    pub async fn announce_pool(&self) {
        let transactions = self.blockchain.read().await.pool().transactions().to_vec();
        self.spawn_broadcast(Message::ResponseTransactionPool(transactions));
    }

    fn spawn_broadcast(&self, msg: Message) {
        let peer_manager = self.peer_manager.clone();
        tokio::spawn(async move { peer_manager.broadcast(msg).await });
    }

    fn publish_tip(&self, chain: &Blockchain) {
        let hash = &chain.latest_block().hash;
        self.tip_tx.send_if_modified(|tip| {
            if *tip != *hash {
                *tip = hash.clone();
                true
            } else {
                false
            }
        });
    }

    /// Commit a block found by this node and announce it
    pub async fn commit_block(&self, block: Block) -> Result<(), NodeError> {
        {
            let mut chain = self.blockchain.write().await;
            chain.commit_block(block, current_timestamp())?;
            self.publish_tip(&chain);
        }
        self.announce_latest_block().await;
        Ok(())
    }

    /// Search for a block matching `template` off the async runtime, then
    /// commit it. The search stops early when the tip moves away from the
    /// template's parent or the node shuts down.
    pub async fn mine_template(&self, template: BlockTemplate) -> Result<Block, NodeError> {
        let tip_rx = self.tip_tx.subscribe();
        let shutdown = self.shutdown.clone();
        let parent = template.previous_hash.clone();

        let found = tokio::task::spawn_blocking(move || {
            Miner::find_block(&template, || {
                shutdown.load(Ordering::Relaxed) || *tip_rx.borrow() != parent
            })
        })
        .await
        .map_err(|e| NodeError::MiningTask(e.to_string()))?;

        let (block, _stats) = found.ok_or(NodeError::MiningCancelled)?;
        self.commit_block(block.clone()).await?;
        Ok(block)
    }

    /// Mine a block whose transactions are exactly `transactions`,
    /// coinbase included
    pub async fn mine_raw_block(&self, transactions: Vec<Transaction>) -> Result<Block, NodeError> {
        let template = self
            .blockchain
            .read()
            .await
            .raw_template(transactions, current_timestamp());
        self.mine_template(template).await
    }

    /// Mine a block with a coinbase followed by every pooled transaction
    pub async fn mine_block(&self) -> Result<Block, NodeError> {
        let template = self
            .blockchain
            .read()
            .await
            .pool_template(&self.wallet.address(), current_timestamp());
        self.mine_template(template).await
    }

    /// Mine a block carrying one wallet payment of `amount` to `address`
    pub async fn mine_transaction(&self, address: &str, amount: u64) -> Result<Block, NodeError> {
        let template = {
            let chain = self.blockchain.read().await;
            let tx = self
                .wallet
                .create_transaction(address, amount, chain.unspent(), chain.pool())?;
            chain.block_template(&self.wallet.address(), vec![tx], current_timestamp())
        };
        self.mine_template(template).await
    }

    /// Create a wallet payment, pool it and announce the pool
    pub async fn send_transaction(&self, address: &str, amount: u64) -> Result<Transaction, NodeError> {
        let tx = {
            let mut chain = self.blockchain.write().await;
            let tx = self
                .wallet
                .create_transaction(address, amount, chain.unspent(), chain.pool())?;
            chain.submit_transaction(tx.clone())?;
            tx
        };
        self.announce_pool().await;
        Ok(tx)
    }

    /// Mine pool blocks until the node shuts down
    pub async fn run_miner(&self) {
        log::info!("Continuous mining started for {}", self.wallet.address());
        while !self.is_shutting_down() {
            match self.mine_block().await {
                Ok(_) | Err(NodeError::MiningCancelled) => {}
                Err(e) => {
                    log::warn!("Mining round failed: {}", e);
                    tokio::time::sleep(MINER_RETRY_DELAY).await;
                }
            }
        }
        log::info!("Continuous mining stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stop running miners and wake `wait_for_shutdown`
    pub fn shutdown(&self) {
        log::info!("Node shutting down...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_one();
    }

    /// Wait until `shutdown` is called
    pub async fn wait_for_shutdown(&self) {
        while !self.is_shutting_down() {
            self.shutdown_notify.notified().await;
        }
    }
}

/// Messages sent first on every new connection
fn greeting() -> Vec<Message> {
    vec![Message::QueryLatest, Message::QueryTransactionPool]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GENESIS_ADDRESS;

    fn test_node() -> Node {
        let config = NodeConfig {
            p2p_port: 0,
            ..NodeConfig::default()
        };
        Node::with_wallet(config, Wallet::generate())
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.http_port, 3001);
        assert_eq!(config.p2p_port, 6001);
        assert_eq!(config.private_key_path, PathBuf::from("node/wallet/private_key"));
        assert!(!config.mine);
    }

    #[tokio::test]
    async fn test_new_loads_wallet_from_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            private_key_path: temp_dir.path().join("private_key"),
            ..NodeConfig::default()
        };
        let first = Node::new(config.clone()).unwrap();
        let second = Node::new(config).unwrap();
        assert_eq!(first.wallet().address(), second.wallet().address());
    }

    #[tokio::test]
    async fn test_mine_block() {
        let node = test_node();
        let block = node.mine_block().await.unwrap();

        let chain = node.blockchain().read().await;
        assert_eq!(block.index, 1);
        assert_eq!(chain.latest_block(), &block);
        assert_eq!(chain.unspent().balance(&node.wallet().address()), 50);
        assert_eq!(*node.tip_tx.borrow(), block.hash);
    }

    #[tokio::test]
    async fn test_send_then_mine() {
        let node = test_node();
        node.mine_block().await.unwrap();
        let receiver = Wallet::generate().address();

        let tx = node.send_transaction(&receiver, 20).await.unwrap();
        assert_eq!(node.blockchain().read().await.pool().len(), 1);

        let block = node.mine_block().await.unwrap();
        assert_eq!(block.transactions[1], tx);

        let chain = node.blockchain().read().await;
        assert!(chain.pool().is_empty());
        assert_eq!(chain.unspent().balance(&receiver), 20);
        assert_eq!(chain.unspent().balance(&node.wallet().address()), 80);
    }

    #[tokio::test]
    async fn test_mine_transaction() {
        let node = test_node();
        node.mine_block().await.unwrap();

        let block = node.mine_transaction(GENESIS_ADDRESS, 50).await.unwrap();
        assert_eq!(block.tx_count(), 2);
        let chain = node.blockchain().read().await;
        assert_eq!(chain.unspent().balance(GENESIS_ADDRESS), 100);
    }

    #[tokio::test]
    async fn test_mine_raw_block_takes_whole_block_data() {
        let node = test_node();
        let receiver = Wallet::generate().address();

        let coinbase = Transaction::coinbase(&receiver, 1);
        let block = node.mine_raw_block(vec![coinbase.clone()]).await.unwrap();
        assert_eq!(block.transactions, vec![coinbase]);
        assert_eq!(
            node.blockchain().read().await.unspent().balance(&receiver),
            50
        );

        // Without a coinbase the block cannot be committed
        assert!(matches!(
            node.mine_raw_block(vec![]).await,
            Err(NodeError::Blockchain(BlockchainError::Invalid(_)))
        ));
        assert_eq!(node.blockchain().read().await.height(), 1);
    }

    #[tokio::test]
    async fn test_send_without_funds_fails() {
        let node = test_node();
        let receiver = Wallet::generate().address();
        assert!(matches!(
            node.send_transaction(&receiver, 1).await,
            Err(NodeError::Wallet(WalletError::InsufficientFunds { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stale_template_is_cancelled() {
        let node = test_node();
        let stale = node
            .blockchain()
            .read()
            .await
            .pool_template(&node.wallet().address(), current_timestamp());
        node.mine_block().await.unwrap();

        assert!(matches!(
            node.mine_template(stale).await,
            Err(NodeError::MiningCancelled)
        ));
        assert_eq!(node.blockchain().read().await.height(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_mining() {
        let node = test_node();
        node.shutdown();
        assert!(matches!(
            node.mine_block().await,
            Err(NodeError::MiningCancelled)
        ));
        node.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_respond_to_queries() {
        let node = test_node();
        node.mine_block().await.unwrap();

        match node.respond(&Message::QueryAll).await {
            Some(Message::ResponseBlockchain(blocks)) => assert_eq!(blocks.len(), 2),
            other => panic!("unexpected reply: {:?}", other),
        }
        match node.respond(&Message::QueryLatest).await {
            Some(Message::ResponseBlockchain(blocks)) => assert_eq!(blocks[0].index, 1),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(
            node.respond(&Message::QueryTransactionPool).await,
            Some(Message::ResponseTransactionPool(vec![]))
        );
        assert!(node.respond(&Message::ResponseBlockchain(vec![])).await.is_none());
    }

    #[tokio::test]
    async fn test_receive_blocks_from_peer() {
        let ahead = test_node();
        ahead.mine_block().await.unwrap();
        ahead.mine_block().await.unwrap();
        let remote = ahead.blockchain().read().await.blocks().to_vec();

        let behind = test_node();
        assert_eq!(
            behind.receive_blocks(vec![remote[2].clone()]).await,
            SyncOutcome::QueryAll
        );
        assert_eq!(behind.receive_blocks(remote.clone()).await, SyncOutcome::Replaced);
        assert_eq!(behind.blockchain().read().await.blocks(), &remote[..]);
        assert_eq!(*behind.tip_tx.borrow(), remote[2].hash);

        assert_eq!(behind.receive_blocks(remote).await, SyncOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_receive_pool_from_peer() {
        let a = test_node();
        a.mine_block().await.unwrap();
        a.send_transaction(GENESIS_ADDRESS, 10).await.unwrap();

        let b = test_node();
        let chain = a.blockchain().read().await.blocks().to_vec();
        b.receive_blocks(chain).await;

        let pool = a.blockchain().read().await.pool().transactions().to_vec();
        b.receive_pool(pool.clone()).await;
        assert_eq!(b.blockchain().read().await.pool().transactions(), &pool[..]);

        // Second delivery is a no-op
        b.receive_pool(pool).await;
        assert_eq!(b.blockchain().read().await.pool().len(), 1);
    }

    #[tokio::test]
    async fn test_nodes_sync_over_tcp() {
        let a = Arc::new(test_node());
        a.mine_block().await.unwrap();
        let addr = a.start().await.unwrap();

        let b = Arc::new(test_node());
        b.start().await.unwrap();
        b.connect_to(&format!("127.0.0.1:{}", addr.port()))
            .await
            .unwrap();

        let synced = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if b.blockchain().read().await.height() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(synced.is_ok());
        assert_eq!(
            b.blockchain().read().await.latest_block(),
            a.blockchain().read().await.latest_block()
        );
    }
}
