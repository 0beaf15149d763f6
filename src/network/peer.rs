//! Peer management for P2P networking
//!
//! Tracks connected peers and routes outgoing messages to their
//! connection tasks.

use crate::network::message::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 32;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Max peers reached")]
    MaxPeersReached,
    #[error("Already connected to {0}")]
    AlreadyConnected(SocketAddr),
}

/// Handle for sending messages to a peer
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).await.map_err(|_| PeerError::Disconnected)
    }
}

/// Manages all peer connections
#[derive(Default)]
pub struct PeerManager {
    handles: RwLock<HashMap<SocketAddr, PeerHandle>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected peer
    pub async fn add_peer(&self, handle: PeerHandle) -> Result<(), PeerError> {
        let mut handles = self.handles.write().await;
        if handles.len() >= MAX_PEERS {
            return Err(PeerError::MaxPeersReached);
        }
        if handles.contains_key(&handle.addr) {
            return Err(PeerError::AlreadyConnected(handle.addr));
        }

        log::info!("Added peer: {}", handle.addr);
        handles.insert(handle.addr, handle);
        Ok(())
    }

    /// Remove a peer
    pub async fn remove_peer(&self, addr: &SocketAddr) {
        if self.handles.write().await.remove(addr).is_some() {
            log::info!("Removed peer: {}", addr);
        }
    }

    /// Get all connected peer addresses
    pub async fn get_peers(&self) -> Vec<SocketAddr> {
        let handles = self.handles.read().await;
        let mut peers: Vec<SocketAddr> = handles.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Get peer count
    pub async fn peer_count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Broadcast a message to all peers
    pub async fn broadcast(&self, msg: Message) {
        // Snapshot the handles so a slow peer does not hold the lock
        let handles: Vec<PeerHandle> = self.handles.read().await.values().cloned().collect();
        log::debug!("Broadcasting {} to {} peers", msg.type_name(), handles.len());
        for handle in handles {
            if let Err(e) = handle.send(msg.clone()).await {
                log::warn!("Failed to send to {}: {}", handle.addr, e);
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        let handle = self.handles.read().await.get(addr).cloned();
        match handle {
            Some(handle) => handle.send(msg).await,
            None => Err(PeerError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(port: u16) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        (PeerHandle { addr, tx }, rx)
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let manager = PeerManager::new();
        let (a, _rx_a) = handle(7001);
        let addr = a.addr;

        manager.add_peer(a.clone()).await.unwrap();
        assert!(matches!(
            manager.add_peer(a).await,
            Err(PeerError::AlreadyConnected(_))
        ));
        assert_eq!(manager.get_peers().await, vec![addr]);

        manager.remove_peer(&addr).await;
        assert_eq!(manager.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_and_send_to() {
        let manager = PeerManager::new();
        let (a, mut rx_a) = handle(7001);
        let (b, mut rx_b) = handle(7002);
        let addr_a = a.addr;
        manager.add_peer(a).await.unwrap();
        manager.add_peer(b).await.unwrap();

        manager.broadcast(Message::QueryLatest).await;
        assert_eq!(rx_a.recv().await, Some(Message::QueryLatest));
        assert_eq!(rx_b.recv().await, Some(Message::QueryLatest));

        manager.send_to(&addr_a, Message::QueryAll).await.unwrap();
        assert_eq!(rx_a.recv().await, Some(Message::QueryAll));
        assert!(rx_b.try_recv().is_err());

        let unknown: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            manager.send_to(&unknown, Message::QueryAll).await,
            Err(PeerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_peer_limit() {
        let manager = PeerManager::new();
        let mut receivers = Vec::new();
        for i in 0..MAX_PEERS {
            let (h, rx) = handle(8000 + i as u16);
            receivers.push(rx);
            manager.add_peer(h).await.unwrap();
        }
        let (extra, _rx) = handle(9000);
        assert!(matches!(
            manager.add_peer(extra).await,
            Err(PeerError::MaxPeersReached)
        ));
    }
}
