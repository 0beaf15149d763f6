//! TCP server and connection handling
//!
//! Accepts incoming peer connections, dials outgoing ones, and runs the
//! per-connection read and write tasks.

use crate::network::message::{Message, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::{PeerError, PeerHandle, PeerManager};
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Messages queued per peer before sends start waiting
const PEER_CHANNEL_SIZE: usize = 100;

fn invalid_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

/// Message codec for length-prefixed framing
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.to_bytes().map_err(|e| invalid_data(e.to_string()))?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!(
                "message of {} bytes exceeds limit",
                data.len()
            )));
        }

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Need at least header
            if src.len() < 8 {
                return Ok(None);
            }

            if src[..4] != MAGIC {
                return Err(invalid_data("Invalid magic bytes"));
            }

            let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
            if len > MAX_MESSAGE_SIZE {
                return Err(invalid_data(format!("message of {} bytes exceeds limit", len)));
            }

            if src.len() < 8 + len {
                src.reserve(8 + len - src.len());
                return Ok(None);
            }

            src.advance(8);
            let data = src.split_to(len);

            // Framing is intact, so a bad body only costs this one message
            match Message::from_bytes(&data) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => log::warn!("Dropping message: {}", e),
            }
        }
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Listening p2p port on: {}", port);
        Ok(Self { listener })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Handle a peer connection (both inbound and outbound).
///
/// Registers the peer, sends `greeting` on the wire, forwards every
/// received message to `message_tx`, and unregisters the peer when the
/// connection closes.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer_manager: Arc<PeerManager>,
    greeting: Vec<Message>,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
) -> Result<(), PeerError> {
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Message>(PEER_CHANNEL_SIZE);
    peer_manager.add_peer(PeerHandle { addr, tx }).await?;

    for msg in greeting {
        log::debug!("Sending {} to {}", msg.type_name(), addr);
        if let Err(e) = writer.send(msg).await {
            peer_manager.remove_peer(&addr).await;
            return Err(PeerError::IoError(e));
        }
    }

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        match reader.next().await {
            Some(Ok(msg)) => {
                log::debug!("Received {} from {}", msg.type_name(), addr);
                if message_tx.send((addr, msg)).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                log::warn!("Error reading from {}: {}", addr, e);
                break;
            }
            None => {
                log::info!("Peer {} disconnected", addr);
                break;
            }
        }
    }

    write_handle.abort();
    peer_manager.remove_peer(&addr).await;

    Ok(())
}
