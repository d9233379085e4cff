//! The `Transport` trait: `ringchat-core` never depends on this crate, and
//! nothing downstream of the dispatcher needs to know whether it's talking
//! to a real socket or a test double.
//!
//! [`TcpUdpTransport`] is the only implementation shipped; it is a thin
//! facade over [`ConnectionManager`] and a discovery [`UdpSocket`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

use ringchat_core::{Message, NodeId};

use crate::connection::ConnectionManager;
use crate::error::TransportError;
use crate::inbound::Inbound;
use crate::udp;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect_to_peer(&self, id: NodeId, ip: &str, port: u16) -> Result<(), TransportError>;
    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr);
    async fn send_to_peer(&self, to: &NodeId, msg: Message);
    async fn send_to_client(&self, to: &NodeId, msg: Message);
    async fn broadcast_to_peers(&self, msg: Message);
    async fn send_udp(&self, to: SocketAddr, msg: &Message) -> Result<(), TransportError>;
    async fn broadcast_udp(&self, msg: &Message) -> Result<(), TransportError>;
    async fn drop_peer(&self, id: &NodeId);
    async fn drop_client(&self, id: &NodeId);
}

pub struct TcpUdpTransport {
    connections: Arc<ConnectionManager>,
    udp_socket: UdpSocket,
    inbound: mpsc::Sender<Inbound>,
}

impl TcpUdpTransport {
    pub fn new(connections: Arc<ConnectionManager>, udp_socket: UdpSocket, inbound: mpsc::Sender<Inbound>) -> Self {
        Self { connections, udp_socket, inbound }
    }

    /// Blocks on the discovery socket's next datagram. The central dispatch
    /// loop drives this in its own task, not through the `Transport` trait,
    /// since it has no `&self` action to key off — it is the one inbound
    /// source nothing else triggers.
    pub async fn recv_udp(&self) -> Result<Option<Message>, TransportError> {
        udp::recv_datagram(&self.udp_socket).await
    }
}

#[async_trait]
impl Transport for TcpUdpTransport {
    async fn connect_to_peer(&self, id: NodeId, ip: &str, port: u16) -> Result<(), TransportError> {
        self.connections.connect_to_peer(id, ip, port, self.inbound.clone()).await
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        self.connections.accept(stream, peer_addr, self.inbound.clone());
    }

    async fn send_to_peer(&self, to: &NodeId, msg: Message) {
        self.connections.send_to_peer(to, msg).await;
    }

    async fn send_to_client(&self, to: &NodeId, msg: Message) {
        self.connections.send_to_client(to, msg).await;
    }

    async fn broadcast_to_peers(&self, msg: Message) {
        self.connections.broadcast_to_peers(msg).await;
    }

    async fn send_udp(&self, to: SocketAddr, msg: &Message) -> Result<(), TransportError> {
        udp::send_datagram(&self.udp_socket, to, msg).await
    }

    async fn broadcast_udp(&self, msg: &Message) -> Result<(), TransportError> {
        udp::broadcast_datagram(&self.udp_socket, msg).await
    }

    async fn drop_peer(&self, id: &NodeId) {
        self.connections.drop_peer(id).await;
    }

    async fn drop_client(&self, id: &NodeId) {
        self.connections.drop_client(id).await;
    }
}
