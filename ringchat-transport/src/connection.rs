//! The connection manager: the peer↔peer and server→client TCP connection
//! maps, each guarded by its own mutex. Only map mutations take the mutex —
//! once a connection's outbound channel has been looked up, sending through
//! it never blocks on the map lock, only on the connection's own unbounded
//! queue.
//!
//! Each registered connection is driven by two tokio tasks: a writer that
//! drains an `mpsc` channel into the socket, and a reader that parses
//! incoming frames and forwards them to the node's central dispatch loop
//! as [`Inbound`] events. Splitting read and write halves this way means a
//! slow or backed-up peer's writes never stall delivery of its own inbound
//! messages, and vice versa.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use ringchat_core::error::MembershipError;
use ringchat_core::membership::Membership;
use ringchat_core::{Message, MessageType, NodeId};

use crate::error::TransportError;
use crate::framing::{read_frame, write_frame};
use crate::inbound::Inbound;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Peer,
    Client,
}

pub struct ConnectionManager {
    server_id: NodeId,
    peers: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
    clients: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
}

impl ConnectionManager {
    pub fn new(server_id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            server_id,
            peers: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Opens a new outbound TCP connection to a peer whose id is already
    /// known (the caller learned it from a SERVER_DISCOVERY datagram before
    /// the dispatcher emitted `Action::ConnectToPeer`). Registers the
    /// connection under `id` immediately; the caller is responsible for
    /// then sending the SERVER_JOIN handshake via [`Self::send_to_peer`].
    pub async fn connect_to_peer(
        self: &Arc<Self>,
        id: NodeId,
        ip: &str,
        port: u16,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<(), TransportError> {
        let stream = TcpStream::connect((ip, port))
            .await
            .map_err(|source| TransportError::Connect { ip: ip.to_string(), port, source })?;
        let (read_half, write_half) = tokio::io::split(stream);
        self.register(Kind::Peer, id, read_half, write_half, inbound, None).await;
        Ok(())
    }

    /// Hands a freshly-accepted socket to the manager. Its first frame is
    /// expected to be SERVER_JOIN or CLIENT_JOIN; the connection is
    /// registered under whichever id that frame carries and the frame is
    /// forwarded to `inbound` like any other message so the dispatcher
    /// still sees it.
    pub fn accept(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr, inbound: mpsc::Sender<Inbound>) {
        let cm = self.clone();
        tokio::spawn(async move {
            let (mut read_half, write_half) = tokio::io::split(stream);
            let first = match read_frame(&mut read_half).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, %peer_addr, "accepted connection failed before handshake");
                    return;
                }
            };
            let msg = match std::str::from_utf8(&first).ok().and_then(|s| Message::from_json(s).ok()) {
                Some(m) => m,
                None => {
                    warn!(%peer_addr, "accepted connection's first frame was not valid JSON");
                    return;
                }
            };
            let kind = match msg.kind {
                MessageType::ServerJoin => Kind::Peer,
                MessageType::ClientJoin => Kind::Client,
                other => {
                    warn!(?other, %peer_addr, "accepted connection's first frame was not a JOIN");
                    return;
                }
            };
            let id = msg.sender_id.clone();
            cm.register(kind, id, read_half, write_half, inbound, Some(msg)).await;
        });
    }

    async fn register<R, W>(
        self: &Arc<Self>,
        kind: Kind,
        id: NodeId,
        mut read_half: ReadHalf<R>,
        write_half: WriteHalf<W>,
        inbound: mpsc::Sender<Inbound>,
        replay_first: Option<Message>,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let map = match kind {
            Kind::Peer => &self.peers,
            Kind::Client => &self.clients,
        };
        {
            let mut guard = map.lock().await;
            if guard.contains_key(&id) {
                // At most one connection per id per direction. For peers,
                // which side keeps its connection is decided the same way
                // as which side dials in the first place, by comparing
                // ids — not by which one happened to register first — so
                // both ends of the duplicate converge on the same outcome.
                // Clients never dial a ringchat node, so there is no
                // symmetry rule to apply: the earlier connection just wins.
                let keep_new = kind == Kind::Peer
                    && Membership::should_initiate_connection(&self.server_id, &id) != replay_first.is_some();
                let err = MembershipError::DuplicatePeer(id.clone());
                if !keep_new {
                    warn!(%id, error = %err, "dropping duplicate connection on the wrong side of the dial rule");
                    return;
                }
                warn!(%id, error = %err, "existing connection loses to a duplicate on the correct side of the dial rule");
            }
            let (tx, rx) = mpsc::unbounded_channel();
            guard.insert(id.clone(), tx);
            tokio::spawn(Self::run_writer(rx, write_half));
        }

        if let Some(msg) = replay_first {
            let event = match kind {
                Kind::Peer => Inbound::Peer { from: id.clone(), msg },
                Kind::Client => Inbound::Client { from: id.clone(), msg },
            };
            if inbound.send(event).await.is_err() {
                return;
            }
        }

        let cm = self.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(bytes)) => {
                        let Some(msg) = std::str::from_utf8(&bytes).ok().and_then(|s| Message::from_json(s).ok())
                        else {
                            warn!(%id, "dropping malformed frame from connection");
                            continue;
                        };
                        let event = match kind {
                            Kind::Peer => Inbound::Peer { from: id.clone(), msg },
                            Kind::Client => Inbound::Client { from: id.clone(), msg },
                        };
                        if inbound.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(%id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "connection read error");
                        break;
                    }
                }
            }
            cm.remove(kind, &id).await;
            let closed = match kind {
                Kind::Peer => Inbound::PeerClosed { id },
                Kind::Client => Inbound::ClientClosed { id },
            };
            let _ = inbound.send(closed).await;
        });
    }

    async fn run_writer<W: AsyncWrite + Send + Unpin + 'static>(
        mut rx: mpsc::UnboundedReceiver<Message>,
        mut write_half: W,
    ) {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = msg.to_json() else { continue };
            if write_frame(&mut write_half, json.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    async fn remove(&self, kind: Kind, id: &NodeId) {
        let map = match kind {
            Kind::Peer => &self.peers,
            Kind::Client => &self.clients,
        };
        map.lock().await.remove(id);
    }

    pub async fn send_to_peer(&self, to: &NodeId, msg: Message) {
        let sender = self.peers.lock().await.get(to).cloned();
        match sender {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!(%to, "send_to_peer: no connection registered"),
        }
    }

    pub async fn send_to_client(&self, to: &NodeId, msg: Message) {
        let sender = self.clients.lock().await.get(to).cloned();
        match sender {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!(%to, "send_to_client: no connection registered"),
        }
    }

    pub async fn broadcast_to_peers(&self, msg: Message) {
        let senders: Vec<_> = self.peers.lock().await.values().cloned().collect();
        for tx in senders {
            let _ = tx.send(msg.clone());
        }
    }

    pub async fn drop_peer(&self, id: &NodeId) {
        self.peers.lock().await.remove(id);
    }

    pub async fn drop_client(&self, id: &NodeId) {
        self.clients.lock().await.remove(id);
    }

    pub async fn has_peer(&self, id: &NodeId) -> bool {
        self.peers.lock().await.contains_key(id)
    }
}
