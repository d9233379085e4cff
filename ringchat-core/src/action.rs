//! Outputs of the pure, transport-agnostic state machines in this crate.
//!
//! Every handler in `ringchat-core` takes the current state plus an inbound
//! event and returns a `Vec<Action>` describing what I/O the caller (the
//! transport layer, in `ringchat-transport`/`ringchat-server`) must perform.
//! No module in this crate ever touches a socket directly, which is what
//! keeps the election, failure-detector and causal-multicast logic testable
//! without standing up real connections.

use crate::protocol::{Message, NodeId};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `msg` to a peer over its established peer-to-peer connection.
    SendToPeer { to: NodeId, msg: Message },
    /// Send `msg` to a client over its established server-to-client connection.
    SendToClient { to: NodeId, msg: Message },
    /// Send `msg` to every connected peer.
    BroadcastToPeers { msg: Message },
    /// Send `msg` as a single UDP datagram to `to`.
    SendUdp { to: SocketAddr, msg: Message },
    /// Broadcast `msg` as a UDP datagram to the local broadcast domain.
    BroadcastUdp { msg: Message },
    /// Open a new outbound TCP connection to a newly discovered peer.
    ConnectToPeer { ip: String, port: u16 },
    /// Drop the peer-to-peer connection for `id` (failure or duplicate).
    DropPeerConnection { id: NodeId },
    /// Drop the server-to-client connection for `id` (failure or leave).
    DropClientConnection { id: NodeId },
}
