//! Events the connection manager's reader tasks hand back to the node's
//! central dispatch loop. Everything that isn't a freshly-parsed [`Message`]
//! is a connection lifecycle notification the loop needs in order to drive
//! the failure detector and connection maps the same way a socket error
//! would.

use ringchat_core::{Message, NodeId};

#[derive(Debug)]
pub enum Inbound {
    /// A framed message arrived from an established peer connection.
    Peer { from: NodeId, msg: Message },
    /// A framed message arrived from an established client connection.
    Client { from: NodeId, msg: Message },
    /// A UDP datagram arrived on the discovery socket.
    Udp { msg: Message },
    /// A peer connection's reader or writer task ended (EOF or I/O error).
    PeerClosed { id: NodeId },
    /// A client connection's reader or writer task ended.
    ClientClosed { id: NodeId },
    /// A periodic heartbeat-and-timeout tick, not sourced from any socket.
    Tick,
}
