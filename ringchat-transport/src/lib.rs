//! UDP+TCP plumbing for a ringchat server node: length-prefixed TCP
//! framing, the peer/client connection manager, and UDP discovery
//! datagrams. Nothing in `ringchat-core` depends on this
//! crate; everything here exists to execute the `Vec<Action>` that crate's
//! state machines produce and to turn raw sockets back into the `Message`
//! values it consumes.

pub mod connection;
pub mod error;
pub mod framing;
pub mod inbound;
pub mod transport;
pub mod udp;

pub use connection::ConnectionManager;
pub use error::TransportError;
pub use inbound::Inbound;
pub use transport::{TcpUdpTransport, Transport};
pub use udp::{DISCOVERY_PORT, MAX_DATAGRAM_BYTES};
