//! UDP discovery datagrams: one JSON-encoded [`Message`] per datagram, a
//! shared well-known port, and broadcast capability.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::warn;

use ringchat_core::error::ProtocolError;
use ringchat_core::Message;

use crate::error::TransportError;

/// Well-known UDP port every node listens on for discovery traffic.
pub const DISCOVERY_PORT: u16 = 6000;

/// Max size of a single UDP datagram.
pub const MAX_DATAGRAM_BYTES: usize = 4096;

/// Binds the discovery socket with `SO_BROADCAST` enabled so the same
/// socket can both listen and broadcast.
pub async fn bind_discovery_socket(port: u16) -> Result<UdpSocket, TransportError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Sends `msg` as a single datagram to `to`.
pub async fn send_datagram(socket: &UdpSocket, to: SocketAddr, msg: &Message) -> Result<(), TransportError> {
    let json = msg.to_json().map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if json.len() > MAX_DATAGRAM_BYTES {
        return Err(TransportError::FrameTooLarge(json.len() as u32, MAX_DATAGRAM_BYTES));
    }
    socket.send_to(json.as_bytes(), to).await?;
    Ok(())
}

/// Broadcasts `msg` to the local broadcast domain on [`DISCOVERY_PORT`].
pub async fn broadcast_datagram(socket: &UdpSocket, msg: &Message) -> Result<(), TransportError> {
    let addr = SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT));
    send_datagram(socket, addr, msg).await
}

/// Reads one datagram, parses it as a [`Message`], and stamps `sender_addr`
/// with the UDP source address via `Message::sender_addr`.
/// Oversized or malformed datagrams are logged and dropped by the caller
/// (`Ok(None)`), not treated as a transport failure. The receive buffer is
/// sized one byte past the limit so a datagram that exceeds it is detected
/// (`len` fills the whole buffer) rather than silently truncated and parsed
/// as if it were a shorter, valid frame.
pub async fn recv_datagram(socket: &UdpSocket) -> Result<Option<Message>, TransportError> {
    let mut buf = [0u8; MAX_DATAGRAM_BYTES + 1];
    let (len, src) = socket.recv_from(&mut buf).await?;
    if len > MAX_DATAGRAM_BYTES {
        warn!(%src, error = %ProtocolError::OversizedDatagram(len), "dropping oversized datagram");
        return Ok(None);
    }
    let Ok(text) = std::str::from_utf8(&buf[..len]) else {
        return Ok(None);
    };
    let Ok(mut msg) = Message::from_json(text) else {
        return Ok(None);
    };
    msg.sender_addr = Some(src);
    Ok(Some(msg))
}
