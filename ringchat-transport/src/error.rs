//! Transport-level errors: socket send/recv failure. Callers recover by
//! closing the connection and marking the peer/client for failure
//! detection — nothing here is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {ip}:{port}: {source}")]
    Connect {
        ip: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer connection closed mid-frame")]
    ConnectionClosed,
    #[error("frame of {0} bytes exceeds the maximum of {1} bytes")]
    FrameTooLarge(u32, usize),
}
