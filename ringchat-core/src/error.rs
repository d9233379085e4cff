//! Error taxonomy per the coordination plane's error-handling design.
//!
//! Every variant here is recovered locally by the caller (log-and-drop,
//! close-and-mark-for-detection, etc.) — nothing propagates across nodes
//! except via explicit protocol messages.

use thiserror::Error;

/// Malformed or unexpected wire content.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram exceeds the 4096 byte UDP frame limit ({0} bytes)")]
    OversizedDatagram(usize),
}

/// ELECTION payload with a round/hop value outside the range the current
/// round could have produced.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("election hop distance {d} invalid for round {k}")]
    InvalidHop { d: u32, k: u32 },
}

/// Duplicate peer/connection bookkeeping.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("peer {0} already has a connection in this direction")]
    DuplicatePeer(String),
}
