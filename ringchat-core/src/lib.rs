//! Transport-agnostic domain logic for a ringchat server node: the wire
//! protocol, vector clocks, the logical ring, Hirschberg–Sinclair election,
//! heartbeat failure detection, causal multicast, and the room directory.
//!
//! Nothing in this crate opens a socket. Every state-changing operation
//! takes the current state and an event and returns a `Vec<Action>`
//! describing the I/O the caller must perform — see [`action::Action`].

pub mod action;
pub mod dispatcher;
pub mod election;
pub mod error;
pub mod failure_detector;
pub mod membership;
pub mod metadata;
pub mod multicast;
pub mod protocol;
pub mod ring;
pub mod server_state;

pub use action::Action;
pub use dispatcher::NodeState;
pub use protocol::{Message, MessageType, NodeId, VectorClock};
pub use server_state::ServerState;
