//! Wire protocol primitives: the message envelope, the closed set of
//! message types, and vector-clock algebra.
//!
//! Messages are transport-agnostic: the TCP/UDP framing lives in
//! `ringchat-transport`, this module only knows how a `Message` serializes
//! to and from the JSON object described in the wire format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type NodeId = String;

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Closed set of message types routed by the node dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ClientJoin,
    ServerJoin,
    JoinRoom,
    LeaveRoom,
    Chat,
    DiscoveryRequest,
    DiscoveryResponse,
    ServerDiscovery,
    AvailableRooms,
    Election,
    Heartbeat,
    MetadataUpdate,
    UpdateNeighbour,
}

/// A vector clock over node identifiers, default 0 for absent keys.
///
/// Serializes transparently as the flat `{ id: int, ... }` map the wire
/// format expects for `vector_clock`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    timestamps: HashMap<NodeId, u64>,
}

/// Result of comparing two vector clocks under the standard partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Less,
    Greater,
    Equal,
    Concurrent,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> u64 {
        self.timestamps.get(id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, id: &str) {
        *self.timestamps.entry(id.to_string()).or_insert(0) += 1;
    }

    /// Rolls back a node's own entry, used by a sender that failed to
    /// deliver a message after having already incremented its clock.
    pub fn decrement(&mut self, id: &str) {
        if let Some(v) = self.timestamps.get_mut(id) {
            *v = v.saturating_sub(1);
        }
    }

    pub fn merge(&mut self, other: &VectorClock) {
        for (node, count) in &other.timestamps {
            let entry = self.timestamps.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }
    }

    fn keys(&self, other: &VectorClock) -> Vec<String> {
        let mut all: Vec<String> = self
            .timestamps
            .keys()
            .chain(other.timestamps.keys())
            .cloned()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut greater = false;
        let mut smaller = false;
        for key in self.keys(other) {
            let a = self.get(&key);
            let b = other.get(&key);
            if a > b {
                greater = true;
            } else if a < b {
                smaller = true;
            }
        }
        match (greater, smaller) {
            (true, false) => ClockOrdering::Greater,
            (false, true) => ClockOrdering::Less,
            (false, false) => ClockOrdering::Equal,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True iff `msg_clock` (sent by `sender`) may be delivered without
    /// violating causality given this (the receiver's) clock.
    pub fn causally_ready(&self, msg_clock: &VectorClock, sender: &str) -> bool {
        if msg_clock.get(sender) != self.get(sender) + 1 {
            return false;
        }
        for key in self.keys(msg_clock) {
            if key == sender {
                continue;
            }
            if msg_clock.get(&key) > self.get(&key) {
                return false;
            }
        }
        true
    }
}

/// A single protocol message, mirroring the wire JSON object exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message_id: String,
    #[serde(default)]
    pub content: String,
    pub sender_id: NodeId,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub vector_clock: VectorClock,
    /// Populated by the UDP transport on receipt; never sent on the wire.
    #[serde(skip)]
    pub sender_addr: Option<std::net::SocketAddr>,
}

impl Message {
    pub fn new(kind: MessageType, sender_id: impl Into<NodeId>) -> Self {
        Self {
            kind,
            message_id: new_message_id(),
            content: String::new(),
            sender_id: sender_id.into(),
            room_id: String::new(),
            vector_clock: VectorClock::new(),
            sender_addr: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    pub fn with_vector_clock(mut self, vc: VectorClock) -> Self {
        self.vector_clock = vc;
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_then_merge_equals_merge_with_increment() {
        let mut a = VectorClock::new();
        a.increment("A");
        let mut b = VectorClock::new();
        b.merge(&a);
        assert_eq!(a, b);
    }

    #[test]
    fn merge_is_commutative_associative_idempotent() {
        let mut a = VectorClock::new();
        a.increment("A");
        a.increment("A");
        let mut b = VectorClock::new();
        b.increment("B");

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);

        let mut ab2 = ab.clone();
        ab2.merge(&ab);
        assert_eq!(ab2, ab);
    }

    #[test]
    fn compare_partial_order() {
        let mut a = VectorClock::new();
        a.increment("A");
        let mut b = a.clone();
        b.increment("A");
        assert_eq!(a.compare(&b), ClockOrdering::Less);
        assert_eq!(b.compare(&a), ClockOrdering::Greater);
        assert_eq!(a.compare(&a), ClockOrdering::Equal);

        let mut c = VectorClock::new();
        c.increment("B");
        assert_eq!(a.compare(&c), ClockOrdering::Concurrent);
    }

    #[test]
    fn causally_ready_correctness() {
        let mut local = VectorClock::new();
        local.increment("A");
        let mut msg = VectorClock::new();
        msg.increment("A");
        msg.increment("A");
        assert!(local.causally_ready(&msg, "A"));

        let mut gapped = VectorClock::new();
        gapped.increment("A");
        gapped.increment("A");
        gapped.increment("A");
        assert!(!local.causally_ready(&gapped, "A"));
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let mut vc = VectorClock::new();
        vc.increment("A");
        let msg = Message::new(MessageType::Chat, "A")
            .with_room("R")
            .with_content("hi")
            .with_vector_clock(vc);
        let json = msg.to_json().unwrap();
        let back = Message::from_json(&json).unwrap();
        assert_eq!(back.kind, MessageType::Chat);
        assert_eq!(back.message_id, msg.message_id);
        assert_eq!(back.sender_id, "A");
        assert_eq!(back.room_id, "R");
        assert_eq!(back.content, "hi");
        assert_eq!(back.vector_clock, msg.vector_clock);
    }
}
