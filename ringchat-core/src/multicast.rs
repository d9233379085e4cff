//! Per-room state and causal multicast delivery.
//!
//! A room's vector clock advances only on delivery, never on hold-back.
//! The hold-back drain is an iterative fixed-point scan rather than a
//! recursive pass, to avoid stack growth under a long backlog.

use std::collections::BTreeSet;

use crate::protocol::{Message, NodeId, VectorClock};

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub host_server_id: NodeId,
    pub members: BTreeSet<NodeId>,
    pub clock: VectorClock,
    pub hold_back: Vec<Message>,
    pub history: Vec<Message>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, host_server_id: impl Into<NodeId>) -> Self {
        Self {
            room_id: room_id.into(),
            host_server_id: host_server_id.into(),
            members: BTreeSet::new(),
            clock: VectorClock::new(),
            hold_back: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn add_member(&mut self, client_id: NodeId) {
        self.members.insert(client_id);
    }

    pub fn remove_member(&mut self, client_id: &str) {
        self.members.remove(client_id);
    }

    /// Handles an inbound CHAT message addressed to this room. Returns the
    /// messages now ready for delivery, in delivery order (the caller fans
    /// each one out to every current member, including the sender, as an
    /// echo). An empty result means the message was held back.
    pub fn handle_chat(&mut self, msg: Message) -> Vec<Message> {
        if self.clock.causally_ready(&msg.vector_clock, &msg.sender_id) {
            let mut delivered = vec![self.deliver(msg)];
            delivered.extend(self.drain_hold_back());
            delivered
        } else {
            self.hold_back.push(msg);
            Vec::new()
        }
    }

    fn deliver(&mut self, msg: Message) -> Message {
        self.clock.merge(&msg.vector_clock);
        self.history.push(msg.clone());
        msg
    }

    /// Scans the hold-back queue for newly-ready messages until a full pass
    /// delivers nothing — the iterative fixed point.
    fn drain_hold_back(&mut self) -> Vec<Message> {
        let mut delivered = Vec::new();
        loop {
            let ready_idx = self
                .hold_back
                .iter()
                .position(|m| self.clock.causally_ready(&m.vector_clock, &m.sender_id));
            let Some(idx) = ready_idx else { break };
            let msg = self.hold_back.remove(idx);
            delivered.push(self.deliver(msg));
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn chat(sender: &str, room: &str, clock_ticks: &[(&str, u64)]) -> Message {
        let mut vc = VectorClock::new();
        for &(id, n) in clock_ticks {
            for _ in 0..n {
                vc.increment(id);
            }
        }
        Message::new(MessageType::Chat, sender)
            .with_room(room)
            .with_vector_clock(vc)
    }

    #[test]
    fn causal_delivery_with_gap_then_drain() {
        let mut room = Room::new("R", "host");
        let gapped = chat("A", "R", &[("A", 2)]);
        let delivered = room.handle_chat(gapped.clone());
        assert!(delivered.is_empty());
        assert_eq!(room.clock.get("A"), 0);

        let first = chat("A", "R", &[("A", 1)]);
        let delivered = room.handle_chat(first);
        // both the first message and the drained gapped one deliver, in order
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].message_id, gapped.message_id);
        assert_eq!(room.clock.get("A"), 2);
        assert!(room.hold_back.is_empty());
    }

    #[test]
    fn concurrent_senders_both_deliver_immediately() {
        let mut room = Room::new("R", "host");
        let a1 = chat("A", "R", &[("A", 1)]);
        let b1 = chat("B", "R", &[("B", 1)]);

        assert_eq!(room.handle_chat(a1).len(), 1);
        assert_eq!(room.handle_chat(b1).len(), 1);

        assert_eq!(room.clock.get("A"), 1);
        assert_eq!(room.clock.get("B"), 1);
        use crate::protocol::ClockOrdering;
        let mut a_clock = VectorClock::new();
        a_clock.increment("A");
        let mut b_clock = VectorClock::new();
        b_clock.increment("B");
        assert_eq!(a_clock.compare(&b_clock), ClockOrdering::Concurrent);
    }

    #[test]
    fn hold_back_progress_all_eventually_delivered() {
        let mut room = Room::new("R", "host");
        let m3 = chat("A", "R", &[("A", 3)]);
        let m2 = chat("A", "R", &[("A", 2)]);
        let m1 = chat("A", "R", &[("A", 1)]);

        assert!(room.handle_chat(m3).is_empty());
        assert!(room.handle_chat(m2).is_empty());
        let delivered = room.handle_chat(m1);
        assert_eq!(delivered.len(), 3);
        assert!(room.hold_back.is_empty());
    }
}
