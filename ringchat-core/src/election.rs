//! Hirschberg–Sinclair leader election over the logical ring.
//!
//! The ELECTION sub-protocol is a typed [`ElectionMsg`] enum;
//! [`ElectionMsg::to_wire`]/`from_wire` handle the (de)serialization into
//! the `content` string of an ELECTION `Message`, which is the only place
//! the JSON encoding should be visible.
//!
//! This module takes the caller's current `(left, right)` neighbours and
//! ring size as plain arguments rather than a [`crate::ring::RingView`], so
//! that a node honouring an in-flight `UPDATE_NEIGHBOUR` override (see
//! `dispatcher.rs`) doesn't have to thread that override through the ring
//! type itself.

use crate::action::Action;
use crate::error::ElectionError;
use crate::protocol::{Message, MessageType, NodeId};
use crate::ring::{NeighbourSide, NeighbourUpdate};
use serde::{Deserialize, Serialize};

/// Typed ELECTION sub-protocol, carried JSON-encoded in `Message::content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionMsg {
    /// A probe travelling `d` hops into round `k`, initiated by `mid`.
    Probe { mid: NodeId, k: u32, d: u32 },
    /// A reply travelling back towards the initiator `mid` for round `k`.
    Reply { mid: NodeId, k: u32 },
    /// The terminal announcement: `mid` is the new leader.
    Leader { mid: NodeId },
}

impl ElectionMsg {
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("ElectionMsg always serializes")
    }

    pub fn from_wire(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Per-node election bookkeeping. Exactly one of these exists per
/// [`crate::dispatcher::NodeState`], guarded by the same mutex as the rest
/// of that node's state (see the crate-level locking discipline).
#[derive(Debug, Clone, Default)]
pub struct ElectionState {
    pub in_progress: bool,
    pub round: u32,
    reply_count: u32,
}

impl ElectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn probe_message(self_id: &NodeId, k: u32, d: u32) -> Message {
        Message::new(MessageType::Election, self_id.clone())
            .with_content(ElectionMsg::Probe { mid: self_id.clone(), k, d }.to_wire())
    }

    fn reply_message(self_id: &NodeId, mid: &NodeId, k: u32) -> Message {
        Message::new(MessageType::Election, self_id.clone())
            .with_content(ElectionMsg::Reply { mid: mid.clone(), k }.to_wire())
    }

    fn leader_message(self_id: &NodeId) -> Message {
        Message::new(MessageType::Election, self_id.clone())
            .with_content(ElectionMsg::Leader { mid: self_id.clone() }.to_wire())
    }

    /// Starts (or restarts) an election at round `k` (0 unless resuming a
    /// later round after this node's own probe has circled once).
    /// A ring of size 1 (no neighbours but self) declares leadership
    /// immediately and is handled by the caller before calling `start`.
    pub fn start(&mut self, self_id: &NodeId, neighbours: (NodeId, NodeId), k: u32) -> Vec<Action> {
        self.in_progress = true;
        self.round = k;
        self.reply_count = 0;

        let (left, right) = neighbours;
        if left == *self_id && right == *self_id {
            self.in_progress = false;
            return vec![];
        }
        let msg = Self::probe_message(self_id, k, 1);
        vec![
            Action::SendToPeer { to: left, msg: msg.clone() },
            Action::SendToPeer { to: right, msg },
        ]
    }

    /// Handles an inbound ELECTION message arriving from `from` (the
    /// sender's peer-to-peer connection, which by construction is always a
    /// current ring neighbour while a probe is in flight).
    ///
    /// `ring_len` is the current number of nodes on the ring, used only to
    /// decide whether a round's `2^k` has covered the whole ring.
    pub fn handle(
        &mut self,
        self_id: &NodeId,
        neighbours: (NodeId, NodeId),
        ring_len: usize,
        from: &NodeId,
        election: ElectionMsg,
    ) -> Result<(Vec<Action>, Option<LeaderOutcome>), ElectionError> {
        let (left, right) = neighbours;
        let opposite_of = |arrived_from: &str| -> Option<NodeId> {
            if arrived_from == left {
                Some(right.clone())
            } else if arrived_from == right {
                Some(left.clone())
            } else {
                None
            }
        };

        match election {
            ElectionMsg::Probe { mid, k, d } => {
                let max_d = 1u32 << k.min(31);
                if d > max_d {
                    return Err(ElectionError::InvalidHop { d, k });
                }
                if *self_id < mid && d < max_d {
                    let Some(next) = opposite_of(from) else {
                        return Ok((vec![], None));
                    };
                    let msg = Self::probe_message(&mid, k, d + 1);
                    Ok((vec![Action::SendToPeer { to: next, msg }], None))
                } else if *self_id < mid && d == max_d {
                    // send the reply back along the arriving edge
                    let msg = Self::reply_message(self_id, &mid, k);
                    Ok((vec![Action::SendToPeer { to: from.clone(), msg }], None))
                } else if *self_id == mid {
                    // The probe has circled back to its own initiator
                    // without ever being swallowed by a larger id: this
                    // node is the max on the ring. Declare leadership
                    // immediately rather than waiting on a reply count —
                    // on a ring collapsed to two distinct edges sharing one
                    // physical neighbour (N=2), no reply for this round
                    // would otherwise ever arrive.
                    self.in_progress = false;
                    self.round = 0;
                    self.reply_count = 0;
                    Ok((vec![], Some(LeaderOutcome { leader: self_id.clone() })))
                } else {
                    // self_id > mid: swallow the probe.
                    Ok((vec![], None))
                }
            }
            ElectionMsg::Reply { mid, k } => {
                if *self_id != mid {
                    let Some(next) = opposite_of(from) else {
                        return Ok((vec![], None));
                    };
                    let msg = Self::reply_message(self_id, &mid, k);
                    Ok((vec![Action::SendToPeer { to: next, msg }], None))
                } else {
                    self.reply_count += 1;
                    if self.reply_count < 2 {
                        return Ok((vec![], None));
                    }
                    self.reply_count = 0;
                    let max_d = 1u32 << k.min(31);
                    if (max_d as usize) >= ring_len {
                        self.in_progress = false;
                        self.round = 0;
                        Ok((vec![], Some(LeaderOutcome { leader: self_id.clone() })))
                    } else {
                        let actions = self.start(self_id, (left, right), k + 1);
                        Ok((actions, None))
                    }
                }
            }
            ElectionMsg::Leader { mid } => {
                self.in_progress = false;
                self.round = 0;
                self.reply_count = 0;
                Ok((vec![], Some(LeaderOutcome { leader: mid })))
            }
        }
    }

    /// Side effects of this node declaring itself leader: announce to every
    /// peer over TCP (see DESIGN.md for why UDP is not used here) and
    /// remove self from the ring by asking its two former neighbours to
    /// adopt each other.
    pub fn become_leader_actions(self_id: &NodeId, neighbours: (NodeId, NodeId)) -> Vec<Action> {
        let mut actions = vec![Action::BroadcastToPeers { msg: Self::leader_message(self_id) }];
        let (left, right) = neighbours;
        if left != *self_id && right != *self_id {
            let to_left = Message::new(MessageType::UpdateNeighbour, self_id.clone())
                .with_content(NeighbourUpdate { side: NeighbourSide::Right, id: right.clone() }.to_wire());
            let to_right = Message::new(MessageType::UpdateNeighbour, self_id.clone())
                .with_content(NeighbourUpdate { side: NeighbourSide::Left, id: left.clone() }.to_wire());
            actions.push(Action::SendToPeer { to: left, msg: to_left });
            actions.push(Action::SendToPeer { to: right, msg: to_right });
        }
        actions
    }
}

/// A leader has just been determined, either because this node declared
/// itself leader or because a `Leader` announcement arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderOutcome {
    pub leader: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_node_election_elects_greater_id() {
        let ab = ("B".to_string(), "B".to_string());
        let ba = ("A".to_string(), "A".to_string());

        let mut a = ElectionState::new();
        let start_actions = a.start(&"A".to_string(), ab.clone(), 0);
        assert_eq!(start_actions.len(), 2);

        let mut b = ElectionState::new();
        let (actions, outcome) = b
            .handle(
                &"B".to_string(),
                ba.clone(),
                2,
                &"A".to_string(),
                ElectionMsg::Probe { mid: "A".to_string(), k: 0, d: 1 },
            )
            .unwrap();
        assert!(actions.is_empty());
        assert!(outcome.is_none());

        let mut b2 = ElectionState::new();
        let b_start = b2.start(&"B".to_string(), ba.clone(), 0);
        assert_eq!(b_start.len(), 2);

        let mut a2 = ElectionState::new();
        let (reply_actions, outcome) = a2
            .handle(
                &"A".to_string(),
                ab.clone(),
                2,
                &"B".to_string(),
                ElectionMsg::Probe { mid: "B".to_string(), k: 0, d: 1 },
            )
            .unwrap();
        assert_eq!(reply_actions.len(), 1);
        assert!(outcome.is_none());

        // Both replies arrive back at B; ring has 2 members so max_d=1 >= 2
        // is false (1 < 2), so B advances to round 1 rather than declaring
        // leadership yet.
        let (_, outcome1) = b2
            .handle(&"B".to_string(), ba.clone(), 2, &"A".to_string(), ElectionMsg::Reply { mid: "B".to_string(), k: 0 })
            .unwrap();
        assert!(outcome1.is_none());
        let (round2_actions, outcome2) = b2
            .handle(&"B".to_string(), ba.clone(), 2, &"A".to_string(), ElectionMsg::Reply { mid: "B".to_string(), k: 0 })
            .unwrap();
        assert!(outcome2.is_none());
        assert_eq!(round2_actions.len(), 2); // round-1 probes launched

        // Round 1: A forwards B's probe (d=1 < 2^1=2) back to B itself
        // (its only neighbour); B then sees its own mid arrive as a Probe.
        let (fwd, outcome3) = a2
            .handle(&"A".to_string(), ab.clone(), 2, &"B".to_string(), ElectionMsg::Probe { mid: "B".to_string(), k: 1, d: 1 })
            .unwrap();
        assert_eq!(fwd.len(), 1);
        assert!(outcome3.is_none());

        // That forwarded probe lands back at B as its own mid: on a 2-node
        // ring the two logical edges collapse onto the same physical
        // neighbour, so no round-1 Reply would ever arrive — the returning
        // Probe itself is what proves B's id survived the whole ring.
        let (final_actions, outcome4) = b2
            .handle(&"B".to_string(), ba.clone(), 2, &"A".to_string(), ElectionMsg::Probe { mid: "B".to_string(), k: 1, d: 2 })
            .unwrap();
        assert!(final_actions.is_empty());
        assert_eq!(outcome4, Some(LeaderOutcome { leader: "B".to_string() }));
    }

    #[test]
    fn singleton_ring_is_not_eligible_for_election() {
        let mut a = ElectionState::new();
        let actions = a.start(&"A".to_string(), ("A".to_string(), "A".to_string()), 0);
        assert!(actions.is_empty());
        assert!(!a.in_progress);
    }

    #[test]
    fn wire_roundtrip() {
        let msg = ElectionMsg::Probe { mid: "A".to_string(), k: 1, d: 2 };
        let s = msg.to_wire();
        let back = ElectionMsg::from_wire(&s).unwrap();
        assert_eq!(msg, back);
    }
}
