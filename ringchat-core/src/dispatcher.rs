//! `NodeState`: the per-node orchestrator tying together membership, the
//! ring, election, the failure detector, room storage and the directory.
//!
//! Every component here is a plain method on one struct rather than a
//! component holding a back-reference to its owning node, so nothing here
//! touches a socket: every method returns the `Vec<Action>` the caller's
//! transport layer must execute.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::Action;
use crate::election::{ElectionMsg, ElectionState, LeaderOutcome};
use crate::failure_detector::{FailureDetector, MonitoredId};
use crate::membership::Membership;
use crate::metadata::{MetadataMsg, MetadataStore};
use crate::multicast::Room;
use crate::protocol::{Message, MessageType, NodeId};
use crate::ring::{NeighbourSide, NeighbourUpdate, RingView};
use crate::server_state::ServerState;

/// The `{ip, port}` JSON payload carried by SERVER_DISCOVERY and SERVER_JOIN
/// content — the only place a peer's dialable address is communicated,
/// since TCP peer addresses on an accepted socket are ephemeral, not the
/// peer's listening port.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Endpoint {
    ip: String,
    port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AvailableRoomsPayload {
    rooms: HashMap<String, NodeId>,
    servers: HashMap<NodeId, Endpoint>,
}

pub struct NodeState {
    pub server_id: NodeId,
    pub ip: String,
    pub port: u16,
    pub state: ServerState,
    pub leader_id: Option<NodeId>,
    membership: Membership,
    peer_endpoints: HashMap<NodeId, (String, u16)>,
    ring: RingView,
    left_override: Option<NodeId>,
    right_override: Option<NodeId>,
    election: ElectionState,
    failure_detector: FailureDetector,
    rooms: HashMap<String, Room>,
    directory: MetadataStore,
}

impl NodeState {
    pub fn new(server_id: impl Into<NodeId>, ip: impl Into<String>, port: u16) -> Self {
        let server_id = server_id.into();
        let ring = RingView::from_members([server_id.clone()]);
        Self {
            server_id,
            ip: ip.into(),
            port,
            state: ServerState::Looking,
            leader_id: None,
            membership: Membership::new(),
            peer_endpoints: HashMap::new(),
            ring,
            left_override: None,
            right_override: None,
            election: ElectionState::new(),
            failure_detector: FailureDetector::new(),
            rooms: HashMap::new(),
            directory: MetadataStore::new(),
        }
    }

    /// The datagram a freshly-started node broadcasts once on DISCOVERY_PORT.
    pub fn initial_discovery_action(&self) -> Action {
        let content = serde_json::to_string(&Endpoint { ip: self.ip.clone(), port: self.port })
            .expect("Endpoint always serializes");
        Action::BroadcastUdp {
            msg: Message::new(MessageType::ServerDiscovery, self.server_id.clone()).with_content(content),
        }
    }

    /// Reserves room-map capacity for an expected `num_rooms`, the CLI's
    /// optional `[num_rooms]` argument. Rooms are still created lazily on
    /// first JOIN_ROOM — this only avoids reallocation for a node that
    /// expects to end up hosting many of them.
    pub fn with_room_capacity_hint(mut self, num_rooms: usize) -> Self {
        self.rooms.reserve(num_rooms);
        self
    }

    pub fn ring(&self) -> &RingView {
        &self.ring
    }

    pub fn rooms(&self) -> &HashMap<String, Room> {
        &self.rooms
    }

    pub fn directory(&self) -> &MetadataStore {
        &self.directory
    }

    /// Recomputes the ring from current membership, excluding the leader
    /// (who has logically left the ring on election) and clears any
    /// standing neighbour overrides — a fresh ring view always supersedes
    /// a leader-pushed hint.
    fn recompute_ring(&mut self) {
        let mut ids: Vec<NodeId> = self.membership.peers().cloned().collect();
        ids.push(self.server_id.clone());
        if let Some(leader) = &self.leader_id {
            ids.retain(|id| id != leader);
        }
        self.ring = RingView::from_members(ids);
        self.left_override = None;
        self.right_override = None;
    }

    /// The neighbours this node currently treats as authoritative: the
    /// ring's derived pair, overridden by any still-pending UPDATE_NEIGHBOUR
    /// the leader pushed ahead of this node's own ring recomputation.
    fn effective_neighbours(&self) -> Option<(NodeId, NodeId)> {
        let (left, right) = self.ring.neighbours(&self.server_id)?;
        Some((
            self.left_override.clone().unwrap_or(left),
            self.right_override.clone().unwrap_or(right),
        ))
    }

    /// Rebuilds the failure-detector's watch set from the current role,
    /// from scratch each time. Suspended during LOOKING/ELECTION_IN_PROGRESS.
    fn sync_failure_detector_watches(&mut self, now: Instant) {
        self.failure_detector = FailureDetector::new();
        if !self.state.is_election_suspended() {
            match self.state {
                ServerState::Leader => {
                    for peer in self.membership.peers() {
                        self.failure_detector.watch(MonitoredId::server(peer.clone()), now);
                    }
                }
                ServerState::Follower => {
                    if let Some((left, right)) = self.effective_neighbours() {
                        if left != self.server_id {
                            self.failure_detector.watch(MonitoredId::server(left.clone()), now);
                        }
                        if right != self.server_id && right != left {
                            self.failure_detector.watch(MonitoredId::server(right), now);
                        }
                    }
                    if let Some(leader) = self.leader_id.clone() {
                        if leader != self.server_id {
                            self.failure_detector.watch(MonitoredId::server(leader), now);
                        }
                    }
                }
                ServerState::Looking | ServerState::ElectionInProgress => unreachable!(),
            }
        }
        for room in self.rooms.values() {
            for member in &room.members {
                self.failure_detector.watch(MonitoredId::client(member.clone()), now);
            }
        }
    }

    // ---- election -----------------------------------------------------

    /// Starts a fresh election, or declares immediate leadership on a ring
    /// of size 1 (not eligible for election, sole node wins).
    fn start_election(&mut self, now: Instant) -> Vec<Action> {
        if self.ring.len() <= 1 {
            let actions = self.declare_self_leader((self.server_id.clone(), self.server_id.clone()));
            self.sync_failure_detector_watches(now);
            return actions;
        }
        self.state = ServerState::ElectionInProgress;
        self.leader_id = None;
        let Some(neighbours) = self.effective_neighbours() else { return vec![] };
        self.election.start(&self.server_id, neighbours, 0)
    }

    /// Drives a node that is still LOOKING into an election once its
    /// startup grace period has passed without hearing from any peer
    /// (its initial broadcast has had a chance to draw a SERVER_DISCOVERY
    /// reply). On a ring of one this resolves immediately
    /// to self-leadership, so a genuinely solo deployment still converges.
    /// A no-op once the node has already left LOOKING.
    pub fn bootstrap(&mut self, now: Instant) -> Vec<Action> {
        if self.state != ServerState::Looking {
            return vec![];
        }
        self.start_election(now)
    }

    fn declare_self_leader(&mut self, neighbours: (NodeId, NodeId)) -> Vec<Action> {
        self.state = ServerState::Leader;
        self.leader_id = Some(self.server_id.clone());
        let actions = ElectionState::become_leader_actions(&self.server_id, neighbours);
        self.recompute_ring();
        actions
    }

    fn handle_election(&mut self, from: &NodeId, msg: ElectionMsg, now: Instant) -> Vec<Action> {
        let Some(neighbours) = self.effective_neighbours() else { return vec![] };
        match self.election.handle(&self.server_id, neighbours.clone(), self.ring.len(), from, msg) {
            Ok((mut actions, outcome)) => {
                if let Some(LeaderOutcome { leader }) = outcome {
                    if leader == self.server_id {
                        actions.extend(self.declare_self_leader(neighbours));
                    } else {
                        self.leader_id = Some(leader);
                        self.state = ServerState::Follower;
                        self.recompute_ring();
                    }
                    self.sync_failure_detector_watches(now);
                }
                actions
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed election message");
                vec![]
            }
        }
    }

    // ---- heartbeats & failure ------------------------------------------

    /// Emits this period's heartbeats for the current role. A no-op while
    /// an election is in flight or the node hasn't joined a ring yet.
    pub fn tick_heartbeat(&self) -> Vec<Action> {
        if self.state.is_election_suspended() {
            return vec![];
        }
        let hb = |content: &'static str| {
            Message::new(MessageType::Heartbeat, self.server_id.clone()).with_content(content)
        };
        let mut actions = Vec::new();
        match self.state {
            ServerState::Leader => {
                for peer in self.membership.peers() {
                    actions.push(Action::SendToPeer { to: peer.clone(), msg: hb("Server Heartbeat") });
                }
            }
            ServerState::Follower => {
                if let Some((left, right)) = self.effective_neighbours() {
                    if left != self.server_id {
                        actions.push(Action::SendToPeer { to: left.clone(), msg: hb("Server Heartbeat") });
                    }
                    if right != self.server_id && right != left {
                        actions.push(Action::SendToPeer { to: right, msg: hb("Server Heartbeat") });
                    }
                }
                if let Some(leader) = self.leader_id.clone() {
                    if leader != self.server_id {
                        actions.push(Action::SendToPeer { to: leader, msg: hb("Server Heartbeat") });
                    }
                }
            }
            ServerState::Looking | ServerState::ElectionInProgress => unreachable!(),
        }
        actions
    }

    fn handle_heartbeat(&mut self, from: &NodeId, content: &str, now: Instant) -> Vec<Action> {
        match content {
            "Server Heartbeat" => self.failure_detector.reset(&MonitoredId::server(from.clone()), now),
            "Client Heartbeat" => self.failure_detector.reset(&MonitoredId::client(from.clone()), now),
            other => warn!(content = other, "unrecognised heartbeat content"),
        }
        vec![]
    }

    /// Checks every monitored timer and drives repair/re-election for
    /// whatever has timed out.
    pub fn handle_timeouts(&mut self, now: Instant) -> Vec<Action> {
        let timed_out = self.failure_detector.check_timeouts(now);
        let mut actions = Vec::new();
        for mid in timed_out {
            match mid.kind {
                crate::failure_detector::MonitoredKind::Server => {
                    actions.extend(self.handle_peer_failure(&mid.id, now));
                }
                crate::failure_detector::MonitoredKind::Client => {
                    actions.extend(self.handle_client_failure(&mid.id));
                }
            }
        }
        actions
    }

    /// Leader failure triggers re-election; a follower failure detected by
    /// the leader triggers ring repair; a follower failure detected by
    /// another follower is just a dropped connection — the leader's own
    /// detection drives the repair.
    fn handle_peer_failure(&mut self, failed: &NodeId, now: Instant) -> Vec<Action> {
        let mut actions = vec![Action::DropPeerConnection { id: failed.clone() }];
        let is_leader_failure = self.leader_id.as_deref() == Some(failed.as_str());

        if is_leader_failure {
            self.membership.remove_peer(failed);
            self.peer_endpoints.remove(failed);
            self.leader_id = None;
            self.recompute_ring();
            actions.extend(self.start_election(now));
        } else if self.state == ServerState::Leader {
            if let Some((left_of_failed, right_of_failed)) = self.ring.neighbours(failed) {
                let to_left = Message::new(MessageType::UpdateNeighbour, self.server_id.clone()).with_content(
                    NeighbourUpdate { side: NeighbourSide::Right, id: right_of_failed.clone() }.to_wire(),
                );
                let to_right = Message::new(MessageType::UpdateNeighbour, self.server_id.clone()).with_content(
                    NeighbourUpdate { side: NeighbourSide::Left, id: left_of_failed.clone() }.to_wire(),
                );
                actions.push(Action::SendToPeer { to: left_of_failed, msg: to_left });
                actions.push(Action::SendToPeer { to: right_of_failed, msg: to_right });
            }
            self.membership.remove_peer(failed);
            self.peer_endpoints.remove(failed);
            self.recompute_ring();
        }
        self.sync_failure_detector_watches(now);
        actions
    }

    fn handle_client_failure(&mut self, client_id: &NodeId) -> Vec<Action> {
        for room in self.rooms.values_mut() {
            room.remove_member(client_id);
        }
        vec![Action::DropClientConnection { id: client_id.clone() }]
    }

    fn handle_update_neighbour(&mut self, content: &str) -> Vec<Action> {
        match NeighbourUpdate::from_wire(content) {
            Some(NeighbourUpdate { side: NeighbourSide::Left, id }) => self.left_override = Some(id),
            Some(NeighbourUpdate { side: NeighbourSide::Right, id }) => self.right_override = Some(id),
            None => warn!(content, "unrecognised UPDATE_NEIGHBOUR content"),
        }
        vec![]
    }

    // ---- membership & discovery -----------------------------------------

    /// Common tail of both "I dialed out after seeing a SERVER_DISCOVERY"
    /// and "a peer just sent me SERVER_JOIN": records the peer, recomputes
    /// the ring, pushes a directory snapshot if this node is leader (the
    /// on-demand SYNC case — see DESIGN.md), and triggers a fresh election.
    fn handle_peer_registered(&mut self, id: NodeId, ip: String, port: u16, now: Instant) -> Vec<Action> {
        if id == self.server_id {
            return vec![];
        }
        let first_seen = self.membership.note_peer(id.clone());
        self.peer_endpoints.insert(id.clone(), (ip, port));
        if !first_seen {
            return vec![];
        }
        self.recompute_ring();
        let mut actions = Vec::new();
        if self.leader_id.as_deref() == Some(self.server_id.as_str()) {
            let content = MetadataMsg::SyncRooms { snapshot: self.directory.snapshot() }.to_wire();
            actions.push(Action::SendToPeer {
                to: id,
                msg: Message::new(MessageType::MetadataUpdate, self.server_id.clone()).with_content(content),
            });
        }
        actions.extend(self.start_election(now));
        actions
    }

    fn handle_server_discovery(&mut self, msg: &Message, now: Instant) -> Vec<Action> {
        if msg.sender_id == self.server_id {
            return vec![];
        }
        let Ok(ep) = serde_json::from_str::<Endpoint>(&msg.content) else {
            warn!(content = %msg.content, "malformed SERVER_DISCOVERY content");
            return vec![];
        };
        if self.membership.contains(&msg.sender_id) {
            return vec![];
        }
        let mut actions = self.handle_peer_registered(msg.sender_id.clone(), ep.ip.clone(), ep.port, now);
        if Membership::should_initiate_connection(&self.server_id, &msg.sender_id) {
            actions.push(Action::ConnectToPeer { ip: ep.ip, port: ep.port });
        }
        actions
    }

    fn handle_server_join(&mut self, msg: &Message, now: Instant) -> Vec<Action> {
        let Ok(ep) = serde_json::from_str::<Endpoint>(&msg.content) else {
            warn!(content = %msg.content, "malformed SERVER_JOIN content");
            return vec![];
        };
        self.handle_peer_registered(msg.sender_id.clone(), ep.ip, ep.port, now)
    }

    fn handle_discovery_request(&self, msg: &Message) -> Vec<Action> {
        let Some(addr) = msg.sender_addr else {
            warn!("DISCOVERY_REQUEST missing sender address");
            return vec![];
        };
        if self.leader_id.as_deref() == Some(self.server_id.as_str()) {
            vec![Action::SendUdp { to: addr, msg: self.available_rooms_message(addr) }]
        } else if let Some(leader) = &self.leader_id {
            let content = serde_json::to_string(&Endpoint { ip: addr.ip().to_string(), port: addr.port() })
                .expect("Endpoint always serializes");
            vec![Action::SendToPeer {
                to: leader.clone(),
                msg: Message::new(MessageType::AvailableRooms, self.server_id.clone()).with_content(content),
            }]
        } else {
            warn!("no leader known yet; dropping DISCOVERY_REQUEST");
            vec![]
        }
    }

    /// The leader handling a forwarded DISCOVERY_REQUEST from a follower,
    /// carried as an AVAILABLE_ROOMS message with the client's address.
    fn handle_forwarded_discovery(&self, msg: &Message) -> Vec<Action> {
        if self.leader_id.as_deref() != Some(self.server_id.as_str()) {
            warn!("received forwarded discovery request while not leader");
            return vec![];
        }
        let Ok(ep) = serde_json::from_str::<Endpoint>(&msg.content) else {
            warn!(content = %msg.content, "malformed forwarded discovery content");
            return vec![];
        };
        let Ok(addr) = format!("{}:{}", ep.ip, ep.port).parse::<SocketAddr>() else {
            return vec![];
        };
        vec![Action::SendUdp { to: addr, msg: self.available_rooms_message(addr) }]
    }

    fn available_rooms_message(&self, _client_addr: SocketAddr) -> Message {
        let servers: HashMap<NodeId, Endpoint> = self
            .peer_endpoints
            .iter()
            .map(|(id, (ip, port))| (id.clone(), Endpoint { ip: ip.clone(), port: *port }))
            .chain(std::iter::once((
                self.server_id.clone(),
                Endpoint { ip: self.ip.clone(), port: self.port },
            )))
            .collect();
        let payload = AvailableRoomsPayload { rooms: self.directory.snapshot(), servers };
        let content = serde_json::to_string(&payload).expect("payload always serializes");
        Message::new(MessageType::AvailableRooms, self.server_id.clone()).with_content(content)
    }

    // ---- rooms & metadata ------------------------------------------------

    fn handle_join_room(&mut self, msg: &Message, now: Instant) -> Vec<Action> {
        let is_new = !self.rooms.contains_key(&msg.room_id);
        let room = self
            .rooms
            .entry(msg.room_id.clone())
            .or_insert_with(|| Room::new(msg.room_id.clone(), self.server_id.clone()));
        room.add_member(msg.sender_id.clone());
        self.sync_failure_detector_watches(now);

        let mut actions = Vec::new();
        if is_new {
            self.directory.set_local(msg.room_id.clone(), self.server_id.clone());
            if self.leader_id.as_deref() != Some(self.server_id.as_str()) {
                if let Some(leader) = self.leader_id.clone() {
                    let content = MetadataMsg::UpdateRoom { room_id: msg.room_id.clone() }.to_wire();
                    actions.push(Action::SendToPeer {
                        to: leader,
                        msg: Message::new(MessageType::MetadataUpdate, self.server_id.clone())
                            .with_content(content),
                    });
                }
            }
        }
        actions
    }

    fn handle_leave_room(&mut self, msg: &Message) -> Vec<Action> {
        if let Some(room) = self.rooms.get_mut(&msg.room_id) {
            room.remove_member(&msg.sender_id);
        }
        vec![]
    }

    fn handle_chat(&mut self, msg: Message) -> Vec<Action> {
        let Some(room) = self.rooms.get_mut(&msg.room_id) else {
            warn!(room_id = %msg.room_id, "CHAT for unknown room; dropping");
            return vec![];
        };
        let delivered = room.handle_chat(msg);
        let members: Vec<NodeId> = room.members.iter().cloned().collect();
        let mut actions = Vec::new();
        for out in delivered {
            for member in &members {
                actions.push(Action::SendToClient { to: member.clone(), msg: out.clone() });
            }
        }
        actions
    }

    fn handle_metadata_update(&mut self, msg: &Message) -> Vec<Action> {
        match MetadataMsg::from_wire(&msg.content) {
            Some(MetadataMsg::UpdateRoom { room_id }) => {
                if self.leader_id.as_deref() == Some(self.server_id.as_str()) {
                    self.directory.apply_update(room_id, msg.sender_id.clone());
                    self.broadcast_sync_rooms()
                } else {
                    warn!("UPDATE_ROOM received while not leader; dropping");
                    vec![]
                }
            }
            Some(MetadataMsg::SyncRooms { snapshot }) => {
                self.directory.replace_snapshot(snapshot);
                vec![]
            }
            None => {
                warn!(content = %msg.content, "malformed METADATA_UPDATE content");
                vec![]
            }
        }
    }

    fn broadcast_sync_rooms(&self) -> Vec<Action> {
        let content = MetadataMsg::SyncRooms { snapshot: self.directory.snapshot() }.to_wire();
        self.membership
            .peers()
            .map(|peer| Action::SendToPeer {
                to: peer.clone(),
                msg: Message::new(MessageType::MetadataUpdate, self.server_id.clone())
                    .with_content(content.clone()),
            })
            .collect()
    }

    // ---- top-level dispatch ----------------------------------------------

    /// Routes an inbound message by type, returning whatever I/O the
    /// transport layer must now perform.
    pub fn dispatch(&mut self, msg: Message, now: Instant) -> Vec<Action> {
        match msg.kind {
            MessageType::Chat => self.handle_chat(msg),
            MessageType::JoinRoom => self.handle_join_room(&msg, now),
            MessageType::LeaveRoom => self.handle_leave_room(&msg),
            MessageType::ServerJoin => self.handle_server_join(&msg, now),
            MessageType::ClientJoin => vec![],
            MessageType::Election => match ElectionMsg::from_wire(&msg.content) {
                Ok(parsed) => self.handle_election(&msg.sender_id, parsed, now),
                Err(e) => {
                    warn!(error = %e, "dropping malformed ELECTION message");
                    vec![]
                }
            },
            MessageType::Heartbeat => self.handle_heartbeat(&msg.sender_id, &msg.content, now),
            MessageType::MetadataUpdate => self.handle_metadata_update(&msg),
            MessageType::UpdateNeighbour => self.handle_update_neighbour(&msg.content),
            MessageType::DiscoveryRequest => self.handle_discovery_request(&msg),
            MessageType::DiscoveryResponse => {
                warn!("server received client-bound DISCOVERY_RESPONSE; discarding");
                vec![]
            }
            MessageType::ServerDiscovery => self.handle_server_discovery(&msg, now),
            MessageType::AvailableRooms => self.handle_forwarded_discovery(&msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exchanges SERVER_DISCOVERY both ways — registering each side's peer,
    /// recomputing the ring, and starting a fresh election on first
    /// sighting — and returns the combined actions.
    fn discover(a: &mut NodeState, b: &mut NodeState, now: Instant) -> Vec<Action> {
        let ep_a = Endpoint { ip: a.ip.clone(), port: a.port };
        let ep_b = Endpoint { ip: b.ip.clone(), port: b.port };
        let from_a = Message::new(MessageType::ServerDiscovery, a.server_id.clone())
            .with_content(serde_json::to_string(&ep_a).unwrap());
        let from_b = Message::new(MessageType::ServerDiscovery, b.server_id.clone())
            .with_content(serde_json::to_string(&ep_b).unwrap());
        let mut actions = b.dispatch(from_a, now);
        actions.extend(a.dispatch(from_b, now));
        actions
    }

    fn drain_into(actions: Vec<Action>, pending: &mut Vec<(NodeId, Message)>) {
        for act in actions {
            if let Action::SendToPeer { to, msg } = act {
                pending.push((to, msg));
            }
        }
    }

    /// A two-node election elects the lexicographically greater id.
    #[test]
    fn two_node_election_elects_greater_id() {
        let now = Instant::now();
        let mut a = NodeState::new("A", "127.0.0.1", 9001);
        let mut b = NodeState::new("B", "127.0.0.1", 9002);

        let initial = discover(&mut a, &mut b, now);
        assert!(initial.iter().any(|act| matches!(act, Action::ConnectToPeer { .. })));

        let mut pending: Vec<(NodeId, Message)> = Vec::new();
        drain_into(initial, &mut pending);

        let mut guard = 0;
        while let Some((to, msg)) = pending.pop() {
            guard += 1;
            assert!(guard < 100, "election did not converge");
            let node = if to == "A" { &mut a } else { &mut b };
            let out = node.dispatch(msg, now);
            drain_into(out, &mut pending);
        }

        assert_eq!(a.leader_id.as_deref(), Some("B"));
        assert_eq!(b.leader_id.as_deref(), Some("B"));
        assert_eq!(a.state, ServerState::Follower);
        assert_eq!(b.state, ServerState::Leader);
    }

    /// A follower forwards discovery to the leader, who replies over UDP.
    #[test]
    fn follower_forwards_discovery_to_leader() {
        let now = Instant::now();
        let mut leader = NodeState::new("B", "127.0.0.1", 9002);
        leader.state = ServerState::Leader;
        leader.leader_id = Some("B".to_string());
        leader.peer_endpoints.insert("A".to_string(), ("127.0.0.1".to_string(), 9001));

        let mut follower = NodeState::new("A", "127.0.0.1", 9001);
        follower.state = ServerState::Follower;
        follower.leader_id = Some("B".to_string());

        let client_addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut request = Message::new(MessageType::DiscoveryRequest, "client-1".to_string());
        request.sender_addr = Some(client_addr);

        let actions = follower.handle_discovery_request(&request);
        assert_eq!(actions.len(), 1);
        let Action::SendToPeer { to, msg } = &actions[0] else { panic!("expected forward to leader") };
        assert_eq!(to, "B");

        let reply_actions = leader.dispatch(msg.clone(), now);
        assert_eq!(reply_actions.len(), 1);
        assert!(matches!(&reply_actions[0], Action::SendUdp { to, .. } if *to == client_addr));
    }

    /// A ring of one declares leadership without running an election.
    #[test]
    fn singleton_node_declares_itself_leader_immediately() {
        let mut solo = NodeState::new("A", "127.0.0.1", 9001);
        let actions = solo.start_election(Instant::now());
        assert_eq!(solo.state, ServerState::Leader);
        assert_eq!(solo.leader_id.as_deref(), Some("A"));
        // no peers, so become_leader_actions only broadcasts (to nobody) —
        // no UPDATE_NEIGHBOUR since the single neighbour is itself.
        assert!(actions.iter().all(|a| matches!(a, Action::BroadcastToPeers { .. })));
    }

    /// Losing the leader moves a follower back into election.
    #[test]
    fn leader_timeout_triggers_reelection() {
        let now = Instant::now();
        let mut a = NodeState::new("A", "127.0.0.1", 9001);
        a.membership.note_peer("C".to_string());
        a.peer_endpoints.insert("C".to_string(), ("127.0.0.1".to_string(), 9003));
        a.leader_id = Some("C".to_string());
        a.state = ServerState::Follower;
        a.recompute_ring();
        a.sync_failure_detector_watches(now);

        let later = now + crate::failure_detector::FAILURE_THRESHOLD + std::time::Duration::from_millis(1);
        let actions = a.handle_timeouts(later);
        assert!(actions.iter().any(|act| matches!(act, Action::DropPeerConnection { id } if id == "C")));
        assert_eq!(a.leader_id, None);
        // alone now (only A left), so it should have declared itself leader
        assert_eq!(a.state, ServerState::Leader);
        assert_eq!(a.leader_id.as_deref(), Some("A"));
    }
}
