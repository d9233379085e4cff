//! Entry point for a single ringchat server node: wires `ringchat-core`'s
//! transport-agnostic `NodeState` to real TCP/UDP sockets via
//! `ringchat-transport`.
//!
//! Usage: `ringchat-server <tcp_port> [num_rooms]`

mod dial_table;

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ringchat_core::failure_detector::HEARTBEAT_PERIOD;
use ringchat_core::{Action, Message, MessageType, NodeState, ServerState};
use ringchat_transport::{ConnectionManager, Inbound, TcpUdpTransport, Transport, DISCOVERY_PORT};

use dial_table::DialTable;

/// The `{ip, port}` JSON payload carried by SERVER_DISCOVERY/SERVER_JOIN
/// content. Mirrors the private `Endpoint` struct inside
/// `ringchat-core`'s dispatcher — duplicated here because the binary only
/// ever needs to read/construct it at the edges, never inside the state
/// machine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Endpoint {
    ip: String,
    port: u16,
}

#[derive(Parser, Debug)]
#[command(name = "ringchat-server")]
#[command(about = "A ringchat coordination-plane server node", long_about = None)]
struct Args {
    /// TCP port this node listens on for peer and client connections.
    tcp_port: u16,
    /// Expected number of rooms this node will end up hosting, used only
    /// as a capacity hint.
    num_rooms: Option<usize>,
}

/// Startup grace period: how long a node waits after its initial
/// SERVER_DISCOVERY broadcast before assuming it is alone and declaring
/// itself leader of a ring of one.
const BOOTSTRAP_GRACE: std::time::Duration = std::time::Duration::from_secs(3);

/// A running node's externally-visible identity, returned once its accept
/// loop, discovery loop, heartbeat loop and dispatch loop are all spawned
/// and its initial SERVER_DISCOVERY broadcast has gone out.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub server_id: String,
    pub ip: String,
    pub tcp_port: u16,
    pub discovery_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let handle = run_node(args.tcp_port, DISCOVERY_PORT, args.num_rooms, BOOTSTRAP_GRACE).await?;
    info!(server_id = %handle.server_id, ip = %handle.ip, tcp_port = handle.tcp_port, "ringchat server node running");

    std::future::pending::<()>().await;
    Ok(())
}

/// Boots one node: binds its TCP listener and UDP discovery socket,
/// spawns its accept/discovery/heartbeat/dispatch loops, sends the initial
/// SERVER_DISCOVERY broadcast, and returns immediately. `tcp_port: 0` and
/// `discovery_port: 0` bind to OS-assigned ephemeral ports, which is how
/// tests run multiple nodes in one process without colliding on the
/// well-known [`DISCOVERY_PORT`].
async fn run_node(
    tcp_port: u16,
    discovery_port: u16,
    num_rooms: Option<usize>,
    bootstrap_grace: std::time::Duration,
) -> Result<NodeHandle> {
    let server_id = Uuid::new_v4().to_string();
    let local_ip = local_ip_address()?;

    let listener = TcpListener::bind(("0.0.0.0", tcp_port))
        .await
        .with_context(|| format!("binding TCP listener on port {tcp_port}"))?;
    let tcp_port = listener.local_addr().context("reading bound TCP listener address")?.port();
    let udp_socket = ringchat_transport::udp::bind_discovery_socket(discovery_port)
        .await
        .with_context(|| format!("binding UDP discovery socket on port {discovery_port}"))?;
    let discovery_port = udp_socket.local_addr().context("reading bound UDP socket address")?.port();

    let connections = ConnectionManager::new(server_id.clone());
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(1024);
    let transport = Arc::new(TcpUdpTransport::new(connections, udp_socket, inbound_tx.clone()));
    let dial_table = Arc::new(DialTable::new());

    let mut node = NodeState::new(server_id.clone(), local_ip.clone(), tcp_port);
    if let Some(num_rooms) = num_rooms {
        node = node.with_room_capacity_hint(num_rooms);
    }
    let node = Arc::new(Mutex::new(node));

    // Accept loop: hands every inbound TCP connection to the connection
    // manager, which reads its handshake frame and registers it.
    {
        let transport = transport.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => transport.accept(stream, peer_addr),
                    Err(e) => warn!(error = %e, "TCP accept failed"),
                }
            }
        });
    }

    // UDP recv loop: every discovery datagram becomes an Inbound::Udp event.
    {
        let transport = transport.clone();
        let inbound_tx = inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match transport.recv_udp().await {
                    Ok(Some(msg)) => {
                        if inbound_tx.send(Inbound::Udp { msg }).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => warn!(error = %e, "UDP recv failed"),
                }
            }
        });
    }

    // Heartbeat ticker: drives both outbound heartbeats and timeout checks
    // on a fixed period.
    {
        let inbound_tx = inbound_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_PERIOD);
            loop {
                ticker.tick().await;
                if inbound_tx.send(Inbound::Tick).await.is_err() {
                    break;
                }
            }
        });
    }

    // Central dispatch loop, including the solo-node bootstrap timer.
    {
        let node = node.clone();
        let transport = transport.clone();
        let dial_table = dial_table.clone();
        let server_id = server_id.clone();
        let local_ip = local_ip.clone();
        tokio::spawn(async move {
            run_dispatch_loop(inbound_rx, node, transport, dial_table, server_id, local_ip, tcp_port, bootstrap_grace)
                .await;
        });
    }

    // Initial SERVER_DISCOVERY broadcast.
    let action = node.lock().await.initial_discovery_action();
    execute_actions(vec![action], &server_id, &local_ip, tcp_port, &transport, &dial_table).await;

    Ok(NodeHandle { server_id, ip: local_ip, tcp_port, discovery_port })
}

/// The node's central event loop: drains `inbound_rx`, dispatches each
/// event against `node`, and runs the solo-node bootstrap timer once.
/// Runs until `inbound_rx` is closed, which in practice is the lifetime of
/// the process (or, in a test, of the spawned task).
#[allow(clippy::too_many_arguments)]
async fn run_dispatch_loop(
    mut inbound_rx: mpsc::Receiver<Inbound>,
    node: Arc<Mutex<NodeState>>,
    transport: Arc<TcpUdpTransport>,
    dial_table: Arc<DialTable>,
    server_id: String,
    local_ip: String,
    tcp_port: u16,
    bootstrap_grace: std::time::Duration,
) {
    let mut bootstrap_timer = Box::pin(tokio::time::sleep(bootstrap_grace));
    let mut bootstrapped = false;

    loop {
        tokio::select! {
            event = inbound_rx.recv() => {
                let Some(event) = event else { break };
                let actions = handle_inbound(event, &node, &dial_table).await;
                execute_actions(actions, &server_id, &local_ip, tcp_port, &transport, &dial_table).await;
            }
            _ = &mut bootstrap_timer, if !bootstrapped => {
                bootstrapped = true;
                let mut guard = node.lock().await;
                if guard.state == ServerState::Looking {
                    let actions = guard.bootstrap(Instant::now());
                    drop(guard);
                    execute_actions(actions, &server_id, &local_ip, tcp_port, &transport, &dial_table).await;
                }
            }
        }
    }
}

/// Dispatches one `Inbound` event against the node's state machine,
/// recording any SERVER_DISCOVERY sender's dialable address in the dial
/// table first so that a resulting `Action::ConnectToPeer` can be resolved
/// back to a node id when it's executed.
async fn handle_inbound(event: Inbound, node: &Arc<Mutex<NodeState>>, dial_table: &Arc<DialTable>) -> Vec<Action> {
    let now = Instant::now();
    match event {
        Inbound::Peer { from: _, msg } | Inbound::Client { from: _, msg } => {
            node.lock().await.dispatch(msg, now)
        }
        Inbound::Udp { msg } => {
            if msg.kind == MessageType::ServerDiscovery {
                if let Ok(ep) = serde_json::from_str::<Endpoint>(&msg.content) {
                    dial_table.remember(ep.ip, ep.port, msg.sender_id.clone());
                }
            }
            node.lock().await.dispatch(msg, now)
        }
        Inbound::PeerClosed { id } | Inbound::ClientClosed { id } => {
            // Connection already torn down on the transport side; the
            // failure detector's own timeout will drive ring repair and
            // re-election once the missing heartbeats are noticed — a
            // dropped socket is not itself authoritative.
            let _ = id;
            vec![]
        }
        Inbound::Tick => {
            let mut guard = node.lock().await;
            let mut actions = guard.tick_heartbeat();
            actions.extend(guard.handle_timeouts(now));
            actions
        }
    }
}

/// Executes a batch of `Action`s against the real transport.
async fn execute_actions(
    actions: Vec<Action>,
    self_id: &str,
    self_ip: &str,
    self_port: u16,
    transport: &Arc<TcpUdpTransport>,
    dial_table: &Arc<DialTable>,
) {
    for action in actions {
        match action {
            Action::SendToPeer { to, msg } => transport.send_to_peer(&to, msg).await,
            Action::SendToClient { to, msg } => transport.send_to_client(&to, msg).await,
            Action::BroadcastToPeers { msg } => transport.broadcast_to_peers(msg).await,
            Action::SendUdp { to, msg } => {
                if let Err(e) = transport.send_udp(to, &msg).await {
                    warn!(error = %e, %to, "send_udp failed");
                }
            }
            Action::BroadcastUdp { msg } => {
                if let Err(e) = transport.broadcast_udp(&msg).await {
                    warn!(error = %e, "broadcast_udp failed");
                }
            }
            Action::ConnectToPeer { ip, port } => {
                let Some(peer_id) = dial_table.lookup(&ip, port) else {
                    warn!(%ip, port, "ConnectToPeer with no known id in dial table; dropping");
                    continue;
                };
                if let Err(e) = transport.connect_to_peer(peer_id.clone(), &ip, port).await {
                    warn!(error = %e, %ip, port, "failed to connect to peer");
                    continue;
                }
                let content = serde_json::to_string(&Endpoint { ip: self_ip.to_string(), port: self_port })
                    .expect("Endpoint always serializes");
                let join = Message::new(MessageType::ServerJoin, self_id.to_string()).with_content(content);
                transport.send_to_peer(&peer_id, join).await;
            }
            Action::DropPeerConnection { id } => transport.drop_peer(&id).await,
            Action::DropClientConnection { id } => transport.drop_client(&id).await,
        }
    }
}

/// Determines this host's non-loopback IP by "connecting" a UDP socket to
/// a public address without sending any traffic — the standard trick for
/// reading the local route's source address when no interface was
/// specified on the command line.
fn local_ip_address() -> Result<String> {
    let socket = StdUdpSocket::bind("0.0.0.0:0").context("binding probe socket")?;
    socket.connect("8.8.8.8:80").context("connecting probe socket")?;
    let addr: SocketAddr = socket.local_addr().context("reading probe socket local address")?;
    Ok(addr.ip().to_string())
}

/// A minimal, non-interactive chat client used only by this crate's own
/// integration tests: connects, joins a room, sends CHAT with an explicit
/// vector clock, and reads back whatever the server fans out. The
/// interactive client itself remains out of scope for this crate.
#[cfg(test)]
struct TestClient {
    stream: tokio::net::TcpStream,
}

#[cfg(test)]
impl TestClient {
    async fn connect(tcp_port: u16, client_id: &str) -> Self {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", tcp_port))
            .await
            .expect("connecting to node under test");
        let join = Message::new(MessageType::ClientJoin, client_id.to_string());
        Self::write(&mut stream, &join).await;
        Self { stream }
    }

    async fn write(stream: &mut tokio::net::TcpStream, msg: &Message) {
        let json = msg.to_json().expect("Message always serializes");
        ringchat_transport::framing::write_frame(stream, json.as_bytes())
            .await
            .expect("writing frame to node under test");
    }

    async fn send(&mut self, msg: &Message) {
        Self::write(&mut self.stream, msg).await;
    }

    async fn recv(&mut self) -> Message {
        let bytes = ringchat_transport::framing::read_frame(&mut self.stream)
            .await
            .expect("reading frame from node under test")
            .expect("node under test closed the connection");
        Message::from_json(std::str::from_utf8(&bytes).expect("frame is UTF-8")).expect("frame is a Message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringchat_core::VectorClock;
    use std::time::Duration;

    fn chat(sender: &str, room: &str, content: &str, ticks: u64) -> Message {
        let mut vc = VectorClock::new();
        for _ in 0..ticks {
            vc.increment(sender);
        }
        Message::new(MessageType::Chat, sender.to_string())
            .with_room(room)
            .with_content(content)
            .with_vector_clock(vc)
    }

    /// A late-arriving gapped CHAT is held back, then redistributed to
    /// every room member — including the sender's own echo — once the
    /// missing predecessor arrives.
    #[tokio::test]
    async fn multicast_redistributes_gapped_message_once_causally_ready() {
        let handle = run_node(0, 0, None, Duration::from_millis(50)).await.expect("node starts");
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut alice = TestClient::connect(handle.tcp_port, "alice").await;
        let mut bob = TestClient::connect(handle.tcp_port, "bob").await;

        alice.send(&Message::new(MessageType::JoinRoom, "alice".to_string()).with_room("room-1")).await;
        bob.send(&Message::new(MessageType::JoinRoom, "bob".to_string()).with_room("room-1")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // out-of-order: alice:2 arrives before alice:1, so it's held back
        alice.send(&chat("alice", "room-1", "second", 2)).await;
        // the missing predecessor arrives next, draining the hold-back queue
        alice.send(&chat("alice", "room-1", "first", 1)).await;

        let first_for_alice = alice.recv().await;
        let second_for_alice = alice.recv().await;
        assert_eq!(first_for_alice.content, "first");
        assert_eq!(second_for_alice.content, "second");

        let first_for_bob = bob.recv().await;
        let second_for_bob = bob.recv().await;
        assert_eq!(first_for_bob.content, "first");
        assert_eq!(second_for_bob.content, "second");
    }

    /// A UDP DISCOVERY_REQUEST sent straight to a solo leader's discovery
    /// socket gets an AVAILABLE_ROOMS reply back over UDP (the
    /// follower-forwarding half is covered at the `ringchat-core` unit
    /// level by `dispatcher::tests::follower_forwards_discovery_to_leader`).
    #[tokio::test]
    async fn udp_discovery_request_returns_available_rooms() {
        let handle = run_node(0, 0, None, Duration::from_millis(50)).await.expect("node starts");
        tokio::time::sleep(Duration::from_millis(150)).await;

        let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("binding probe socket");
        let request = Message::new(MessageType::DiscoveryRequest, "probe-client".to_string());
        let json = request.to_json().expect("Message always serializes");
        probe
            .send_to(json.as_bytes(), (handle.ip.as_str(), handle.discovery_port))
            .await
            .expect("sending DISCOVERY_REQUEST");

        let mut buf = [0u8; ringchat_transport::MAX_DATAGRAM_BYTES];
        let (len, _src) =
            tokio::time::timeout(Duration::from_secs(2), probe.recv_from(&mut buf))
                .await
                .expect("AVAILABLE_ROOMS reply timed out")
                .expect("recv_from failed");
        let reply = Message::from_json(std::str::from_utf8(&buf[..len]).unwrap()).expect("reply is a Message");
        assert_eq!(reply.kind, MessageType::AvailableRooms);
    }
}
