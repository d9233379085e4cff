// Maps a ConnectToPeer action's (ip, port) back to the peer id that
// triggered it, since Action::ConnectToPeer carries no id of its own.
use std::collections::HashMap;
use std::sync::Mutex;

use ringchat_core::NodeId;

#[derive(Default)]
pub struct DialTable {
    inner: Mutex<HashMap<(String, u16), NodeId>>,
}

impl DialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, ip: String, port: u16, id: NodeId) {
        self.inner.lock().expect("dial table mutex poisoned").insert((ip, port), id);
    }

    pub fn lookup(&self, ip: &str, port: u16) -> Option<NodeId> {
        self.inner
            .lock()
            .expect("dial table mutex poisoned")
            .get(&(ip.to_string(), port))
            .cloned()
    }
}
