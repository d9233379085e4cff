use std::collections::HashMap;

use crate::protocol::NodeId;

// Wire content is a "Update Room <id>" / "Sync Room <json>" prefix string,
// parsed once into this typed value at the dispatcher boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMsg {
    UpdateRoom { room_id: String },
    SyncRooms { snapshot: HashMap<String, NodeId> },
}

impl MetadataMsg {
    pub fn to_wire(&self) -> String {
        match self {
            MetadataMsg::UpdateRoom { room_id } => format!("Update Room {room_id}"),
            MetadataMsg::SyncRooms { snapshot } => {
                format!("Sync Room {}", serde_json::to_string(snapshot).expect("snapshot always serializes"))
            }
        }
    }

    pub fn from_wire(content: &str) -> Option<Self> {
        if let Some(room_id) = content.strip_prefix("Update Room ") {
            Some(MetadataMsg::UpdateRoom { room_id: room_id.to_string() })
        } else if let Some(json) = content.strip_prefix("Sync Room ") {
            serde_json::from_str(json).ok().map(|snapshot| MetadataMsg::SyncRooms { snapshot })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    rooms: HashMap<String, NodeId>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, room_id: impl Into<String>, server_id: NodeId) {
        self.rooms.insert(room_id.into(), server_id);
    }

    pub fn apply_update(&mut self, room_id: impl Into<String>, server_id: NodeId) {
        self.rooms.insert(room_id.into(), server_id);
    }

    pub fn replace_snapshot(&mut self, snapshot: HashMap<String, NodeId>) {
        self.rooms = snapshot;
    }

    pub fn snapshot(&self) -> HashMap<String, NodeId> {
        self.rooms.clone()
    }

    pub fn host_of(&self, room_id: &str) -> Option<&NodeId> {
        self.rooms.get(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_convergence_after_one_sync() {
        let mut leader = MetadataStore::new();
        leader.set_local("room-1", "A".to_string());
        leader.apply_update("room-2", "B".to_string());

        let mut follower = MetadataStore::new();
        follower.replace_snapshot(leader.snapshot());

        assert_eq!(follower, leader);
    }

    #[test]
    fn last_write_wins_on_update() {
        let mut leader = MetadataStore::new();
        leader.apply_update("room-1", "A".to_string());
        leader.apply_update("room-1", "B".to_string());
        assert_eq!(leader.host_of("room-1"), Some(&"B".to_string()));
    }

    #[test]
    fn metadata_msg_wire_roundtrip() {
        let update = MetadataMsg::UpdateRoom { room_id: "room-1".to_string() };
        assert_eq!(MetadataMsg::from_wire(&update.to_wire()), Some(update));

        let mut snapshot = HashMap::new();
        snapshot.insert("room-1".to_string(), "A".to_string());
        let sync = MetadataMsg::SyncRooms { snapshot };
        assert_eq!(MetadataMsg::from_wire(&sync.to_wire()), Some(sync));
    }
}
