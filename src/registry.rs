use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Room;

/// Room lookup as the booking engine consumes it. The registration path
/// that fills a registry lives outside the engine.
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    async fn find_by_id(&self, id: Ulid) -> Option<Room>;
    async fn list_all(&self) -> Vec<Room>;
}

/// DashMap-backed registry for a fixed room set.
pub struct InMemoryRoomRegistry {
    rooms: DashMap<Ulid, Room>,
}

impl Default for InMemoryRoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoomRegistry {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    /// The external registration path. Rooms are immutable once added.
    pub fn register(&self, room: Room) {
        self.rooms.insert(room.id, room);
    }
}

#[async_trait]
impl RoomRegistry for InMemoryRoomRegistry {
    async fn find_by_id(&self, id: Ulid) -> Option<Room> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    async fn list_all(&self) -> Vec<Room> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }
}
