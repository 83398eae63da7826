//! Session registry: maps room keys to live rooms.
//!
//! The map itself sits behind an `RwLock`; each room sits behind its own
//! `Mutex`, so traffic in one room never waits on another. The registry lock
//! is only held for lookups, creation and removal, never across a room's
//! own work.
//!
//! Removal races with concurrent first joins of the same key. A room that
//! emptied is marked retired under its own lock before it is dropped from the
//! map, and `remove` only deletes the exact room it was handed. A joiner that
//! lands on a retired room clears it and resolves again.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::broadcast::FanOut;
use crate::room::{Room, RoomKey};

/// A room shared between connection tasks.
pub type SharedRoom = Arc<Mutex<Room>>;

/// All active rooms of one server.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    rooms: RwLock<HashMap<RoomKey, SharedRoom>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the room for `key`, creating a seeded one if there is none.
    ///
    /// The room is fully built before it becomes visible in the map.
    pub async fn resolve(&self, key: &RoomKey) -> SharedRoom {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(key) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(key) {
            return room.clone();
        }

        let room = Arc::new(Mutex::new(Room::new(key.clone())));
        rooms.insert(key.clone(), room.clone());
        log::info!("Room {key} created");
        room
    }

    /// Look up a room without creating it.
    pub async fn get(&self, key: &RoomKey) -> Option<SharedRoom> {
        self.rooms.read().await.get(key).cloned()
    }

    /// Delete `room` from the map if it is still the entry for `key`.
    pub async fn remove(&self, key: &RoomKey, room: &SharedRoom) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(key) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Fan `message` out to the members of `key`. `None` if the room is gone.
    pub async fn broadcast(&self, key: &RoomKey, message: &Arc<str>) -> Option<FanOut> {
        let room = self.get(key).await?;
        let mut room = room.lock().await;
        Some(room.broadcast(message))
    }

    pub async fn contains(&self, key: &RoomKey) -> bool {
        self.rooms.read().await.contains_key(key)
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Keys of all active rooms.
    pub async fn active_rooms(&self) -> Vec<RoomKey> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
