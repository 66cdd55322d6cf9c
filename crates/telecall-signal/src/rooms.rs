//! Appointment rooms: socket membership and chat history.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use telecall_common::models::{ConnectionId, OutgoingMessage, RoomMessage};
use telecall_common::snowflake;
use tokio::sync::RwLock;

#[derive(Default)]
struct Room {
    members: HashSet<ConnectionId>,
    history: VecDeque<RoomMessage>,
}

/// Tracks every room that has been joined or written to.
pub struct Rooms {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    /// Messages kept per room; oldest are dropped first
    max_history: usize,
}

impl Rooms {
    pub fn new(max_history: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            max_history,
        }
    }

    /// Add a socket to a room. Returns `false` if it was already a member.
    pub async fn join(&self, room_id: &str, connection: &ConnectionId) -> bool {
        self.rooms
            .write()
            .await
            .entry(room_id.to_owned())
            .or_default()
            .members
            .insert(connection.clone())
    }

    /// Drop a socket from every room it joined. History is kept.
    pub async fn leave_all(&self, connection: &ConnectionId) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        for (room_id, room) in rooms.iter_mut() {
            if room.members.remove(connection) {
                left.push(room_id.clone());
            }
        }
        left
    }

    /// Stamp and store a message. Returns it with the room's current members.
    ///
    /// Ids are minted under the write lock, so history order is id order.
    pub async fn post(&self, msg: OutgoingMessage) -> (RoomMessage, Vec<ConnectionId>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(msg.room_id.clone()).or_default();

        let stored = msg.into_room_message(snowflake::generate_id(), Utc::now());
        room.history.push_back(stored.clone());
        while room.history.len() > self.max_history {
            room.history.pop_front();
        }

        (stored, room.members.iter().cloned().collect())
    }

    /// History of one room, oldest first. Empty for unknown rooms.
    pub async fn history(&self, room_id: &str) -> Vec<RoomMessage> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new(1000)
    }
}
