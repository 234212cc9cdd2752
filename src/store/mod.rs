//! Coordination store access
//!
//! Every piece of shared state (the waiting queue, the room queue and the
//! per-room credential records) lives in an external store that all worker
//! processes reach. This module defines the operations the matchmaker needs
//! from it and provides the Redis implementation used in production along
//! with an in-memory one for single-process runs and tests.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryStore, PublishedMessage};
pub use redis_store::RedisStore;

use crate::config::StoreSettings;
use crate::error::Result;
use crate::types::{PairAllocation, QueueLengths, RoomKeySet};
use async_trait::async_trait;

/// Operations the matchmaker performs against the shared store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically remove two waiting players and one room, or nothing
    async fn allocate_pair_room(&self) -> Result<Option<PairAllocation>>;

    /// Read a room's credential record, `None` while not yet provisioned
    async fn get_room_keys(&self, room_id: &str) -> Result<Option<RoomKeySet>>;

    /// Overwrite a room's credential record
    async fn put_room_keys(&self, room_id: &str, keys: &RoomKeySet) -> Result<()>;

    /// Fire-and-forget publish; subscribers not listening miss the message
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Put an allocation back so its players and room are the next ones popped
    async fn release(&self, allocation: &PairAllocation) -> Result<()>;

    /// Append a player to the waiting queue
    async fn enqueue_player(&self, player_id: &str) -> Result<()>;

    /// Append a room to the room queue
    async fn enqueue_room(&self, room_id: &str) -> Result<()>;

    /// Current queue lengths
    async fn queue_lengths(&self) -> Result<QueueLengths>;
}

/// Key names used inside the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub waiting_queue: String,
    pub room_queue: String,
    pub room_keys_prefix: String,
}

impl StoreKeys {
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            waiting_queue: settings.waiting_queue_key.clone(),
            room_queue: settings.room_queue_key.clone(),
            room_keys_prefix: settings.room_keys_prefix.clone(),
        }
    }

    /// Key of the credential record for a room
    pub fn room_keys(&self, room_id: &str) -> String {
        format!("{}{}", self.room_keys_prefix, room_id)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::from_settings(&StoreSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_keys_key_composition() {
        let keys = StoreKeys::default();
        assert_eq!(keys.room_keys("r1"), "room_keys:r1");
        assert_eq!(keys.waiting_queue, "matchmaking:waiting_players");
    }
}
