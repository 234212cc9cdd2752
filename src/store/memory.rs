//! In-memory coordination store
//!
//! Mirrors the Redis store's semantics inside a single process: lists pop from
//! the tail, allocation is all-or-nothing, and publishing to a channel nobody
//! listens on drops the message. The mutex here only serializes callers that
//! share this process, so it must never stand in for Redis across workers.

use crate::error::{MatchmakingError, Result};
use crate::store::CoordinationStore;
use crate::types::{PairAllocation, PlayerId, QueueLengths, RoomId, RoomKeySet};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A message captured from [`InMemoryStore::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: String,
}

/// Queue and record state guarded by the store's mutex
#[derive(Debug, Default)]
pub struct MemoryQueues {
    waiting: VecDeque<PlayerId>,
    rooms: VecDeque<RoomId>,
    room_keys: HashMap<RoomId, RoomKeySet>,
}

impl MemoryQueues {
    /// Pop two players and one room from the tails, or leave everything as is
    pub fn allocate(&mut self) -> Option<PairAllocation> {
        if self.waiting.len() < 2 || self.rooms.is_empty() {
            return None;
        }

        let player1 = self.waiting.pop_back()?;
        let player2 = self.waiting.pop_back()?;
        let room_id = self.rooms.pop_back()?;

        Some(PairAllocation {
            player1,
            player2,
            room_id,
        })
    }

    pub fn push_player(&mut self, player_id: impl Into<PlayerId>) {
        self.waiting.push_back(player_id.into());
    }

    pub fn push_room(&mut self, room_id: impl Into<RoomId>) {
        self.rooms.push_back(room_id.into());
    }

    pub fn waiting(&self) -> &VecDeque<PlayerId> {
        &self.waiting
    }

    pub fn rooms(&self) -> &VecDeque<RoomId> {
        &self.rooms
    }
}

/// Single-process store used for local runs and tests
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<MemoryQueues>,
    mutations: AtomicU64,
    events: broadcast::Sender<PublishedMessage>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(MemoryQueues::default()),
            mutations: AtomicU64::new(0),
            events,
        }
    }

    /// Build a store already holding the given queues, in push order
    pub fn seeded<P, R>(players: P, rooms: R) -> Self
    where
        P: IntoIterator,
        P::Item: Into<PlayerId>,
        R: IntoIterator,
        R::Item: Into<RoomId>,
    {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            players.into_iter().for_each(|p| state.push_player(p));
            rooms.into_iter().for_each(|r| state.push_room(r));
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryQueues>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::StoreOperationFailed {
                operation: "lock".to_string(),
                message: "In-memory store lock poisoned".to_string(),
            }
            .into()
        })
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Subscribe to everything published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.events.subscribe()
    }

    /// Number of write operations applied so far
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Snapshot of the waiting queue, head first
    pub fn waiting_players(&self) -> Vec<PlayerId> {
        self.state
            .lock()
            .map(|s| s.waiting().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the room queue, head first
    pub fn available_rooms(&self) -> Vec<RoomId> {
        self.state
            .lock()
            .map(|s| s.rooms().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current credential record for a room
    pub fn room_keys(&self, room_id: &str) -> Option<RoomKeySet> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.room_keys.get(room_id).cloned())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn allocate_pair_room(&self) -> Result<Option<PairAllocation>> {
        let allocation = self.lock()?.allocate();
        if allocation.is_some() {
            self.record_mutation();
        }
        Ok(allocation)
    }

    async fn get_room_keys(&self, room_id: &str) -> Result<Option<RoomKeySet>> {
        Ok(self.lock()?.room_keys.get(room_id).cloned())
    }

    async fn put_room_keys(&self, room_id: &str, keys: &RoomKeySet) -> Result<()> {
        self.lock()?
            .room_keys
            .insert(room_id.to_string(), keys.clone());
        self.record_mutation();
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No receivers is not an error, the message is simply gone
        let _ = self.events.send(PublishedMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn release(&self, allocation: &PairAllocation) -> Result<()> {
        {
            let mut state = self.lock()?;
            state.push_player(allocation.player2.clone());
            state.push_player(allocation.player1.clone());
            state.push_room(allocation.room_id.clone());
        }
        self.record_mutation();
        Ok(())
    }

    async fn enqueue_player(&self, player_id: &str) -> Result<()> {
        self.lock()?.push_player(player_id);
        self.record_mutation();
        Ok(())
    }

    async fn enqueue_room(&self, room_id: &str) -> Result<()> {
        self.lock()?.push_room(room_id);
        self.record_mutation();
        Ok(())
    }

    async fn queue_lengths(&self) -> Result<QueueLengths> {
        let state = self.lock()?;
        Ok(QueueLengths {
            waiting_players: state.waiting().len(),
            available_rooms: state.rooms().len(),
        })
    }
}
