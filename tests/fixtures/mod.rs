//! Test fixtures and store wrappers for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use duo_matchmaker::config::AppConfig;
use duo_matchmaker::error::Result;
use duo_matchmaker::matchmaking::MatchmakerWorker;
use duo_matchmaker::metrics::MetricsCollector;
use duo_matchmaker::store::{CoordinationStore, InMemoryStore, PublishedMessage};
use duo_matchmaker::types::{PairAllocation, QueueLengths, RoomKeySet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Wraps an in-memory store, recording when each allocation starts and
/// stretching it by a fixed latency
pub struct SlowStore {
    inner: Arc<InMemoryStore>,
    latency: Duration,
    allocation_starts: Mutex<Vec<Instant>>,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryStore>, latency: Duration) -> Self {
        Self {
            inner,
            latency,
            allocation_starts: Mutex::new(Vec::new()),
        }
    }

    pub fn allocation_starts(&self) -> Vec<Instant> {
        self.allocation_starts
            .lock()
            .map(|starts| starts.clone())
            .unwrap_or_default()
    }

    /// Time between consecutive allocation starts
    pub fn gaps(&self) -> Vec<Duration> {
        self.allocation_starts()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl CoordinationStore for SlowStore {
    async fn allocate_pair_room(&self) -> Result<Option<PairAllocation>> {
        if let Ok(mut starts) = self.allocation_starts.lock() {
            starts.push(Instant::now());
        }
        sleep(self.latency).await;
        self.inner.allocate_pair_room().await
    }

    async fn get_room_keys(&self, room_id: &str) -> Result<Option<RoomKeySet>> {
        self.inner.get_room_keys(room_id).await
    }

    async fn put_room_keys(&self, room_id: &str, keys: &RoomKeySet) -> Result<()> {
        self.inner.put_room_keys(room_id, keys).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn release(&self, allocation: &PairAllocation) -> Result<()> {
        self.inner.release(allocation).await
    }

    async fn enqueue_player(&self, player_id: &str) -> Result<()> {
        self.inner.enqueue_player(player_id).await
    }

    async fn enqueue_room(&self, room_id: &str) -> Result<()> {
        self.inner.enqueue_room(room_id).await
    }

    async fn queue_lengths(&self) -> Result<QueueLengths> {
        self.inner.queue_lengths().await
    }
}

/// Wraps an in-memory store whose room key reads always fail
pub struct UnreadableKeysStore {
    inner: Arc<InMemoryStore>,
}

impl UnreadableKeysStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CoordinationStore for UnreadableKeysStore {
    async fn allocate_pair_room(&self) -> Result<Option<PairAllocation>> {
        self.inner.allocate_pair_room().await
    }

    async fn get_room_keys(&self, _room_id: &str) -> Result<Option<RoomKeySet>> {
        Err(anyhow::anyhow!("connection reset"))
    }

    async fn put_room_keys(&self, room_id: &str, keys: &RoomKeySet) -> Result<()> {
        self.inner.put_room_keys(room_id, keys).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn release(&self, allocation: &PairAllocation) -> Result<()> {
        self.inner.release(allocation).await
    }

    async fn enqueue_player(&self, player_id: &str) -> Result<()> {
        self.inner.enqueue_player(player_id).await
    }

    async fn enqueue_room(&self, room_id: &str) -> Result<()> {
        self.inner.enqueue_room(room_id).await
    }

    async fn queue_lengths(&self) -> Result<QueueLengths> {
        self.inner.queue_lengths().await
    }
}

/// Configuration with a fixed period and no startup jitter
pub fn test_config(target_period_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.matchmaking.target_period_ms = target_period_ms;
    config.matchmaking.handshake_poll_interval_ms = 10;
    config.matchmaking.initial_jitter = false;
    config
}

pub fn test_metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new().expect("Failed to create metrics collector"))
}

pub fn worker_over(store: Arc<dyn CoordinationStore>, config: &AppConfig) -> MatchmakerWorker {
    MatchmakerWorker::from_config(store, config, test_metrics())
}

/// Everything currently buffered on a subscription
pub fn drain(receiver: &mut broadcast::Receiver<PublishedMessage>) -> Vec<PublishedMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}

/// Messages published on one channel
pub fn on_channel<'a>(
    messages: &'a [PublishedMessage],
    channel: &'a str,
) -> impl Iterator<Item = &'a PublishedMessage> + 'a {
    messages.iter().filter(move |m| m.channel == channel)
}
