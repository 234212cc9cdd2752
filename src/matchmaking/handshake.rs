//! Room-key handshake
//!
//! After an allocation the room's credential record may not exist yet, since
//! the provisioner writes it with arbitrary delay. The handshake polls for it,
//! stamps the record with the assignment time, and hands one credential to
//! each player in random order.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::store::CoordinationStore;
use crate::types::{MatchAssignment, PairAllocation, RoomKeySet};
use crate::utils::{coin_flip, current_timestamp_millis, generate_match_id};
use prometheus::IntGauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Log a reminder every this many empty polls
const STALL_WARN_EVERY_POLLS: u64 = 100;

/// Configuration for the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Delay between room key lookups
    pub poll_interval: Duration,
    /// Give up and requeue the allocation after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

/// Keeps the pending-handshake gauge accurate on every exit path
struct PendingGuard(IntGauge);

impl PendingGuard {
    fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Resolves, claims and distributes a room's credentials
#[derive(Clone)]
pub struct RoomKeyHandshake {
    store: Arc<dyn CoordinationStore>,
    config: HandshakeConfig,
    metrics: Arc<MetricsCollector>,
}

impl RoomKeyHandshake {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: HandshakeConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Run the full handshake for an allocation
    ///
    /// With a bounded wait, any failure before the claim lands puts the
    /// allocation back on the queues.
    pub async fn resolve(&self, allocation: &PairAllocation) -> Result<[MatchAssignment; 2]> {
        let _pending = PendingGuard::new(&self.metrics.service().handshake_pending);

        let claimed = match self.wait_and_claim(&allocation.room_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                if self.config.timeout.is_some() {
                    self.release(allocation, &e).await;
                }
                return Err(e);
            }
        };

        Ok(assign_credentials(allocation, claimed.credentials, coin_flip()))
    }

    async fn wait_and_claim(&self, room_id: &str) -> Result<RoomKeySet> {
        let keys = match self.config.timeout {
            None => self.wait_for_room_keys(room_id).await?,
            Some(limit) => timeout(limit, self.wait_for_room_keys(room_id))
                .await
                .map_err(|_| MatchmakingError::HandshakeTimedOut {
                    room_id: room_id.to_string(),
                    waited_ms: limit.as_millis() as u64,
                })??,
        };

        self.claim(room_id, keys).await
    }

    /// Poll until the room's credential record exists. Performs reads only.
    pub async fn wait_for_room_keys(&self, room_id: &str) -> Result<RoomKeySet> {
        let mut polls: u64 = 0;

        loop {
            if let Some(keys) = self.store.get_room_keys(room_id).await? {
                if polls > 0 {
                    debug!("Room keys for '{}' appeared after {} polls", room_id, polls);
                }
                return Ok(keys);
            }

            polls += 1;
            if polls == 1 {
                debug!(
                    "Room '{}' has no keys yet, polling every {:?}",
                    room_id, self.config.poll_interval
                );
            } else if polls % STALL_WARN_EVERY_POLLS == 0 {
                warn!(
                    room_id = %room_id,
                    polls,
                    "Still waiting for room keys; allocated players are held until they appear"
                );
            }

            sleep(self.config.poll_interval).await;
        }
    }

    /// Stamp the record with the assignment time and write it back
    async fn claim(&self, room_id: &str, mut keys: RoomKeySet) -> Result<RoomKeySet> {
        keys.timestamp = current_timestamp_millis();
        self.store.put_room_keys(room_id, &keys).await?;
        Ok(keys)
    }

    async fn release(&self, allocation: &PairAllocation, cause: &anyhow::Error) {
        match self.store.release(allocation).await {
            Ok(()) => {
                self.metrics.record_release();
                info!(
                    "Handshake for room '{}' failed ({:#}); requeued '{}', '{}' and the room",
                    allocation.room_id, cause, allocation.player1, allocation.player2
                );
            }
            Err(e) => error!(
                "Handshake for room '{}' failed ({:#}) and requeue failed, players '{}' and '{}' are dropped: {}",
                allocation.room_id, cause, allocation.player1, allocation.player2, e
            ),
        }
    }
}

/// Give the first credential to player1 and the second to player2, after
/// swapping them when `swap` is set
pub fn assign_credentials(
    allocation: &PairAllocation,
    credentials: [String; 2],
    swap: bool,
) -> [MatchAssignment; 2] {
    let [first, second] = credentials;
    let (key1, key2) = if swap { (second, first) } else { (first, second) };
    let match_id = generate_match_id();

    [
        MatchAssignment {
            match_id,
            player_id: allocation.player1.clone(),
            opponent_id: allocation.player2.clone(),
            room_id: allocation.room_id.clone(),
            room_key: key1,
        },
        MatchAssignment {
            match_id,
            player_id: allocation.player2.clone(),
            opponent_id: allocation.player1.clone(),
            room_id: allocation.room_id.clone(),
            room_key: key2,
        },
    ]
}
