//! Match notification
//!
//! Publishes are fire-and-forget: no acknowledgement, no retry, and a
//! subscriber that is not connected at publish time never sees the message.

use crate::config::StoreSettings;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::CoordinationStore;
use crate::types::MatchAssignment;
use std::sync::Arc;
use tracing::debug;

/// Broadcasts match results on the player and room-ready channels
#[derive(Clone)]
pub struct MatchNotifier {
    store: Arc<dyn CoordinationStore>,
    player_channel: String,
    room_channel: String,
    metrics: Arc<MetricsCollector>,
}

impl MatchNotifier {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        player_channel: impl Into<String>,
        room_channel: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            player_channel: player_channel.into(),
            room_channel: room_channel.into(),
            metrics,
        }
    }

    pub fn from_settings(
        store: Arc<dyn CoordinationStore>,
        settings: &StoreSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::new(
            store,
            settings.player_channel.clone(),
            settings.room_channel.clone(),
            metrics,
        )
    }

    /// Publish both assignments, then the room ID
    pub async fn notify(&self, assignments: &[MatchAssignment; 2]) -> Result<()> {
        // Encode everything up front so a bad payload publishes nothing
        let payloads = [assignments[0].to_json()?, assignments[1].to_json()?];

        for payload in &payloads {
            self.store.publish(&self.player_channel, payload).await?;
            self.metrics.record_notification("player");
        }

        let room_id = &assignments[0].room_id;
        self.store.publish(&self.room_channel, room_id).await?;
        self.metrics.record_notification("room");

        debug!(
            "Published match {} for room '{}' on '{}' and '{}'",
            assignments[0].match_id, room_id, self.player_channel, self.room_channel
        );
        Ok(())
    }
}
