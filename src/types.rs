//! Common types used throughout the matchmaking service

use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a waiting player, as pushed by the enqueue producer
pub type PlayerId = String;

/// Identifier of a pre-provisioned room
pub type RoomId = String;

/// Identifier shared by the two assignments of one match
pub type MatchId = Uuid;

/// Two players and one room removed together by the allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairAllocation {
    /// First entry popped from the waiting queue (the most recently enqueued)
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub room_id: RoomId,
}

impl PairAllocation {
    pub fn new(
        player1: impl Into<PlayerId>,
        player2: impl Into<PlayerId>,
        room_id: impl Into<RoomId>,
    ) -> Self {
        Self {
            player1: player1.into(),
            player2: player2.into(),
            room_id: room_id.into(),
        }
    }
}

/// Join credentials of a room plus the last time they were handed out
///
/// Written by the provisioner, claimed by the handshake. `timestamp` is in
/// Unix milliseconds and is zero until the room is first assigned. Any other
/// fields the provisioner stores are carried through a claim untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeySet {
    pub credentials: [String; 2],
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RoomKeySet {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            credentials: [first.into(), second.into()],
            timestamp: 0,
            extra: serde_json::Map::new(),
        }
    }

    /// Parse a stored record
    pub fn from_json(room_id: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            MatchmakingError::InvalidRoomKeys {
                room_id: room_id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            MatchmakingError::SerializationFailed {
                message: format!("room keys: {}", e),
            }
            .into()
        })
    }
}

/// One player's view of a match, published on the player channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAssignment {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub opponent_id: PlayerId,
    pub room_id: RoomId,
    pub room_key: String,
}

impl MatchAssignment {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            MatchmakingError::SerializationFailed {
                message: format!("match assignment: {}", e),
            }
            .into()
        })
    }
}

/// Current lengths of the two shared queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLengths {
    pub waiting_players: usize,
    pub available_rooms: usize,
}
