//! Redis-backed coordination store with connection retry

use crate::config::StoreSettings;
use crate::error::{MatchmakingError, Result};
use crate::store::{CoordinationStore, StoreKeys};
use crate::types::{PairAllocation, QueueLengths, RoomKeySet};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Pops two players and one room in a single script run, or touches nothing.
///
/// KEYS[1] is the waiting queue, KEYS[2] the room queue. Producers RPUSH, so
/// popping from the right hands out the most recently enqueued entries first.
pub const ALLOCATE_PAIR_ROOM_SCRIPT: &str = r#"
if redis.call('LLEN', KEYS[1]) < 2 or redis.call('LLEN', KEYS[2]) < 1 then
  return nil
end
local player1 = redis.call('RPOP', KEYS[1])
local player2 = redis.call('RPOP', KEYS[1])
local room = redis.call('RPOP', KEYS[2])
return { player1, player2, room }
"#;

/// Redis implementation of the coordination store
///
/// Holds one multiplexed connection per worker process; clones of it share
/// the underlying socket.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    keys: StoreKeys,
    allocate_script: Script,
}

impl RedisStore {
    /// Connect with retry, giving up after the configured number of attempts
    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str()).map_err(|e| {
            MatchmakingError::StoreConnectionFailed {
                message: format!("Invalid store URL {}: {}", settings.url, e),
            }
        })?;

        let connection = Self::connect_with_retry(&client, settings).await?;

        Ok(Self {
            client,
            connection,
            keys: StoreKeys::from_settings(settings),
            allocate_script: Script::new(ALLOCATE_PAIR_ROOM_SCRIPT),
        })
    }

    /// Attempt to connect with exponential backoff retry
    async fn connect_with_retry(
        client: &Client,
        settings: &StoreSettings,
    ) -> Result<MultiplexedConnection> {
        let connect_timeout = settings.connection_timeout();
        let mut retry_count = 0;
        let mut delay = settings.retry_delay();

        loop {
            match Self::try_connect(client, connect_timeout).await {
                Ok(connection) => {
                    info!("Successfully connected to coordination store");
                    return Ok(connection);
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > settings.max_retry_attempts {
                        error!(
                            "Failed to connect to coordination store after {} retries",
                            settings.max_retry_attempts
                        );
                        return Err(MatchmakingError::StoreConnectionFailed {
                            message: format!("Max retries exceeded: {}", e),
                        }
                        .into());
                    }

                    warn!(
                        "Store connection attempt {} failed: {}. Retrying in {:?}",
                        retry_count, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(10_000));
                }
            }
        }
    }

    /// Single connection attempt, verified with a PING
    async fn try_connect(client: &Client, connect_timeout: Duration) -> Result<MultiplexedConnection> {
        let mut connection = timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| MatchmakingError::StoreConnectionFailed {
                message: format!("Timed out after {:?}", connect_timeout),
            })?
            .map_err(|e| MatchmakingError::StoreConnectionFailed {
                message: e.to_string(),
            })?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| MatchmakingError::StoreConnectionFailed {
                message: format!("PING failed: {}", e),
            })?;

        Ok(connection)
    }

    /// The client this store was opened from, for opening pub/sub connections
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn allocate_pair_room(&self) -> Result<Option<PairAllocation>> {
        let mut conn = self.connection.clone();
        let reply: Option<Vec<String>> = self
            .allocate_script
            .key(&self.keys.waiting_queue)
            .key(&self.keys.room_queue)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| MatchmakingError::store_op("allocate_pair_room", e))?;

        match reply {
            None => Ok(None),
            Some(entries) => match <[String; 3]>::try_from(entries) {
                Ok([player1, player2, room_id]) => Ok(Some(PairAllocation {
                    player1,
                    player2,
                    room_id,
                })),
                Err(entries) => Err(MatchmakingError::store_op(
                    "allocate_pair_room",
                    format!("expected 3 entries, script returned {}", entries.len()),
                )
                .into()),
            },
        }
    }

    async fn get_room_keys(&self, room_id: &str) -> Result<Option<RoomKeySet>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(self.keys.room_keys(room_id))
            .await
            .map_err(|e| MatchmakingError::store_op("get_room_keys", e))?;

        raw.map(|raw| RoomKeySet::from_json(room_id, &raw)).transpose()
    }

    async fn put_room_keys(&self, room_id: &str, keys: &RoomKeySet) -> Result<()> {
        let payload = keys.to_json()?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .set(self.keys.room_keys(room_id), payload)
            .await
            .map_err(|e| MatchmakingError::store_op("put_room_keys", e))?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| MatchmakingError::store_op("publish", e))?;
        debug!("Published to '{}' ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn release(&self, allocation: &PairAllocation) -> Result<()> {
        let mut conn = self.connection.clone();
        // player2 first so player1 ends up back at the tail
        let _: () = redis::pipe()
            .atomic()
            .rpush(&self.keys.waiting_queue, &allocation.player2)
            .ignore()
            .rpush(&self.keys.waiting_queue, &allocation.player1)
            .ignore()
            .rpush(&self.keys.room_queue, &allocation.room_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| MatchmakingError::store_op("release", e))?;
        Ok(())
    }

    async fn enqueue_player(&self, player_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .rpush(&self.keys.waiting_queue, player_id)
            .await
            .map_err(|e| MatchmakingError::store_op("enqueue_player", e))?;
        Ok(())
    }

    async fn enqueue_room(&self, room_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .rpush(&self.keys.room_queue, room_id)
            .await
            .map_err(|e| MatchmakingError::store_op("enqueue_room", e))?;
        Ok(())
    }

    async fn queue_lengths(&self) -> Result<QueueLengths> {
        let mut conn = self.connection.clone();
        let (waiting_players, available_rooms): (usize, usize) = redis::pipe()
            .llen(&self.keys.waiting_queue)
            .llen(&self.keys.room_queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| MatchmakingError::store_op("queue_lengths", e))?;

        Ok(QueueLengths {
            waiting_players,
            available_rooms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_checks_both_queues_before_popping() {
        let guard = ALLOCATE_PAIR_ROOM_SCRIPT
            .find("LLEN")
            .expect("script must check lengths");
        let first_pop = ALLOCATE_PAIR_ROOM_SCRIPT
            .find("RPOP")
            .expect("script must pop");
        assert!(guard < first_pop);
        assert_eq!(ALLOCATE_PAIR_ROOM_SCRIPT.matches("RPOP").count(), 3);
    }

    #[tokio::test]
    async fn test_connect_fails_on_unreachable_store() {
        let settings = StoreSettings {
            url: "redis://127.0.0.1:1/".to_string(),
            connection_timeout_seconds: 1,
            max_retry_attempts: 0,
            retry_delay_ms: 1,
            ..StoreSettings::default()
        };

        let err = RedisStore::connect(&settings).await.err().unwrap();
        let err = err.downcast::<MatchmakingError>().unwrap();
        assert!(matches!(err, MatchmakingError::StoreConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let settings = StoreSettings {
            url: "not-a-url".to_string(),
            ..StoreSettings::default()
        };

        assert!(RedisStore::connect(&settings).await.is_err());
    }

    // Note: tests against a live Redis belong in an environment that provides one
}
