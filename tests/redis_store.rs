//! RedisStore tests against a live Redis server
//!
//! These run only when REDIS_URL is set, e.g.
//!   docker run -d -p 6379:6379 redis:7
//!   REDIS_URL=redis://127.0.0.1:6379/ cargo test --test redis_store
//!
//! Every test works under its own key namespace so tests can share a server.

use duo_matchmaker::config::StoreSettings;
use duo_matchmaker::store::{CoordinationStore, RedisStore};
use duo_matchmaker::types::{PairAllocation, RoomKeySet};
use std::collections::HashSet;
use std::sync::Arc;

/// Settings pointing at REDIS_URL with keys unique to one test
fn settings_from_env() -> Option<StoreSettings> {
    let url = match std::env::var("REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("REDIS_URL not set, skipping Redis test");
            return None;
        }
    };

    let namespace = format!("duo-test:{}", uuid::Uuid::new_v4());
    Some(StoreSettings {
        url,
        waiting_queue_key: format!("{}:waiting_players", namespace),
        room_queue_key: format!("{}:available_rooms", namespace),
        room_keys_prefix: format!("{}:room_keys:", namespace),
        player_channel: format!("{}:player_matches", namespace),
        room_channel: format!("{}:room_ready", namespace),
        max_retry_attempts: 0,
        ..StoreSettings::default()
    })
}

async fn seeded_store(settings: &StoreSettings, players: &[&str], rooms: &[&str]) -> RedisStore {
    let store = RedisStore::connect(settings)
        .await
        .expect("Failed to connect to REDIS_URL");
    for player in players {
        store.enqueue_player(player).await.unwrap();
    }
    for room in rooms {
        store.enqueue_room(room).await.unwrap();
    }
    store
}

async fn list(store: &RedisStore, key: &str) -> Vec<String> {
    let mut conn = store
        .client()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    redis::cmd("LRANGE")
        .arg(key)
        .arg(0)
        .arg(-1)
        .query_async(&mut conn)
        .await
        .unwrap()
}

async fn cleanup(store: &RedisStore, room_ids: &[&str]) {
    let keys = store.keys();
    let mut conn = store
        .client()
        .get_multiplexed_async_connection()
        .await
        .unwrap();

    let mut command = redis::cmd("DEL");
    command.arg(&keys.waiting_queue).arg(&keys.room_queue);
    for room_id in room_ids {
        command.arg(keys.room_keys(room_id));
    }
    let _: i64 = command.query_async(&mut conn).await.unwrap();
}

#[tokio::test]
async fn test_script_matches_newest_pair() {
    let Some(settings) = settings_from_env() else {
        return;
    };
    let store = seeded_store(&settings, &["p1", "p2", "p3", "p4"], &["r1"]).await;

    let allocation = store.allocate_pair_room().await.unwrap();
    assert_eq!(allocation, Some(PairAllocation::new("p4", "p3", "r1")));

    let keys = store.keys();
    assert_eq!(list(&store, &keys.waiting_queue).await, vec!["p1", "p2"]);
    assert!(list(&store, &keys.room_queue).await.is_empty());

    cleanup(&store, &[]).await;
}

#[tokio::test]
async fn test_script_leaves_short_queues_untouched() {
    let Some(settings) = settings_from_env() else {
        return;
    };
    let store = seeded_store(&settings, &["p1"], &["r1"]).await;

    assert_eq!(store.allocate_pair_room().await.unwrap(), None);

    let lengths = store.queue_lengths().await.unwrap();
    assert_eq!(lengths.waiting_players, 1);
    assert_eq!(lengths.available_rooms, 1);

    // Two players but no room is not a match either
    store.enqueue_player("p2").await.unwrap();
    let mut conn = store
        .client()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let _: String = redis::cmd("RPOP")
        .arg(&store.keys().room_queue)
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(store.allocate_pair_room().await.unwrap(), None);
    assert_eq!(store.queue_lengths().await.unwrap().waiting_players, 2);

    cleanup(&store, &[]).await;
}

#[tokio::test]
async fn test_concurrent_scripts_never_share_entries() {
    let Some(settings) = settings_from_env() else {
        return;
    };
    let players: Vec<String> = (0..20).map(|i| format!("player_{}", i)).collect();
    let rooms: Vec<String> = (0..7).map(|i| format!("room_{}", i)).collect();
    let player_refs: Vec<&str> = players.iter().map(String::as_str).collect();
    let room_refs: Vec<&str> = rooms.iter().map(String::as_str).collect();

    let seeder = seeded_store(&settings, &player_refs, &room_refs).await;

    // Separate connections, as separate workers would have
    let mut callers = Vec::new();
    for _ in 0..16 {
        callers.push(Arc::new(RedisStore::connect(&settings).await.unwrap()));
    }

    let attempts = callers.iter().flat_map(|store| {
        (0..2).map(move |_| {
            let store = store.clone();
            async move { store.allocate_pair_room().await }
        })
    });
    let allocations: Vec<PairAllocation> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    assert_eq!(allocations.len(), 7);

    let mut seen_players = HashSet::new();
    let mut seen_rooms = HashSet::new();
    for allocation in &allocations {
        assert!(seen_players.insert(allocation.player1.clone()));
        assert!(seen_players.insert(allocation.player2.clone()));
        assert!(seen_rooms.insert(allocation.room_id.clone()));
    }
    assert_eq!(seen_rooms, rooms.iter().cloned().collect::<HashSet<_>>());

    let lengths = seeder.queue_lengths().await.unwrap();
    assert_eq!(lengths.waiting_players, 6);
    assert_eq!(lengths.available_rooms, 0);

    cleanup(&seeder, &[]).await;
}

#[tokio::test]
async fn test_release_restores_original_order() {
    let Some(settings) = settings_from_env() else {
        return;
    };
    let store = seeded_store(&settings, &["p1", "p2", "p3", "p4"], &["r1", "r2"]).await;

    let allocation = store.allocate_pair_room().await.unwrap().unwrap();
    store.release(&allocation).await.unwrap();

    let keys = store.keys();
    assert_eq!(
        list(&store, &keys.waiting_queue).await,
        vec!["p1", "p2", "p3", "p4"]
    );
    assert_eq!(list(&store, &keys.room_queue).await, vec!["r1", "r2"]);

    // The same entries come out again
    assert_eq!(store.allocate_pair_room().await.unwrap(), Some(allocation));

    cleanup(&store, &[]).await;
}

#[tokio::test]
async fn test_room_keys_round_trip_keeps_extra_fields() {
    let Some(settings) = settings_from_env() else {
        return;
    };
    let store = seeded_store(&settings, &[], &[]).await;

    assert_eq!(store.get_room_keys("r1").await.unwrap(), None);

    let mut conn = store
        .client()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let _: () = redis::cmd("SET")
        .arg(store.keys().room_keys("r1"))
        .arg(r#"{"credentials":["A","B"],"region":"eu-west"}"#)
        .query_async(&mut conn)
        .await
        .unwrap();

    let mut keys = store.get_room_keys("r1").await.unwrap().unwrap();
    assert_eq!(keys.credentials, ["A".to_string(), "B".to_string()]);
    keys.timestamp = 42;
    store.put_room_keys("r1", &keys).await.unwrap();

    let stored: RoomKeySet = store.get_room_keys("r1").await.unwrap().unwrap();
    assert_eq!(stored.timestamp, 42);
    assert_eq!(stored.extra["region"], "eu-west");

    cleanup(&store, &["r1"]).await;
}
