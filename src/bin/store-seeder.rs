//! Store Seeder CLI Tool
//!
//! Command-line tool for driving a running matchmaker by hand: it plays the
//! parts of the player front-end and the room provisioner against Redis.
//!
//! Usage:
//!   cargo run --bin store-seeder -- add-players p1 p2 p3 p4
//!   cargo run --bin store-seeder -- add-rooms r1
//!   cargo run --bin store-seeder -- set-keys r1 keyA keyB
//!   cargo run --bin store-seeder -- watch --duration 30
//!   cargo run --bin store-seeder -- stats

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duo_matchmaker::config::StoreSettings;
use duo_matchmaker::store::{CoordinationStore, RedisStore};
use duo_matchmaker::types::{MatchAssignment, RoomKeySet};
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "store-seeder")]
#[command(about = "Seed and observe the duo-matchmaker coordination store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis URL of the coordination store
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    store_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Append players to the waiting queue, in the given order
    AddPlayers {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Append rooms to the room queue, in the given order
    AddRooms {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Write the credential record of a room
    SetKeys {
        room_id: String,
        first: String,
        second: String,
    },
    /// Print published matches
    Watch {
        /// Duration to watch in seconds, 0 watches until interrupted
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
    /// Show queue lengths
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = StoreSettings {
        url: cli.store_url.clone(),
        max_retry_attempts: 0,
        ..StoreSettings::default()
    };
    let store = RedisStore::connect(&settings)
        .await
        .with_context(|| format!("Cannot reach store at {}", settings.url))?;

    match cli.command {
        Commands::AddPlayers { ids } => {
            for id in &ids {
                store.enqueue_player(id).await?;
            }
            println!("Queued {} players", ids.len());
            print_stats(&store).await?;
        }
        Commands::AddRooms { ids } => {
            for id in &ids {
                store.enqueue_room(id).await?;
            }
            println!("Queued {} rooms", ids.len());
            print_stats(&store).await?;
        }
        Commands::SetKeys {
            room_id,
            first,
            second,
        } => {
            store
                .put_room_keys(&room_id, &RoomKeySet::new(first, second))
                .await?;
            println!("Room keys written for room {}", room_id);
        }
        Commands::Watch { duration } => {
            let watch = watch_matches(&store, &settings);
            if duration == 0 {
                watch.await?;
            } else if tokio::time::timeout(Duration::from_secs(duration), watch)
                .await
                .is_err()
            {
                println!("Watch finished after {}s", duration);
            }
        }
        Commands::Stats => print_stats(&store).await?,
    }

    Ok(())
}

async fn print_stats(store: &RedisStore) -> Result<()> {
    let lengths = store.queue_lengths().await?;
    println!(
        "Waiting players: {}, available rooms: {}",
        lengths.waiting_players, lengths.available_rooms
    );
    Ok(())
}

async fn watch_matches(store: &RedisStore, settings: &StoreSettings) -> Result<()> {
    let mut pubsub = store
        .client()
        .get_async_pubsub()
        .await
        .context("Failed to open pub/sub connection")?;
    pubsub.subscribe(&settings.player_channel).await?;
    pubsub.subscribe(&settings.room_channel).await?;

    println!(
        "Watching {} and {}",
        settings.player_channel, settings.room_channel
    );

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = msg.get_payload()?;

        if channel == settings.room_channel {
            println!("room ready: {}", payload);
            continue;
        }

        match serde_json::from_str::<MatchAssignment>(&payload) {
            Ok(assignment) => println!(
                "match {}: {} vs {} in {} (key {})",
                assignment.match_id,
                assignment.player_id,
                assignment.opponent_id,
                assignment.room_id,
                assignment.room_key
            ),
            Err(_) => println!("{}: {}", channel, payload),
        }
    }

    Ok(())
}
