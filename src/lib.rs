//! Duo Matchmaker - pairs waiting players into game rooms
//!
//! A pool of identical worker processes shares two queues in an external
//! coordination store: players waiting for an opponent and rooms ready to
//! host a game. Each worker atomically takes two players and one room,
//! hands each player one of the room's credentials, and publishes the match.

pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaking::MatchmakerWorker;
pub use store::{CoordinationStore, InMemoryStore, RedisStore};
pub use supervisor::{ProcessLauncher, WorkerLauncher, WorkerPool};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
