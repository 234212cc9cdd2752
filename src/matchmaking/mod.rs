//! Matchmaking protocol executed by every worker
//!
//! The allocator pairs two waiting players with a room atomically, the
//! handshake resolves and distributes the room's credentials, the notifier
//! publishes the result, and the worker loop runs the three at a fixed cadence.

pub mod allocator;
pub mod handshake;
pub mod notifier;
pub mod worker;

// Re-export commonly used types
pub use allocator::PairRoomAllocator;
pub use handshake::{assign_credentials, HandshakeConfig, RoomKeyHandshake};
pub use notifier::MatchNotifier;
pub use worker::{next_delay, CadenceConfig, CycleFailure, MatchmakerWorker, WorkerStats};
