//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Exit status of a worker that could not reach the coordination store at startup
pub const STORE_CONNECTION_EXIT_CODE: i32 = 2;

/// Exit status for configuration and other startup failures
pub const STARTUP_FAILURE_EXIT_CODE: i32 = 1;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Store connection failed: {message}")]
    StoreConnectionFailed { message: String },

    #[error("Store operation '{operation}' failed: {message}")]
    StoreOperationFailed { operation: String, message: String },

    #[error("Invalid room keys for room {room_id}: {reason}")]
    InvalidRoomKeys { room_id: String, reason: String },

    #[error("Room keys for room {room_id} did not appear within {waited_ms}ms")]
    HandshakeTimedOut { room_id: String, waited_ms: u64 },

    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Failed to spawn worker for slot {slot}: {message}")]
    WorkerSpawnFailed { slot: usize, message: String },
}

impl MatchmakingError {
    /// Shorthand for wrapping a store client error
    pub fn store_op(operation: &str, error: impl std::fmt::Display) -> Self {
        MatchmakingError::StoreOperationFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }
}
