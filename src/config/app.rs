//! Main application configuration
//!
//! This module defines the primary configuration structures for the matchmaker,
//! including environment variable loading, TOML file loading and validation.

use crate::error::MatchmakingError;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Size of the worker pool, 0 means one per logical CPU
    pub workers: usize,
    /// Serve health and metrics endpoints from each worker
    pub metrics_enabled: bool,
    /// Base port for the health server; worker slot N binds base + N
    pub metrics_port: u16,
}

/// Coordination store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Redis URL
    pub url: String,
    /// List holding waiting player IDs
    pub waiting_queue_key: String,
    /// List holding available room IDs
    pub room_queue_key: String,
    /// Prefix of the per-room credential record key
    pub room_keys_prefix: String,
    /// Channel receiving one JSON assignment per matched player
    pub player_channel: String,
    /// Channel receiving the bare room ID of each match
    pub room_channel: String,
    /// Connection timeout in seconds
    pub connection_timeout_seconds: u64,
    /// Extra connection attempts before the worker gives up
    pub max_retry_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub retry_delay_ms: u64,
}

/// Matchmaking loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Target duration of one loop iteration in milliseconds
    pub target_period_ms: u64,
    /// Interval between room key lookups during the handshake
    pub handshake_poll_interval_ms: u64,
    /// Give up on a room after this long and requeue its players, 0 waits forever
    pub handshake_timeout_ms: u64,
    /// Delay the first iteration by a random fraction of the period
    pub initial_jitter: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "duo-matchmaker".to_string(),
            log_level: "info".to_string(),
            workers: 0,
            metrics_enabled: true,
            metrics_port: 9100,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            waiting_queue_key: "matchmaking:waiting_players".to_string(),
            room_queue_key: "matchmaking:available_rooms".to_string(),
            room_keys_prefix: "room_keys:".to_string(),
            player_channel: "matchmaking:player_matches".to_string(),
            room_channel: "matchmaking:room_ready".to_string(),
            connection_timeout_seconds: 5,
            max_retry_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl StoreSettings {
    /// Get store connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    /// Get the delay before the first connection retry as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            target_period_ms: 500,
            handshake_poll_interval_ms: 100,
            handshake_timeout_ms: 0,
            initial_jitter: true,
        }
    }
}

/// Overwrite `target` with the parsed value of `key` when it is set
fn parse_env<T: std::str::FromStr>(key: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", key, raw))?;
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        parse_env("SERVICE_NAME", &mut self.service.name)?;
        parse_env("LOG_LEVEL", &mut self.service.log_level)?;
        parse_env("WORKERS", &mut self.service.workers)?;
        parse_env("METRICS_ENABLED", &mut self.service.metrics_enabled)?;
        parse_env("METRICS_PORT", &mut self.service.metrics_port)?;

        // Store settings
        parse_env("REDIS_URL", &mut self.store.url)?;
        parse_env("WAITING_QUEUE_KEY", &mut self.store.waiting_queue_key)?;
        parse_env("ROOM_QUEUE_KEY", &mut self.store.room_queue_key)?;
        parse_env("ROOM_KEYS_PREFIX", &mut self.store.room_keys_prefix)?;
        parse_env("PLAYER_CHANNEL", &mut self.store.player_channel)?;
        parse_env("ROOM_CHANNEL", &mut self.store.room_channel)?;
        parse_env(
            "STORE_CONNECTION_TIMEOUT_SECONDS",
            &mut self.store.connection_timeout_seconds,
        )?;
        parse_env("STORE_MAX_RETRY_ATTEMPTS", &mut self.store.max_retry_attempts)?;
        parse_env("STORE_RETRY_DELAY_MS", &mut self.store.retry_delay_ms)?;

        // Matchmaking settings
        parse_env("TARGET_PERIOD_MS", &mut self.matchmaking.target_period_ms)?;
        parse_env(
            "HANDSHAKE_POLL_INTERVAL_MS",
            &mut self.matchmaking.handshake_poll_interval_ms,
        )?;
        parse_env(
            "HANDSHAKE_TIMEOUT_MS",
            &mut self.matchmaking.handshake_timeout_ms,
        )?;
        parse_env("INITIAL_JITTER", &mut self.matchmaking.initial_jitter)?;

        Ok(())
    }

    /// Number of workers to run, resolving 0 to the logical CPU count
    pub fn worker_count(&self) -> usize {
        if self.service.workers > 0 {
            return self.service.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Health server port for a given worker slot, `None` past the port range
    pub fn metrics_port_for_slot(&self, slot: usize) -> Option<u16> {
        u16::try_from(slot)
            .ok()
            .and_then(|offset| self.service.metrics_port.checked_add(offset))
    }

    /// Get the loop cadence as Duration
    pub fn target_period(&self) -> Duration {
        Duration::from_millis(self.matchmaking.target_period_ms)
    }

    /// Get handshake poll interval as Duration
    pub fn handshake_poll_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.handshake_poll_interval_ms)
    }

    /// Bound on the handshake wait, `None` when unbounded
    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.matchmaking.handshake_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Configuration error carrying a formatted message
macro_rules! invalid {
    ($($arg:tt)*) => {
        anyhow::Error::from(MatchmakingError::ConfigurationError {
            message: format!($($arg)*),
        })
    };
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(invalid!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.metrics_enabled {
        if config.service.metrics_port == 0 {
            return Err(invalid!("Metrics port cannot be 0"));
        }
        let last_slot = config.worker_count().saturating_sub(1);
        if config.metrics_port_for_slot(last_slot).is_none() {
            return Err(invalid!(
                "Metrics ports {} + {} workers exceed the port range",
                config.service.metrics_port,
                config.worker_count()
            ));
        }
    }

    // Validate store settings
    if config.store.url.is_empty() {
        return Err(invalid!("Store URL cannot be empty"));
    }
    if config.store.waiting_queue_key.is_empty() || config.store.room_queue_key.is_empty() {
        return Err(invalid!("Queue keys cannot be empty"));
    }
    if config.store.waiting_queue_key == config.store.room_queue_key {
        return Err(invalid!("Waiting queue and room queue must be different keys"));
    }
    if config.store.player_channel.is_empty() || config.store.room_channel.is_empty() {
        return Err(invalid!("Channel names cannot be empty"));
    }
    if config.store.connection_timeout_seconds == 0 {
        return Err(invalid!("Store connection timeout must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.target_period_ms == 0 {
        return Err(invalid!("Target period must be greater than 0"));
    }
    if config.matchmaking.handshake_poll_interval_ms == 0 {
        return Err(invalid!("Handshake poll interval must be greater than 0"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.target_period(), Duration::from_millis(500));
        assert_eq!(config.handshake_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.handshake_timeout(), None);
    }

    #[test]
    fn test_worker_count_resolves_cpus() {
        let mut config = AppConfig::default();
        assert!(config.worker_count() >= 1);

        config.service.workers = 3;
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn test_metrics_port_offset_by_slot() {
        let config = AppConfig::default();
        assert_eq!(config.metrics_port_for_slot(0), Some(9100));
        assert_eq!(config.metrics_port_for_slot(7), Some(9107));
    }

    #[test]
    fn test_metrics_ports_past_range_rejected() {
        let mut config = AppConfig::default();
        config.service.metrics_port = 65_530;
        config.service.workers = 6;
        assert_eq!(config.metrics_port_for_slot(5), Some(65_535));
        assert!(validate_config(&config).is_ok());

        config.service.workers = 7;
        assert_eq!(config.metrics_port_for_slot(6), None);
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::ConfigurationError { .. })
        ));

        // A slot index that does not fit in a port offset never wraps
        assert_eq!(config.metrics_port_for_slot(70_000), None);

        config.service.metrics_enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_store_durations() {
        let store = StoreSettings::default();
        assert_eq!(store.connection_timeout(), Duration::from_secs(5));
        assert_eq!(store.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.matchmaking.target_period_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.service.log_level = "chatty".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.store.room_queue_key = config.store.waiting_queue_key.clone();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.service.metrics_enabled = false;
        config.service.metrics_port = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [matchmaking]
            target_period_ms = 250
            handshake_timeout_ms = 3000

            [store]
            url = "redis://cache:6379/"
            "#,
        )
        .unwrap();

        assert_eq!(config.target_period(), Duration::from_millis(250));
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.store.url, "redis://cache:6379/");
        assert_eq!(config.store.room_keys_prefix, "room_keys:");
        assert_eq!(config.service.name, "duo-matchmaker");
    }
}
