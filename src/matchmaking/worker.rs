//! Per-worker matchmaking loop
//!
//! Each worker process runs exactly one of these loops. An iteration tries to
//! allocate a pair and a room, and on success resolves credentials and
//! publishes the match. Errors never end the loop: they are logged, counted,
//! and the next scheduled iteration acts as the retry. Iterations start every
//! `target_period` regardless of store latency; an iteration that overruns
//! the period is followed immediately by the next one, none are skipped.

use crate::config::AppConfig;
use crate::matchmaking::allocator::PairRoomAllocator;
use crate::matchmaking::handshake::{HandshakeConfig, RoomKeyHandshake};
use crate::matchmaking::notifier::MatchNotifier;
use crate::metrics::{CycleStage, MetricsCollector};
use crate::store::CoordinationStore;
use crate::types::MatchAssignment;
use crate::utils::{current_timestamp, initial_jitter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

/// Timing of the loop
#[derive(Debug, Clone)]
pub struct CadenceConfig {
    /// Target time between iteration starts
    pub target_period: Duration,
    /// Sleep a random fraction of the period before the first iteration
    pub initial_jitter: bool,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            target_period: Duration::from_millis(500),
            initial_jitter: true,
        }
    }
}

/// How long to wait after an iteration that took `elapsed`
pub fn next_delay(target_period: Duration, elapsed: Duration) -> Duration {
    target_period.saturating_sub(elapsed)
}

/// A failed iteration, tagged with the stage that failed
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {error}")]
pub struct CycleFailure {
    pub stage: CycleStage,
    pub error: anyhow::Error,
}

impl CycleFailure {
    fn new(stage: CycleStage, error: anyhow::Error) -> Self {
        Self { stage, error }
    }
}

/// Running counters for one worker, served by the health endpoints
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub matches: u64,
    pub empty_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub last_match_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set while a handshake is waiting for room keys
    pub handshake_pending_since: Option<DateTime<Utc>>,
}

/// The matchmaking loop of one worker
pub struct MatchmakerWorker {
    allocator: PairRoomAllocator,
    handshake: RoomKeyHandshake,
    notifier: MatchNotifier,
    cadence: CadenceConfig,
    metrics: Arc<MetricsCollector>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl MatchmakerWorker {
    /// Assemble a worker from explicit parts
    pub fn new(
        allocator: PairRoomAllocator,
        handshake: RoomKeyHandshake,
        notifier: MatchNotifier,
        cadence: CadenceConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            allocator,
            handshake,
            notifier,
            cadence,
            metrics,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    /// Assemble a worker over a store using application settings
    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        config: &AppConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let allocator = PairRoomAllocator::new(store.clone(), metrics.clone());
        let handshake = RoomKeyHandshake::new(
            store.clone(),
            HandshakeConfig {
                poll_interval: config.handshake_poll_interval(),
                timeout: config.handshake_timeout(),
            },
            metrics.clone(),
        );
        let notifier = MatchNotifier::from_settings(store, &config.store, metrics.clone());
        let cadence = CadenceConfig {
            target_period: config.target_period(),
            initial_jitter: config.matchmaking.initial_jitter,
        };

        Self::new(allocator, handshake, notifier, cadence, metrics)
    }

    pub fn stats(&self) -> Arc<RwLock<WorkerStats>> {
        self.stats.clone()
    }

    pub fn cadence(&self) -> &CadenceConfig {
        &self.cadence
    }

    /// Run forever
    pub async fn run(&self) {
        if self.cadence.initial_jitter {
            let delay = initial_jitter(self.cadence.target_period);
            debug!("Delaying first matchmaking attempt by {:?}", delay);
            sleep(delay).await;
        }

        {
            let mut stats = self.stats.write().await;
            stats.running = true;
            stats.started_at = Some(current_timestamp());
        }
        info!(
            "Matchmaking loop started with a {:?} cadence",
            self.cadence.target_period
        );

        loop {
            let started = Instant::now();
            self.run_cycle_logged().await;
            let elapsed = started.elapsed();

            let delay = next_delay(self.cadence.target_period, elapsed);
            self.metrics.record_cycle(elapsed, delay.is_zero());

            if delay.is_zero() {
                debug!(
                    "Cycle took {:?}, over the {:?} target; starting next one now",
                    elapsed, self.cadence.target_period
                );
                tokio::task::yield_now().await;
            } else {
                sleep(delay).await;
            }
        }
    }

    /// One iteration: allocate, then handshake and notify on success
    pub async fn run_cycle(&self) -> Result<Option<[MatchAssignment; 2]>, CycleFailure> {
        let allocation = match self.allocator.allocate().await {
            Ok(Some(allocation)) => allocation,
            Ok(None) => return Ok(None),
            Err(e) => return Err(CycleFailure::new(CycleStage::Allocate, e)),
        };

        self.stats.write().await.handshake_pending_since = Some(current_timestamp());
        let timer = self.metrics.start_timer();
        let resolved = self.handshake.resolve(&allocation).await;
        self.stats.write().await.handshake_pending_since = None;

        let assignments =
            resolved.map_err(|e| CycleFailure::new(CycleStage::Handshake, e))?;
        let handshake_duration = timer.stop();

        self.notifier
            .notify(&assignments)
            .await
            .map_err(|e| CycleFailure::new(CycleStage::Notify, e))?;

        self.metrics.record_match(handshake_duration);
        Ok(Some(assignments))
    }

    /// Run one iteration and absorb its outcome into logs, metrics and stats
    async fn run_cycle_logged(&self) {
        let outcome = self.run_cycle().await;
        let mut stats = self.stats.write().await;
        stats.cycles += 1;

        match outcome {
            Ok(Some(assignments)) => {
                let [first, second] = &assignments;
                info!(
                    match_id = %first.match_id,
                    room_id = %first.room_id,
                    "Matched '{}' with '{}'",
                    first.player_id,
                    second.player_id
                );
                stats.matches += 1;
                stats.consecutive_failures = 0;
                stats.last_match_at = Some(current_timestamp());
            }
            Ok(None) => {
                stats.empty_cycles += 1;
                stats.consecutive_failures = 0;
            }
            Err(failure) => {
                error!(
                    stage = %failure.stage,
                    "Matchmaking cycle failed: {:#}",
                    failure.error
                );
                self.metrics.record_error(failure.stage);
                stats.failed_cycles += 1;
                stats.consecutive_failures += 1;
                stats.last_error = Some(failure.to_string());
            }
        }
    }
}
