//! Metrics collection using Prometheus
//!
//! Each worker process owns one collector; the supervisor does not aggregate.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage of a matchmaking cycle, used as a metric label and in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleStage {
    Allocate,
    Handshake,
    Notify,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Allocate => "allocate",
            CycleStage::Handshake => "handshake",
            CycleStage::Notify => "notify",
        }
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main metrics collector for a matchmaker worker
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Match outcome metrics
    match_metrics: MatchMetrics,

    /// Timing metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Worker uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Handshakes currently waiting for room keys
    pub handshake_pending: IntGauge,
}

/// Match outcome metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Loop iterations by outcome (matched, no_match, error)
    pub attempts_total: IntCounterVec,

    /// Matches fully handed to the notifier
    pub matches_total: IntCounter,

    /// Swallowed errors by cycle stage
    pub errors_total: IntCounterVec,

    /// Messages published by channel kind (player, room)
    pub notifications_total: IntCounterVec,

    /// Allocations put back after a handshake timeout
    pub releases_total: IntCounter,
}

/// Timing metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of the atomic allocation call
    pub allocation_duration: Histogram,

    /// Time spent waiting for and claiming room keys
    pub handshake_duration: Histogram,

    /// Duration of a whole loop iteration
    pub cycle_duration: Histogram,

    /// Iterations that used up the whole target period
    pub cycle_overruns_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record an allocation call and whether it produced a pair
    pub fn record_allocation(&self, matched: bool, duration: Duration) {
        self.performance_metrics
            .allocation_duration
            .observe(duration.as_secs_f64());

        if !matched {
            self.match_metrics
                .attempts_total
                .with_label_values(&["no_match"])
                .inc();
        }
    }

    /// Record a completed match
    pub fn record_match(&self, handshake_duration: Duration) {
        self.performance_metrics
            .handshake_duration
            .observe(handshake_duration.as_secs_f64());
        self.match_metrics
            .attempts_total
            .with_label_values(&["matched"])
            .inc();
        self.match_metrics.matches_total.inc();
    }

    /// Record a swallowed error
    pub fn record_error(&self, stage: CycleStage) {
        self.match_metrics
            .attempts_total
            .with_label_values(&["error"])
            .inc();
        self.match_metrics
            .errors_total
            .with_label_values(&[stage.as_str()])
            .inc();
    }

    /// Record a published message
    pub fn record_notification(&self, channel_kind: &str) {
        self.match_metrics
            .notifications_total
            .with_label_values(&[channel_kind])
            .inc();
    }

    /// Record an allocation returned to the queues
    pub fn record_release(&self) {
        self.match_metrics.releases_total.inc();
    }

    /// Record the duration of one loop iteration
    pub fn record_cycle(&self, duration: Duration, overran: bool) {
        self.performance_metrics
            .cycle_duration
            .observe(duration.as_secs_f64());
        if overran {
            self.performance_metrics.cycle_overruns_total.inc();
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("duo_matchmaker_uptime_seconds", "Worker uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "duo_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let handshake_pending = IntGauge::new(
            "duo_matchmaker_handshake_pending",
            "Handshakes waiting for room keys",
        )?;
        registry.register(Box::new(handshake_pending.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            handshake_pending,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "duo_matchmaker_attempts_total",
                "Matchmaking loop iterations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let matches_total =
            IntCounter::new("duo_matchmaker_matches_total", "Total matches made")?;
        registry.register(Box::new(matches_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new(
                "duo_matchmaker_errors_total",
                "Errors swallowed by the matchmaking loop",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "duo_matchmaker_notifications_total",
                "Messages published by channel",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let releases_total = IntCounter::new(
            "duo_matchmaker_releases_total",
            "Allocations returned to the queues after a handshake timeout",
        )?;
        registry.register(Box::new(releases_total.clone()))?;

        Ok(Self {
            attempts_total,
            matches_total,
            errors_total,
            notifications_total,
            releases_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let allocation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "duo_matchmaker_allocation_duration_seconds",
                "Atomic allocation call duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(allocation_duration.clone()))?;

        let handshake_duration = Histogram::with_opts(
            HistogramOpts::new(
                "duo_matchmaker_handshake_duration_seconds",
                "Time from allocation to claimed room keys",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(handshake_duration.clone()))?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "duo_matchmaker_cycle_duration_seconds",
                "Matchmaking loop iteration duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let cycle_overruns_total = IntCounter::new(
            "duo_matchmaker_cycle_overruns_total",
            "Iterations that exceeded the target period",
        )?;
        registry.register(Box::new(cycle_overruns_total.clone()))?;

        Ok(Self {
            allocation_duration,
            handshake_duration,
            cycle_duration,
            cycle_overruns_total,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
