//! Health evaluation for a worker
//!
//! Health is derived from the loop's own counters: a loop that is not running
//! is unhealthy, one that keeps failing or sits on a stalled handshake is
//! degraded.

use crate::matchmaking::WorkerStats;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consecutive failed cycles before a worker reports degraded
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// A handshake pending longer than this many periods counts as stalled
pub const STALLED_HANDSHAKE_PERIODS: u32 = 20;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form exported as a gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall worker status
    pub status: HealthStatus,
    /// Why the worker is not healthy, if it is not
    pub reasons: Vec<String>,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    /// Loop counters the status was derived from
    pub stats: WorkerStats,
}

impl HealthReport {
    /// Evaluate a stats snapshot
    pub fn evaluate(stats: &WorkerStats, target_period: Duration, now: DateTime<Utc>) -> Self {
        let mut reasons = Vec::new();
        let mut status = HealthStatus::Healthy;

        if !stats.running {
            status = HealthStatus::Unhealthy;
            reasons.push("Matchmaking loop is not running".to_string());
        }

        if stats.consecutive_failures >= DEGRADED_AFTER_FAILURES {
            reasons.push(format!(
                "{} consecutive cycles failed",
                stats.consecutive_failures
            ));
            if status == HealthStatus::Healthy {
                status = HealthStatus::Degraded;
            }
        }

        if let Some(since) = stats.handshake_pending_since {
            let stall_limit = target_period * STALLED_HANDSHAKE_PERIODS;
            let pending = (now - since).to_std().unwrap_or_default();
            if pending > stall_limit {
                reasons.push(format!(
                    "Handshake waiting for room keys for {}s",
                    pending.as_secs()
                ));
                if status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
            }
        }

        Self {
            status,
            reasons,
            timestamp: now,
            stats: stats.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health report: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_stats() -> WorkerStats {
        WorkerStats {
            running: true,
            started_at: Some(Utc::now()),
            ..WorkerStats::default()
        }
    }

    #[test]
    fn test_idle_running_worker_is_healthy() {
        let report = HealthReport::evaluate(&running_stats(), Duration::from_millis(500), Utc::now());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn test_stopped_worker_is_unhealthy() {
        let report =
            HealthReport::evaluate(&WorkerStats::default(), Duration::from_millis(500), Utc::now());
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_repeated_failures_degrade() {
        let stats = WorkerStats {
            consecutive_failures: DEGRADED_AFTER_FAILURES,
            ..running_stats()
        };
        let report = HealthReport::evaluate(&stats, Duration::from_millis(500), Utc::now());
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_stalled_handshake_degrades() {
        let now = Utc::now();
        let stats = WorkerStats {
            handshake_pending_since: Some(now - chrono::Duration::seconds(30)),
            ..running_stats()
        };

        let report = HealthReport::evaluate(&stats, Duration::from_millis(500), now);
        assert_eq!(report.status, HealthStatus::Degraded);

        let fresh = WorkerStats {
            handshake_pending_since: Some(now - chrono::Duration::seconds(1)),
            ..running_stats()
        };
        let report = HealthReport::evaluate(&fresh, Duration::from_millis(500), now);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
        assert_eq!(HealthStatus::Unhealthy.as_gauge(), 0);
    }
}
