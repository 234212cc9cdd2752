//! Worker process bootstrap
//!
//! A worker connects to the coordination store, starts its metrics
//! endpoints and a gauge refresh task, then runs the matchmaking loop until
//! the process is killed.

use crate::config::AppConfig;
use crate::error::{STARTUP_FAILURE_EXIT_CODE, STORE_CONNECTION_EXIT_CODE};
use crate::matchmaking::MatchmakerWorker;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::HealthReport;
use crate::store::{CoordinationStore, RedisStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info};

/// How often uptime and health gauges are refreshed
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store connection error: {message}")]
    StoreConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

impl ServiceError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceError::StoreConnection { .. } => STORE_CONNECTION_EXIT_CODE,
            _ => STARTUP_FAILURE_EXIT_CODE,
        }
    }
}

/// Everything one worker process runs
pub struct WorkerApp {
    config: AppConfig,
    slot: usize,
    metrics_port: u16,
    worker: Arc<MatchmakerWorker>,
    metrics_service: Arc<MetricsService>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl WorkerApp {
    /// Connect to the configured store and assemble the worker
    pub async fn connect(config: AppConfig, slot: usize) -> Result<Self, ServiceError> {
        info!("Connecting to coordination store at {}", config.store.url);

        let store = RedisStore::connect(&config.store).await.map_err(|e| {
            ServiceError::StoreConnection {
                message: format!("{:#}", e),
            }
        })?;

        Self::with_store(config, slot, Arc::new(store))
    }

    /// Assemble the worker over an already connected store
    pub fn with_store(
        config: AppConfig,
        slot: usize,
        store: Arc<dyn CoordinationStore>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let worker = Arc::new(MatchmakerWorker::from_config(
            store,
            &config,
            metrics_collector.clone(),
        ));

        let metrics_port = match config.metrics_port_for_slot(slot) {
            Some(port) => port,
            None if !config.service.metrics_enabled => config.service.metrics_port,
            None => {
                return Err(ServiceError::Configuration {
                    message: format!(
                        "No metrics port for slot {} above base {}",
                        slot, config.service.metrics_port
                    ),
                })
            }
        };

        let health_config = HealthServerConfig {
            port: metrics_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_worker(
                worker.stats(),
                config.target_period(),
                slot,
            ),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(Self {
            config,
            slot,
            metrics_port,
            worker,
            metrics_service,
            background_tasks: Vec::new(),
        })
    }

    pub fn worker(&self) -> Arc<MatchmakerWorker> {
        self.worker.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Start background tasks and run the matchmaking loop
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        if self.config.service.metrics_enabled {
            self.start_metrics_service();
        } else {
            debug!("Metrics endpoints disabled");
        }
        self.start_gauge_refresh();

        self.worker.run().await;
        Ok(())
    }

    /// Stop the metrics endpoints and background tasks
    pub async fn shutdown(&mut self) {
        info!("Shutting down worker in slot {}", self.slot);

        if let Err(e) = self.metrics_service.stop().await {
            error!("Failed to stop metrics service: {}", e);
        }
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
    }

    fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service on port {} failed: {:#}", port, e);
            }
        });
        self.background_tasks.push(metrics_handle);
    }

    fn start_gauge_refresh(&mut self) {
        let collector = self.metrics_service.collector();
        let stats = self.worker.stats();
        let target_period = self.config.target_period();
        let started = Instant::now();

        let refresh_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
            loop {
                interval.tick().await;

                let snapshot = stats.read().await.clone();
                let report =
                    HealthReport::evaluate(&snapshot, target_period, chrono::Utc::now());
                collector
                    .service()
                    .uptime_seconds
                    .set(started.elapsed().as_secs() as i64);
                collector.update_health_status(report.status.as_gauge());

                debug!(
                    "Worker status {}: {} cycles, {} matches",
                    report.status, snapshot.cycles, snapshot.matches
                );
            }
        });
        self.background_tasks.push(refresh_task);
    }
}

impl Drop for WorkerApp {
    fn drop(&mut self) {
        for task in &self.background_tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_exit_codes() {
        let store = ServiceError::StoreConnection {
            message: "refused".to_string(),
        };
        let init = ServiceError::Initialization {
            message: "boom".to_string(),
        };
        assert_eq!(store.exit_code(), 2);
        assert_eq!(init.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_with_store_wires_worker() {
        let store = Arc::new(InMemoryStore::seeded(["p1", "p2"], ["r1"]));
        let app = WorkerApp::with_store(AppConfig::default(), 1, store.clone()).unwrap();

        assert_eq!(
            app.worker().cadence().target_period,
            Duration::from_millis(500)
        );
        store.put_room_keys("r1", &crate::types::RoomKeySet::new("A", "B")).await.unwrap();

        let outcome = app.worker().run_cycle().await.unwrap();
        assert!(outcome.is_some());
        assert!(store.waiting_players().is_empty());
    }

    #[test]
    fn test_slot_past_port_range_is_a_configuration_error() {
        let mut config = AppConfig::default();
        config.service.metrics_port = 65_535;
        let store = Arc::new(InMemoryStore::new());

        let err = WorkerApp::with_store(config.clone(), 1, store.clone()).err().unwrap();
        assert!(matches!(err, ServiceError::Configuration { .. }));
        assert_eq!(err.exit_code(), STARTUP_FAILURE_EXIT_CODE);

        config.service.metrics_enabled = false;
        assert!(WorkerApp::with_store(config, 1, store).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_store_maps_to_exit_code_two() {
        let mut config = AppConfig::default();
        config.store.url = "redis://127.0.0.1:1/".to_string();
        config.store.max_retry_attempts = 0;
        config.store.connection_timeout_seconds = 1;

        let err = WorkerApp::connect(config, 0).await.err().unwrap();
        assert_eq!(err.exit_code(), STORE_CONNECTION_EXIT_CODE);
    }
}
