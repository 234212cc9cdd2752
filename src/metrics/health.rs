//! Health check endpoints and Prometheus metrics server
//!
//! Every worker serves its own endpoints on the port assigned to its slot.

use crate::matchmaking::WorkerStats;
use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthReport, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9100,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub worker_stats: Option<Arc<RwLock<WorkerStats>>>,
    pub target_period: Duration,
    pub slot: usize,
}

impl HealthServerState {
    async fn report(&self) -> Option<HealthReport> {
        let stats = self.worker_stats.as_ref()?;
        let snapshot = stats.read().await.clone();
        let report = HealthReport::evaluate(&snapshot, self.target_period, chrono::Utc::now());
        self.metrics_collector
            .update_health_status(report.status.as_gauge());
        Some(report)
    }
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    /// Create a new health server
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                worker_stats: None,
                target_period: Duration::from_millis(500),
                slot: 0,
            },
            shutdown_tx,
        }
    }

    /// Attach the worker whose health is reported
    pub fn with_worker(
        mut self,
        stats: Arc<RwLock<WorkerStats>>,
        target_period: Duration,
        slot: usize,
    ) -> Self {
        self.state.worker_stats = Some(stats);
        self.state.target_period = target_period;
        self.state.slot = slot;
        self
    }

    /// Start the health server
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    /// Stop the health server
    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }
        Ok(())
    }
}

/// Root endpoint handler - shows service information
async fn root_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    Json(json!({
        "service": "duo-matchmaker",
        "version": crate::VERSION,
        "slot": state.slot,
        "endpoints": ["/health", "/alive", "/metrics", "/stats"]
    }))
}

/// Health endpoint: 200 while healthy or degraded, 503 otherwise
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    match state.report().await {
        Some(report) => {
            let code = match report.status {
                HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                code,
                Json(json!({
                    "status": report.status,
                    "reasons": report.reasons,
                    "slot": state.slot,
                    "version": crate::VERSION
                })),
            )
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": HealthStatus::Unhealthy,
                "error": "Worker not attached"
            })),
        ),
    }
}

/// Liveness check endpoint handler
async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match state.report().await {
        Some(report) if report.status != HealthStatus::Unhealthy => (StatusCode::OK, "Alive"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}

/// Detailed worker statistics endpoint handler
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match state.report().await {
        Some(report) => (StatusCode::OK, Json(json!(report))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Worker not attached",
                "timestamp": chrono::Utc::now()
            })),
        ),
    }
}
