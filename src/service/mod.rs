//! Service layer for the matchmaker
//!
//! This module contains the worker process bootstrap and the health
//! evaluation served by every worker.

pub mod app;
pub mod health;

pub use app::{ServiceError, WorkerApp};
pub use health::{HealthReport, HealthStatus};
