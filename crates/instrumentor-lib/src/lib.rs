//! Instrumentor library for Kubernetes workload auto-instrumentation
//!
//! This crate provides the core functionality for:
//! - Process sampling and language/application detection inside detector pods
//! - Pod template patching for per-language telemetry agents
//! - Reconciliation of workloads and their InstrumentedApplication records
//! - Health checks and observability

pub mod annotations;
pub mod client;
pub mod consts;
pub mod detection;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod patch;
pub mod reconcile;
pub mod record;
pub mod workload;

pub use error::{DetectionError, PatchError, ReconcileError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{InstrumentorMetrics, StructuredLogger};
pub use record::{DetectionPhase, InstrumentedApplication, InstrumentedApplicationSpec};
