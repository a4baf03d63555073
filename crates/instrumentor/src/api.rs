//! Probe and metrics endpoints of the instrumentor
//!
//! `/healthz` fails only when a controller stopped or the cluster client is
//! gone; failed reconcile passes show up as `degraded` and keep the pod alive.

use anyhow::Context as _;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use instrumentor_lib::{
    health::{Component, HealthRegistry},
    observability::InstrumentorMetrics,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    /// Held so the collectors are registered before the first scrape
    pub metrics: InstrumentorMetrics,
}

impl AppState {
    pub fn new(health: HealthRegistry, metrics: InstrumentorMetrics) -> Self {
        Self { health, metrics }
    }
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;
    (probe_status(health.status.is_operational()), Json(health))
}

/// Health of a single component, e.g. `/healthz/record_controller`
async fn component_health(
    State(state): State<Arc<AppState>>,
    Path(component): Path<Component>,
) -> Response {
    match state.health.component(component).await {
        Some(health) => (probe_status(health.status.is_operational()), Json(health)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;
    (probe_status(readiness.ready), Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/healthz/:component", get(component_health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API server to {addr}"))?;
    info!(addr = %addr, "Serving probes and metrics");

    axum::serve(listener, create_router(state))
        .await
        .context("API server failed")
}
