//! Kubernetes instrumentor - automatic telemetry agent injection
//!
//! This binary runs as a Deployment in the monitoring namespace, detecting
//! the languages of workloads and patching their pod templates with
//! OpenTelemetry agents on request.

use anyhow::{Context as _, Result};
use instrumentor_lib::{
    client::KubeClusterClient,
    health::HealthRegistry,
    observability::{InstrumentorMetrics, StructuredLogger},
    patch::PatchEngine,
    reconcile::{DetectionReconciler, WorkloadReconciler},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod controllers;

const INSTRUMENTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting instrumentor");

    let config = config::InstrumentorConfig::load()?;
    info!(
        namespace = %config.current_namespace,
        detector_image = %config.detector_image,
        detector_tag = %config.detector_tag,
        delete_detection_pods = config.delete_detection_pods,
        "Instrumentor configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = InstrumentorMetrics::new();
    let logger = StructuredLogger::new(&config.current_namespace);
    logger.log_startup(INSTRUMENTOR_VERSION);

    // Health and metrics are served before the cluster connection so probes
    // can report a failing client
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let client = match kube::Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            health_registry.client_failed(e.to_string()).await;
            return Err(e).context("failed to create Kubernetes client");
        }
    };
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));

    let ctx = Arc::new(controllers::Context {
        workloads: WorkloadReconciler::new(
            cluster.clone(),
            PatchEngine::new(config.agent_settings()),
            config.current_namespace.clone(),
            metrics.clone(),
            logger.clone(),
        ),
        detection: DetectionReconciler::new(
            cluster,
            config.detector_settings(),
            metrics.clone(),
            logger.clone(),
        ),
        health: health_registry.clone(),
    });

    health_registry.controllers_started().await;

    tokio::select! {
        _ = controllers::run(client, ctx) => {
            logger.log_shutdown("controllers stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
        }
    }

    api_handle.abort();
    info!("Shutting down");
    Ok(())
}
