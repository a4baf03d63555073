//! Instrumentor configuration

use anyhow::{Context, Result};
use instrumentor_lib::consts;
use instrumentor_lib::patch::AgentSettings;
use instrumentor_lib::reconcile::DetectorSettings;
use serde::Deserialize;

/// Instrumentor configuration, read from `INSTRUMENTOR_*` variables
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentorConfig {
    /// Namespace the instrumentor runs in; never instrumented
    #[serde(default = "default_current_namespace")]
    pub current_namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_detector_image")]
    pub detector_image: String,

    #[serde(default = "default_detector_tag")]
    pub detector_tag: String,

    /// Remove detector pods once detection finished
    #[serde(default = "default_delete_detection_pods")]
    pub delete_detection_pods: bool,

    /// Collector service host receiving OTLP from the agents
    #[serde(default = "default_monitoring_service_endpoint")]
    pub monitoring_service_endpoint: String,

    #[serde(default = "default_java_agent_image")]
    pub java_agent_image: String,

    #[serde(default = "default_python_agent_image")]
    pub python_agent_image: String,

    #[serde(default = "default_dotnet_agent_image")]
    pub dotnet_agent_image: String,

    #[serde(default = "default_nodejs_agent_image")]
    pub nodejs_agent_image: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn default_current_namespace() -> String {
    consts::current_namespace()
}

fn default_api_port() -> u16 {
    8081
}

fn default_detector_image() -> String {
    "logzio/instrumentation-detector".to_string()
}

fn default_detector_tag() -> String {
    "latest".to_string()
}

fn default_delete_detection_pods() -> bool {
    true
}

fn default_monitoring_service_endpoint() -> String {
    env_or(
        "MONITORING_SERVICE_ENDPOINT",
        "logzio-monitoring-otel-collector.monitoring.svc.cluster.local",
    )
}

fn default_java_agent_image() -> String {
    env_or("JAVA_AGENT_IMAGE", "logzio/otel-agent-java:latest")
}

fn default_python_agent_image() -> String {
    env_or("PYTHON_AGENT_IMAGE", "logzio/otel-agent-python:latest")
}

fn default_dotnet_agent_image() -> String {
    env_or("DOTNET_AGENT_IMAGE", "logzio/otel-agent-dotnet:latest")
}

fn default_nodejs_agent_image() -> String {
    env_or("NODEJS_AGENT_IMAGE", "logzio/otel-agent-nodejs:latest")
}

impl InstrumentorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("INSTRUMENTOR"))
            .build()
            .context("failed to read configuration")?;

        config
            .try_deserialize()
            .context("invalid INSTRUMENTOR_* configuration")
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            monitoring_service_endpoint: self.monitoring_service_endpoint.clone(),
            java_agent_image: self.java_agent_image.clone(),
            python_agent_image: self.python_agent_image.clone(),
            dotnet_agent_image: self.dotnet_agent_image.clone(),
            nodejs_agent_image: self.nodejs_agent_image.clone(),
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            image: self.detector_image.clone(),
            tag: self.detector_tag.clone(),
            delete_detection_pods: self.delete_detection_pods,
        }
    }
}
