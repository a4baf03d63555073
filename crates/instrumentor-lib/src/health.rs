//! Health tracking for the instrumentor controllers
//!
//! The controller loops report every reconcile outcome here. A controller
//! whose last pass failed is degraded until a pass succeeds again; a stopped
//! watch stream or a missing API client makes the process unhealthy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the process that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Deployment and StatefulSet reconcilers
    WorkloadController,
    /// InstrumentedApplication reconciler
    RecordController,
    KubeClient,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::WorkloadController,
        Component::RecordController,
        Component::KubeClient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkloadController => "workload_controller",
            Self::RecordController => "record_controller",
            Self::KubeClient => "kube_client",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still reconciling, but the latest pass failed
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failed reconcile passes since the last successful one
    #[serde(skip_serializing_if = "is_zero")]
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn starting() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_success: None,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    fn succeeded(&mut self) {
        let now = Utc::now();
        self.status = ComponentStatus::Healthy;
        self.message = None;
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.last_check_timestamp = now.timestamp();
    }

    fn failed(&mut self, status: ComponentStatus, message: String) {
        self.status = status;
        self.message = Some(message);
        self.consecutive_failures += 1;
        self.last_check_timestamp = Utc::now().timestamp();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &BTreeMap<Component, ComponentHealth>) -> ComponentStatus {
        let statuses = components.values().map(|c| c.status);
        if statuses.clone().any(|s| s == ComponentStatus::Unhealthy) {
            ComponentStatus::Unhealthy
        } else if statuses.clone().any(|s| s == ComponentStatus::Degraded) {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct State {
    components: BTreeMap<Component, ComponentHealth>,
    controllers_started: bool,
}

/// Shared view of controller health, cloned into the API and every controller
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every [`Component`] starts out healthy and the process not ready
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::starting()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(State {
                components,
                controllers_started: false,
            })),
        }
    }

    pub async fn reconcile_succeeded(&self, component: Component) {
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&component) {
            health.succeeded();
        }
    }

    pub async fn reconcile_failed(&self, component: Component, message: impl Into<String>) {
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&component) {
            health.failed(ComponentStatus::Degraded, message.into());
        }
    }

    /// The controller's watch stream ended; it will not reconcile again
    pub async fn controller_stopped(&self, component: Component) {
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&component) {
            health.failed(ComponentStatus::Unhealthy, "controller stopped".to_string());
        }
    }

    pub async fn client_failed(&self, message: impl Into<String>) {
        let mut state = self.state.write().await;
        if let Some(health) = state.components.get_mut(&Component::KubeClient) {
            health.failed(ComponentStatus::Unhealthy, message.into());
        }
    }

    pub async fn controllers_started(&self) {
        self.state.write().await.controllers_started = true;
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the controllers run and nothing is unhealthy. A degraded
    /// controller stays ready: failed passes are requeued.
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.controllers_started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Controllers not yet started".to_string()),
            };
        }

        let unhealthy = state
            .components
            .iter()
            .find(|(_, h)| h.status == ComponentStatus::Unhealthy);
        match unhealthy {
            Some((component, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{component} unhealthy: {}",
                    health.message.as_deref().unwrap_or("unknown")
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
