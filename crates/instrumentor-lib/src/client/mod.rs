//! Cluster access used by the reconcilers
//!
//! Reconcilers talk to the API server through the [`ClusterClient`] trait so
//! the same code runs against a live cluster or an in-memory fake in tests.

mod kubernetes;

#[cfg(test)]
pub(crate) mod fake;

pub use kubernetes::KubeClusterClient;

use crate::record::InstrumentedApplication;
use crate::workload::{Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned by a [`ClusterClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: object was modified")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify an API server error for the object being accessed
    pub(crate) fn from_kube(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => Self::Kube(other),
        }
    }
}

/// Operations the reconcilers need from the cluster.
///
/// Updates are optimistic: an object carrying a stale resourceVersion is
/// rejected with [`ClientError::Conflict`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, ClientError>;

    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClientError>;

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InstrumentedApplication, ClientError>;

    async fn list_records(&self, namespace: &str)
        -> Result<Vec<InstrumentedApplication>, ClientError>;

    async fn create_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError>;

    /// Replace metadata and spec; status is left untouched
    async fn update_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError>;

    /// Replace the status subresource
    async fn update_record_status(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError>;

    /// List pods; an empty selector lists every pod in the namespace
    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ClientError>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClientError>;

    async fn update_pod(&self, pod: &Pod) -> Result<Pod, ClientError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError>;
}

/// Render a label map as a selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
