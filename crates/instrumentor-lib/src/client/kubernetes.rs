//! [`ClusterClient`] backed by the Kubernetes API server

use super::{label_selector, ClientError, ClusterClient};
use crate::record::InstrumentedApplication;
use crate::workload::{Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

const RECORD_KIND: &str = "InstrumentedApplication";

/// Live cluster client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn records(&self, namespace: &str) -> Api<InstrumentedApplication> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn list_params(labels: &BTreeMap<String, String>) -> ListParams {
    let selector = label_selector(labels);
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, ClientError> {
        let result = match kind {
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(self.client.clone(), namespace)
                .get(name)
                .await
                .map(Workload::Deployment),
            WorkloadKind::StatefulSet => {
                Api::<StatefulSet>::namespaced(self.client.clone(), namespace)
                    .get(name)
                    .await
                    .map(Workload::StatefulSet)
            }
        };
        result.map_err(|e| ClientError::from_kube(e, kind.as_str(), namespace, name))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClientError> {
        let namespace = workload.namespace();
        let name = workload.name();
        debug!(kind = %workload.kind(), namespace = %namespace, name = %name, "Updating workload");

        let result = match workload {
            Workload::Deployment(d) => Api::<Deployment>::namespaced(self.client.clone(), &namespace)
                .replace(&name, &PostParams::default(), d)
                .await
                .map(Workload::Deployment),
            Workload::StatefulSet(s) => {
                Api::<StatefulSet>::namespaced(self.client.clone(), &namespace)
                    .replace(&name, &PostParams::default(), s)
                    .await
                    .map(Workload::StatefulSet)
            }
        };
        result.map_err(|e| ClientError::from_kube(e, workload.kind().as_str(), &namespace, &name))
    }

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InstrumentedApplication, ClientError> {
        self.records(namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, RECORD_KIND, namespace, name))
    }

    async fn list_records(
        &self,
        namespace: &str,
    ) -> Result<Vec<InstrumentedApplication>, ClientError> {
        let list = self.records(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let namespace = record.namespace().unwrap_or_default();
        self.records(&namespace)
            .create(&PostParams::default(), record)
            .await
            .map_err(|e| ClientError::from_kube(e, RECORD_KIND, &namespace, &record.name_any()))
    }

    async fn update_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let namespace = record.namespace().unwrap_or_default();
        let name = record.name_any();
        self.records(&namespace)
            .replace(&name, &PostParams::default(), record)
            .await
            .map_err(|e| ClientError::from_kube(e, RECORD_KIND, &namespace, &name))
    }

    async fn update_record_status(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let namespace = record.namespace().unwrap_or_default();
        let name = record.name_any();
        let data = serde_json::to_vec(record)?;
        self.records(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| ClientError::from_kube(e, RECORD_KIND, &namespace, &name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ClientError> {
        let list = self.pods(namespace).list(&list_params(labels)).await?;
        Ok(list.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClientError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| ClientError::from_kube(e, "Pod", &namespace, &name))
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod, ClientError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        self.pods(&namespace)
            .replace(&name, &PostParams::default(), pod)
            .await
            .map_err(|e| ClientError::from_kube(e, "Pod", &namespace, &name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(e, "Pod", namespace, name))
    }
}
