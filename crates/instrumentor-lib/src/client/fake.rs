//! In-memory [`ClusterClient`] for reconciler tests
//!
//! Enforces optimistic concurrency on resourceVersion, assigns uids and
//! resolves generateName the way the API server does.

use super::{ClientError, ClusterClient};
use crate::record::InstrumentedApplication;
use crate::workload::{Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

type Key = (String, String);

#[derive(Default)]
struct State {
    deployments: BTreeMap<Key, Deployment>,
    statefulsets: BTreeMap<Key, StatefulSet>,
    records: BTreeMap<Key, InstrumentedApplication>,
    pods: BTreeMap<Key, Pod>,
    revision: u64,
    failing_workload_updates: u32,
    workload_updates: u32,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn conflict(kind: &'static str, key: &Key) -> ClientError {
    ClientError::Conflict {
        kind,
        namespace: key.0.clone(),
        name: key.1.clone(),
    }
}

fn not_found(kind: &'static str, key: &Key) -> ClientError {
    ClientError::NotFound {
        kind,
        namespace: key.0.clone(),
        name: key.1.clone(),
    }
}

/// Reject writes that carry a stale resourceVersion
fn check_revision(
    kind: &'static str,
    key: &Key,
    stored: &ObjectMeta,
    incoming: &ObjectMeta,
) -> Result<(), ClientError> {
    match &incoming.resource_version {
        Some(rv) if Some(rv) != stored.resource_version.as_ref() => Err(conflict(kind, key)),
        _ => Ok(()),
    }
}

fn labels_match(meta: &ObjectMeta, selector: &BTreeMap<String, String>) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn admit(state: &mut State, meta: &mut ObjectMeta) {
        if meta.name.is_none() {
            let prefix = meta.generate_name.clone().unwrap_or_default();
            meta.name = Some(format!("{prefix}{:05}", state.revision + 1));
        }
        let revision = state.next_revision();
        meta.uid = Some(format!("uid-{revision}"));
        meta.resource_version = Some(revision);
    }

    pub fn insert_workload(&self, workload: Workload) -> Workload {
        let mut state = self.state();
        match workload {
            Workload::Deployment(mut d) => {
                Self::admit(&mut state, &mut d.metadata);
                state.deployments.insert(key(&d.metadata), d.clone());
                Workload::Deployment(d)
            }
            Workload::StatefulSet(mut s) => {
                Self::admit(&mut state, &mut s.metadata);
                state.statefulsets.insert(key(&s.metadata), s.clone());
                Workload::StatefulSet(s)
            }
        }
    }

    pub fn insert_record(&self, mut record: InstrumentedApplication) -> InstrumentedApplication {
        let mut state = self.state();
        Self::admit(&mut state, &mut record.metadata);
        state.records.insert(key(&record.metadata), record.clone());
        record
    }

    pub fn insert_pod(&self, mut pod: Pod) -> Pod {
        let mut state = self.state();
        Self::admit(&mut state, &mut pod.metadata);
        state.pods.insert(key(&pod.metadata), pod.clone());
        pod
    }

    /// Change a stored workload as another writer would, bumping its revision
    pub fn modify_workload(&self, kind: WorkloadKind, namespace: &str, name: &str, f: impl FnOnce(&mut Workload)) {
        let mut state = self.state();
        let k = (namespace.to_string(), name.to_string());
        let revision = state.next_revision();
        match kind {
            WorkloadKind::Deployment => {
                let stored = state.deployments.get(&k).cloned().unwrap();
                let mut workload = Workload::Deployment(stored);
                f(&mut workload);
                if let Workload::Deployment(mut d) = workload {
                    d.metadata.resource_version = Some(revision);
                    state.deployments.insert(k, d);
                }
            }
            WorkloadKind::StatefulSet => {
                let stored = state.statefulsets.get(&k).cloned().unwrap();
                let mut workload = Workload::StatefulSet(stored);
                f(&mut workload);
                if let Workload::StatefulSet(mut s) = workload {
                    s.metadata.resource_version = Some(revision);
                    state.statefulsets.insert(k, s);
                }
            }
        }
    }

    /// Change a stored pod as the kubelet would
    pub fn modify_pod(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Pod)) {
        let mut state = self.state();
        let k = (namespace.to_string(), name.to_string());
        let revision = state.next_revision();
        let pod = state.pods.get_mut(&k).unwrap();
        f(pod);
        pod.metadata.resource_version = Some(revision);
    }

    /// Make the next `count` workload updates fail with a conflict
    pub fn fail_workload_updates(&self, count: u32) {
        self.state().failing_workload_updates = count;
    }

    pub fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Workload {
        let state = self.state();
        let k = (namespace.to_string(), name.to_string());
        match kind {
            WorkloadKind::Deployment => Workload::Deployment(state.deployments[&k].clone()),
            WorkloadKind::StatefulSet => Workload::StatefulSet(state.statefulsets[&k].clone()),
        }
    }

    pub fn workload_update_count(&self) -> u32 {
        self.state().workload_updates
    }

    pub fn records(&self, namespace: &str) -> Vec<InstrumentedApplication> {
        self.state()
            .records
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        self.state()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, ClientError> {
        let state = self.state();
        let k = (namespace.to_string(), name.to_string());
        match kind {
            WorkloadKind::Deployment => state.deployments.get(&k).cloned().map(Workload::Deployment),
            WorkloadKind::StatefulSet => {
                state.statefulsets.get(&k).cloned().map(Workload::StatefulSet)
            }
        }
        .ok_or_else(|| not_found(kind.as_str(), &k))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClientError> {
        let mut state = self.state();
        let k = key(workload.meta());
        let kind = workload.kind().as_str();
        if state.failing_workload_updates > 0 {
            state.failing_workload_updates -= 1;
            return Err(conflict(kind, &k));
        }

        let stored_meta = match workload {
            Workload::Deployment(_) => state.deployments.get(&k).map(|d| d.metadata.clone()),
            Workload::StatefulSet(_) => state.statefulsets.get(&k).map(|s| s.metadata.clone()),
        }
        .ok_or_else(|| not_found(kind, &k))?;
        check_revision(kind, &k, &stored_meta, workload.meta())?;

        let revision = state.next_revision();
        state.workload_updates += 1;
        match workload.clone() {
            Workload::Deployment(mut d) => {
                d.metadata.resource_version = Some(revision);
                d.status = state.deployments[&k].status.clone();
                state.deployments.insert(k, d.clone());
                Ok(Workload::Deployment(d))
            }
            Workload::StatefulSet(mut s) => {
                s.metadata.resource_version = Some(revision);
                s.status = state.statefulsets[&k].status.clone();
                state.statefulsets.insert(k, s.clone());
                Ok(Workload::StatefulSet(s))
            }
        }
    }

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InstrumentedApplication, ClientError> {
        let k = (namespace.to_string(), name.to_string());
        self.state()
            .records
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("InstrumentedApplication", &k))
    }

    async fn list_records(
        &self,
        namespace: &str,
    ) -> Result<Vec<InstrumentedApplication>, ClientError> {
        Ok(self.records(namespace))
    }

    async fn create_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let mut state = self.state();
        let k = key(&record.metadata);
        if state.records.contains_key(&k) {
            return Err(ClientError::AlreadyExists {
                kind: "InstrumentedApplication",
                namespace: k.0,
                name: k.1,
            });
        }
        let mut created = record.clone();
        created.status = None;
        Self::admit(&mut state, &mut created.metadata);
        state.records.insert(k, created.clone());
        Ok(created)
    }

    async fn update_record(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let mut state = self.state();
        let k = key(&record.metadata);
        let stored = state
            .records
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("InstrumentedApplication", &k))?;
        check_revision("InstrumentedApplication", &k, &stored.metadata, &record.metadata)?;

        let mut updated = record.clone();
        updated.status = stored.status;
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.resource_version = Some(state.next_revision());
        state.records.insert(k, updated.clone());
        Ok(updated)
    }

    async fn update_record_status(
        &self,
        record: &InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ClientError> {
        let mut state = self.state();
        let k = key(&record.metadata);
        let mut stored = state
            .records
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("InstrumentedApplication", &k))?;
        check_revision("InstrumentedApplication", &k, &stored.metadata, &record.metadata)?;

        stored.status = record.status.clone();
        stored.metadata.resource_version = Some(state.next_revision());
        state.records.insert(k, stored.clone());
        Ok(stored)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ClientError> {
        Ok(self
            .pods(namespace)
            .into_iter()
            .filter(|p| labels_match(&p.metadata, labels))
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, ClientError> {
        let mut state = self.state();
        let mut created = pod.clone();
        created.status = None;
        Self::admit(&mut state, &mut created.metadata);
        state.pods.insert(key(&created.metadata), created.clone());
        Ok(created)
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod, ClientError> {
        let mut state = self.state();
        let k = key(&pod.metadata);
        let stored = state
            .pods
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found("Pod", &k))?;
        check_revision("Pod", &k, &stored.metadata, &pod.metadata)?;

        let mut updated = pod.clone();
        updated.status = stored.status;
        updated.metadata.resource_version = Some(state.next_revision());
        state.pods.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let k = (namespace.to_string(), name.to_string());
        self.state()
            .pods
            .remove(&k)
            .map(|_| ())
            .ok_or_else(|| not_found("Pod", &k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> InstrumentedApplication {
        let mut record = InstrumentedApplication::new(name, Default::default());
        record.metadata.namespace = Some("shop".into());
        record
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let cluster = FakeCluster::new();
        let created = cluster.create_record(&record("checkout")).await.unwrap();

        let mut first = created.clone();
        first.spec.log_type = "nginx".into();
        cluster.update_record(&first).await.unwrap();

        let mut stale = created;
        stale.spec.log_type = "mysql".into();
        let err = cluster.update_record(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_drops_status_and_generates_name() {
        let cluster = FakeCluster::new();
        let mut r = record("checkout");
        r.status_mut().traces_instrumented = true;
        let created = cluster.create_record(&r).await.unwrap();
        assert!(created.status.is_none());

        let pod = Pod {
            metadata: ObjectMeta {
                generate_name: Some("checkout-instrumentation-detection-".into()),
                namespace: Some("shop".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = cluster.create_pod(&pod).await.unwrap();
        assert!(created
            .name_any()
            .starts_with("checkout-instrumentation-detection-"));
    }
}
