//! Application type annotation for pods of a detected workload

use crate::annotations;
use crate::client::{ClientError, ClusterClient};
use crate::consts::is_ignored_namespace;
use crate::record::InstrumentedApplication;
use crate::workload::Workload;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Labels that name the workload a pod belongs to
const OWNER_LABELS: &[&str] = &["app", "app.kubernetes.io/name"];

/// Writes the detected application type onto a workload's running pods
#[derive(Debug, Clone)]
pub struct AnnotationPatcher {
    own_namespace: String,
}

impl AnnotationPatcher {
    pub fn new(own_namespace: impl Into<String>) -> Self {
        Self {
            own_namespace: own_namespace.into(),
        }
    }

    /// Objects opted out, already annotated, or in ignored namespaces are left alone
    pub fn should_patch(&self, annotations: Option<&BTreeMap<String, String>>, namespace: &str) -> bool {
        if annotations::has_value(annotations, annotations::SKIP_APP_DETECTION, annotations::TRUE) {
            return false;
        }
        if annotations
            .map(|a| a.contains_key(annotations::APPLICATION_TYPE))
            .unwrap_or(false)
        {
            return false;
        }
        !is_ignored_namespace(namespace, &self.own_namespace)
    }

    /// Annotate the workload's pods with the first detected application.
    /// Returns the number of pods updated.
    pub async fn patch<C: ClusterClient + ?Sized>(
        &self,
        client: &C,
        record: &InstrumentedApplication,
        workload: &Workload,
    ) -> Result<usize, ClientError> {
        let Some(application) = record.spec.applications.first() else {
            return Ok(0);
        };

        let namespace = workload.namespace();
        if !self.should_patch(workload.annotations(), &namespace) {
            debug!(workload = %workload.request(), "Skipping application annotation");
            return Ok(0);
        }

        let name = workload.name();
        let selector = workload.template_labels();
        let mut patched = 0;

        for mut pod in client.list_pods(&namespace, &BTreeMap::new()).await? {
            let labels = pod.metadata.labels.clone().unwrap_or_default();
            if !owned_by(&labels, &name, &selector) {
                continue;
            }
            if !self.should_patch(pod.metadata.annotations.as_ref(), &namespace) {
                continue;
            }

            pod.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(
                    annotations::APPLICATION_TYPE.to_string(),
                    application.application.clone(),
                );
            client.update_pod(&pod).await?;
            patched += 1;
        }

        info!(
            workload = %workload.request(),
            application = %application.application,
            pods = patched,
            "Annotated pods with application type"
        );
        Ok(patched)
    }
}

fn owned_by(labels: &BTreeMap<String, String>, name: &str, selector: &BTreeMap<String, String>) -> bool {
    let by_name = OWNER_LABELS
        .iter()
        .any(|key| labels.get(*key).map(|v| v == name).unwrap_or(false));
    let by_selector = !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v));
    by_name || by_selector
}
