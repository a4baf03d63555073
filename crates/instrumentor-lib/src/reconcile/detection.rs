use super::{pod_phase, DETECTION_CONTROLLER};
use crate::annotations;
use crate::client::ClusterClient;
use crate::consts::{DETECTOR_CONTAINER_NAME, SIDECAR_CONTAINERS, TERMINATION_MESSAGE_PATH};
use crate::error::ReconcileError;
use crate::models::DetectionResult;
use crate::observability::{InstrumentorMetrics, StructuredLogger};
use crate::record::{DetectionPhase, InstrumentedApplication};
use crate::workload::{Request, WorkloadKind, APPS_API_VERSION};
use k8s_openapi::api::core::v1::{Capabilities, Container, Pod, PodSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

const POD_SUCCEEDED: &str = "Succeeded";
const POD_FAILED: &str = "Failed";
const POD_RUNNING: &str = "Running";

/// How detector pods are run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSettings {
    pub image: String,
    pub tag: String,
    /// Remove detector pods once the record reached a terminal phase
    pub delete_detection_pods: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            image: "logzio/instrumentation-detector".to_string(),
            tag: "latest".to_string(),
            delete_detection_pods: true,
        }
    }
}

/// Runs detection for InstrumentedApplication records
pub struct DetectionReconciler<C: ClusterClient> {
    client: Arc<C>,
    settings: DetectorSettings,
    metrics: InstrumentorMetrics,
    logger: StructuredLogger,
}

impl<C: ClusterClient> DetectionReconciler<C> {
    pub fn new(
        client: Arc<C>,
        settings: DetectorSettings,
        metrics: InstrumentorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            client,
            settings,
            metrics,
            logger,
        }
    }

    pub async fn reconcile(&self, request: &Request) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let result = self.sync(request).await;
        self.metrics
            .observe_reconcile(DETECTION_CONTROLLER, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            if e.is_conflict() {
                self.metrics.inc_reconcile_errors(DETECTION_CONTROLLER, "conflict");
                self.logger.log_reconcile_conflict(
                    DETECTION_CONTROLLER,
                    &format!("InstrumentedApplication {request}"),
                );
            } else {
                self.metrics.inc_reconcile_errors(DETECTION_CONTROLLER, "error");
            }
        }
        result
    }

    async fn sync(&self, request: &Request) -> Result<(), ReconcileError> {
        let mut record = match self.client.get_record(&request.namespace, &request.name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if record.is_lang_detected() && record.is_app_detected() {
            debug!(record = %request, "Language and application already detected");
        } else if record.phase() == Some(DetectionPhase::Pending) {
            return self.start_detection(record).await;
        }

        if record.phase() == Some(DetectionPhase::Running) {
            record = self.collect_result(record).await?;
        }

        if record.phase().map(|p| p.is_terminal()).unwrap_or(false) {
            self.cleanup(&record).await?;
        }
        Ok(())
    }

    async fn start_detection(&self, mut record: InstrumentedApplication) -> Result<(), ReconcileError> {
        record.set_phase(DetectionPhase::Running);
        let record = self.client.update_record_status(&record).await?;

        match self.schedule(&record).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_error(record, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn schedule(&self, record: &InstrumentedApplication) -> Result<(), ReconcileError> {
        let namespace = record.namespace().unwrap_or_default();
        let owner = record
            .controller_owner()
            .ok_or_else(|| ReconcileError::MissingOwner(record.name_any()))?;
        let kind = WorkloadKind::from_kind(&owner.kind)
            .filter(|_| owner.api_version == APPS_API_VERSION)
            .ok_or_else(|| {
                ReconcileError::UnsupportedOwner(format!("{}/{}", owner.api_version, owner.kind))
            })?;

        let workload = self.client.get_workload(kind, &namespace, &owner.name).await?;
        let target = self.choose_pod(&namespace, &workload.template_labels()).await?;

        let detector = build_detector_pod(&target, record, &self.settings);
        let created = self.client.create_pod(&detector).await?;

        self.metrics.inc_detection_pods_created();
        self.logger.log_detection_started(
            &namespace,
            &record.name_any(),
            &target.name_any(),
            &created.name_any(),
        );
        Ok(())
    }

    /// First running replica matching the workload's template labels
    async fn choose_pod(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Pod, ReconcileError> {
        let not_found = || ReconcileError::PodsNotFound {
            namespace: namespace.to_string(),
            name: crate::client::label_selector(labels),
        };
        if labels.is_empty() {
            return Err(not_found());
        }

        self.client
            .list_pods(namespace, labels)
            .await?
            .into_iter()
            .filter(|p| !is_detector_pod(p))
            .find(|p| pod_phase(p) == Some(POD_RUNNING))
            .ok_or_else(not_found)
    }

    async fn collect_result(
        &self,
        record: InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        let namespace = record.namespace().unwrap_or_default();
        for pod in self.detector_pods(&record).await? {
            match pod_phase(&pod) {
                Some(POD_SUCCEEDED) => {
                    let Some(message) = termination_message(&pod) else {
                        continue;
                    };
                    let result = match DetectionResult::from_termination_message(message) {
                        Ok(result) => result,
                        Err(e) => {
                            let e = ReconcileError::InvalidDetectionResult(e);
                            error!(pod = %pod.name_any(), error = %e, "Unreadable detection result");
                            return self.mark_error(record, &e.to_string()).await;
                        }
                    };
                    return self.complete(record, result).await;
                }
                Some(POD_FAILED) => {
                    let reason = format!("detector pod {}/{} failed", namespace, pod.name_any());
                    return self.mark_error(record, &reason).await;
                }
                _ => {}
            }
        }
        Ok(record)
    }

    async fn complete(
        &self,
        mut record: InstrumentedApplication,
        result: DetectionResult,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        let languages = result.language_by_container.len();
        let applications = result.application_by_container.len();
        record.spec.languages = result.language_by_container;
        record.spec.applications = result.application_by_container;
        let mut record = self.client.update_record(&record).await?;

        record.set_phase(DetectionPhase::Completed);
        let record = self.client.update_record_status(&record).await?;

        self.metrics
            .inc_detections_finished(DetectionPhase::Completed.as_str());
        self.logger.log_detection_completed(
            &record.namespace().unwrap_or_default(),
            &record.name_any(),
            languages,
            applications,
        );
        Ok(record)
    }

    async fn mark_error(
        &self,
        mut record: InstrumentedApplication,
        reason: &str,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        record.set_phase(DetectionPhase::Error);
        let record = self.client.update_record_status(&record).await?;

        self.metrics.inc_detections_finished(DetectionPhase::Error.as_str());
        self.logger.log_detection_failed(
            &record.namespace().unwrap_or_default(),
            &record.name_any(),
            reason,
        );
        Ok(record)
    }

    async fn detector_pods(&self, record: &InstrumentedApplication) -> Result<Vec<Pod>, ReconcileError> {
        let labels = BTreeMap::from([(
            annotations::DETECTION_OWNER_LABEL.to_string(),
            annotations::label_value(&record.name_any()),
        )]);
        let namespace = record.namespace().unwrap_or_default();
        Ok(self.client.list_pods(&namespace, &labels).await?)
    }

    async fn cleanup(&self, record: &InstrumentedApplication) -> Result<(), ReconcileError> {
        if !self.settings.delete_detection_pods {
            return Ok(());
        }

        let namespace = record.namespace().unwrap_or_default();
        for pod in self.detector_pods(record).await? {
            if !matches!(pod_phase(&pod), Some(POD_SUCCEEDED) | Some(POD_FAILED)) {
                continue;
            }
            match self.client.delete_pod(&namespace, &pod.name_any()).await {
                Ok(()) => {
                    self.metrics.inc_detection_pods_deleted();
                    info!(pod = %pod.name_any(), namespace = %namespace, "Deleted detector pod");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn is_detector_pod(pod: &Pod) -> bool {
    annotations::has_value(
        pod.metadata.annotations.as_ref(),
        annotations::DETECTION_POD,
        annotations::TRUE,
    )
}

fn termination_message(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()?
        .state
        .as_ref()?
        .terminated
        .as_ref()?
        .message
        .as_deref()
}

/// Detector pod inspecting the processes of `target` from its node
pub fn build_detector_pod(target: &Pod, record: &InstrumentedApplication, settings: &DetectorSettings) -> Pod {
    let container_names = target
        .spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .map(|c| c.name.as_str())
        .filter(|name| !SIDECAR_CONTAINERS.contains(name))
        .collect::<Vec<_>>()
        .join(",");

    let pod_annotations = BTreeMap::from([
        (annotations::DETECTION_POD.to_string(), annotations::TRUE.to_string()),
        (annotations::ISTIO_INJECT.to_string(), "false".to_string()),
        (annotations::LINKERD_INJECT.to_string(), "disabled".to_string()),
    ]);
    let labels = BTreeMap::from([(
        annotations::DETECTION_OWNER_LABEL.to_string(),
        annotations::label_value(&record.name_any()),
    )]);

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-instrumentation-detection-", target.name_any())),
            namespace: target.namespace(),
            annotations: Some(pod_annotations),
            labels: Some(labels),
            owner_references: record.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: DETECTOR_CONTAINER_NAME.to_string(),
                image: Some(format!("{}:{}", settings.image, settings.tag)),
                args: Some(vec![
                    format!("--pod-uid={}", target.uid().unwrap_or_default()),
                    format!("--container-names={container_names}"),
                ]),
                termination_message_path: Some(TERMINATION_MESSAGE_PATH.to_string()),
                security_context: Some(SecurityContext {
                    capabilities: Some(Capabilities {
                        add: Some(vec!["SYS_PTRACE".to_string()]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            node_name: target.spec.as_ref().and_then(|s| s.node_name.clone()),
            host_pid: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
