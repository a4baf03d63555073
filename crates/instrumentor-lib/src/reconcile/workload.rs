use super::retry::RetryPolicy;
use super::WORKLOAD_CONTROLLER;
use crate::annotations;
use crate::client::ClusterClient;
use crate::consts::is_ignored_namespace;
use crate::error::{PatchError, ReconcileError};
use crate::observability::{InstrumentorMetrics, StructuredLogger};
use crate::patch::{AnnotationPatcher, PatchEngine};
use crate::record::{DetectionPhase, InstrumentedApplication, InstrumentedApplicationSpec};
use crate::workload::{Request, Workload, WorkloadKind};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of writing a mutated pod template back to the cluster
struct Persisted {
    workload: Workload,
    record: InstrumentedApplication,
    updated: bool,
}

/// Creates records for workloads and keeps their pod templates in line
/// with the instrumentation annotations
pub struct WorkloadReconciler<C: ClusterClient> {
    client: Arc<C>,
    engine: PatchEngine,
    app_patcher: AnnotationPatcher,
    own_namespace: String,
    retry: RetryPolicy,
    metrics: InstrumentorMetrics,
    logger: StructuredLogger,
}

impl<C: ClusterClient> WorkloadReconciler<C> {
    pub fn new(
        client: Arc<C>,
        engine: PatchEngine,
        own_namespace: impl Into<String>,
        metrics: InstrumentorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let own_namespace = own_namespace.into();
        Self {
            client,
            engine,
            app_patcher: AnnotationPatcher::new(own_namespace.clone()),
            own_namespace,
            retry: RetryPolicy::default(),
            metrics,
            logger,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn reconcile(&self, kind: WorkloadKind, request: &Request) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let result = self.sync(kind, request).await;
        self.metrics
            .observe_reconcile(WORKLOAD_CONTROLLER, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            if e.is_conflict() {
                self.metrics.inc_reconcile_errors(WORKLOAD_CONTROLLER, "conflict");
                self.logger
                    .log_reconcile_conflict(WORKLOAD_CONTROLLER, &format!("{kind} {request}"));
            } else {
                self.metrics.inc_reconcile_errors(WORKLOAD_CONTROLLER, "error");
            }
        }
        result
    }

    fn should_skip(&self, workload: &Workload) -> bool {
        annotations::has_value(workload.annotations(), annotations::SKIP, annotations::TRUE)
            || annotations::has_value(
                workload.template_annotations(),
                annotations::SKIP,
                annotations::TRUE,
            )
            || is_ignored_namespace(&workload.namespace(), &self.own_namespace)
    }

    async fn sync(&self, kind: WorkloadKind, request: &Request) -> Result<(), ReconcileError> {
        let workload = match self
            .client
            .get_workload(kind, &request.namespace, &request.name)
            .await
        {
            Ok(workload) => workload,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if self.should_skip(&workload) {
            debug!(kind = %kind, workload = %request, "Skipping workload");
            return Ok(());
        }

        let mut records: Vec<InstrumentedApplication> = self
            .client
            .list_records(&request.namespace)
            .await?
            .into_iter()
            .filter(|r| r.is_owned_by(kind.as_str(), &request.name))
            .collect();

        let record = match records.len() {
            0 => return self.create_record(&workload).await,
            1 => records.remove(0),
            count => {
                return Err(ReconcileError::MultipleRecords {
                    count,
                    kind: kind.as_str(),
                    namespace: request.namespace.clone(),
                    name: request.name.clone(),
                })
            }
        };

        if record.phase() != Some(DetectionPhase::Completed) {
            debug!(workload = %request, phase = ?record.phase(), "Detection not completed yet");
            return Ok(());
        }

        let record = self.process_log_type(&workload, record).await?;

        let template_annotations = workload.template_annotations();
        let record = if !record.is_lang_detected() {
            debug!(workload = %request, "No languages detected, nothing to instrument");
            record
        } else if annotations::instrumentation_requested(template_annotations) {
            self.instrument(&workload, record).await?
        } else if annotations::rollback_requested(template_annotations) {
            self.rollback(&workload, record).await?
        } else {
            record
        };

        if record.is_app_detected()
            && self
                .app_patcher
                .should_patch(template_annotations, &request.namespace)
        {
            self.process_detected_apps(&workload, record).await?;
        }

        Ok(())
    }

    async fn create_record(&self, workload: &Workload) -> Result<(), ReconcileError> {
        let request = workload.request();
        if workload.ready_replicas() == 0 {
            debug!(workload = %request, "No ready replicas, waiting for pods to be ready");
            return Ok(());
        }

        let mut record = InstrumentedApplication::new(
            &request.name,
            InstrumentedApplicationSpec {
                waiting_for_data_collection: false,
                ..Default::default()
            },
        );
        record.metadata.namespace = Some(request.namespace.clone());
        if let Some(owner) = workload.controller_owner_ref() {
            record.metadata.owner_references = Some(vec![owner]);
        }

        let mut created = self.client.create_record(&record).await?;
        created.set_phase(DetectionPhase::Pending);
        self.client.update_record_status(&created).await?;

        self.metrics.inc_records_created();
        self.logger
            .log_record_created(workload.kind().as_str(), &request.namespace, &request.name);
        Ok(())
    }

    /// Copy an explicit log type from the pod template into the record
    async fn process_log_type(
        &self,
        workload: &Workload,
        mut record: InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        let template_annotations = workload.template_annotations();
        let log_type = annotations::value(template_annotations, annotations::LOG_TYPE)
            .or_else(|| annotations::value(template_annotations, annotations::APPLICATION_TYPE));

        match log_type {
            Some(log_type) if log_type != record.spec.log_type => {
                debug!(workload = %workload.request(), log_type = %log_type, "Updating log type");
                record.spec.log_type = log_type.to_string();
                Ok(self.client.update_record(&record).await?)
            }
            _ => Ok(record),
        }
    }

    async fn instrument(
        &self,
        workload: &Workload,
        record: InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        let request = workload.request();
        let template = workload
            .template()
            .ok_or_else(|| PatchError::MissingTemplate(request.to_string()))?;
        let instrumented = self.engine.is_traces_instrumented(template, &record)?;

        let persisted = if instrumented {
            self.persist(workload.kind(), &request, &record, |template, record| {
                self.engine
                    .update_active_service_name(template, record)
                    .map(|_| ())
            })
            .await?
        } else {
            self.persist(workload.kind(), &request, &record, |template, record| {
                self.engine.modify_object(template, record)
            })
            .await?
        };

        if persisted.updated {
            let action = if instrumented { "service_name" } else { "instrument" };
            self.metrics.inc_workloads_patched(action);
            if !instrumented {
                let languages = record
                    .spec
                    .languages
                    .iter()
                    .map(|l| l.language.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                self.logger.log_workload_patched(
                    workload.kind().as_str(),
                    &request.namespace,
                    &request.name,
                    &languages,
                );
            }
        }

        self.sync_record(record, persisted).await
    }

    async fn rollback(
        &self,
        workload: &Workload,
        record: InstrumentedApplication,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        let request = workload.request();
        let template = workload
            .template()
            .ok_or_else(|| PatchError::MissingTemplate(request.to_string()))?;

        if !record.traces_instrumented() && !self.engine.is_traces_instrumented(template, &record)? {
            return Ok(record);
        }

        let persisted = self
            .persist(workload.kind(), &request, &record, |template, record| {
                self.engine.rollback(template, record)?;
                record.clear_active_service_names();
                Ok(())
            })
            .await?;

        if persisted.updated {
            self.metrics.inc_workloads_patched("rollback");
            self.logger.log_workload_rolled_back(
                workload.kind().as_str(),
                &request.namespace,
                &request.name,
            );
        }

        self.sync_record(record, persisted).await
    }

    /// Mirror the persisted template into the record's spec and status
    async fn sync_record(
        &self,
        mut record: InstrumentedApplication,
        persisted: Persisted,
    ) -> Result<InstrumentedApplication, ReconcileError> {
        if persisted.record.spec != record.spec {
            record.spec = persisted.record.spec;
            record = self.client.update_record(&record).await?;
        }

        let (traces, metrics) = match persisted.workload.template() {
            Some(template) => (
                self.engine.is_traces_instrumented(template, &record)?,
                self.engine.is_metrics_instrumented(template, &record)?,
            ),
            None => (false, false),
        };

        if record.traces_instrumented() != traces || record.metrics_instrumented() != metrics {
            info!(
                record = %record.name_any(),
                traces_instrumented = traces,
                metrics_instrumented = metrics,
                "Updating instrumentation status"
            );
            let status = record.status_mut();
            status.traces_instrumented = traces;
            status.metrics_instrumented = metrics;
            record = self.client.update_record_status(&record).await?;
        }
        Ok(record)
    }

    /// Apply `mutate` to a freshly read copy of the workload and write it
    /// back, retrying on conflicts. Patch errors are not retried.
    async fn persist<F>(
        &self,
        kind: WorkloadKind,
        request: &Request,
        record: &InstrumentedApplication,
        mutate: F,
    ) -> Result<Persisted, ReconcileError>
    where
        F: Fn(&mut PodTemplateSpec, &mut InstrumentedApplication) -> Result<(), PatchError> + Sync,
    {
        let started = Instant::now();
        let mutate = &mutate;
        let result = self
            .retry
            .run(
                move |_| self.persist_once(kind, request, record, mutate),
                ReconcileError::is_conflict,
            )
            .await;
        self.metrics.observe_persist(started.elapsed().as_secs_f64());
        result
    }

    async fn persist_once<F>(
        &self,
        kind: WorkloadKind,
        request: &Request,
        record: &InstrumentedApplication,
        mutate: &F,
    ) -> Result<Persisted, ReconcileError>
    where
        F: Fn(&mut PodTemplateSpec, &mut InstrumentedApplication) -> Result<(), PatchError> + Sync,
    {
        let mut workload = self
            .client
            .get_workload(kind, &request.namespace, &request.name)
            .await?;
        let mut patched = record.clone();

        let unchanged = {
            let template = workload
                .template_mut()
                .ok_or_else(|| PatchError::MissingTemplate(request.to_string()))?;
            let before = template.clone();
            mutate(template, &mut patched)?;
            *template == before
        };

        if unchanged {
            return Ok(Persisted {
                workload,
                record: patched,
                updated: false,
            });
        }

        let workload = self.client.update_workload(&workload).await?;
        Ok(Persisted {
            workload,
            record: patched,
            updated: true,
        })
    }

    async fn process_detected_apps(
        &self,
        workload: &Workload,
        mut record: InstrumentedApplication,
    ) -> Result<(), ReconcileError> {
        let annotated = self
            .app_patcher
            .patch(self.client.as_ref(), &record, workload)
            .await?;
        if annotated > 0 {
            self.metrics.inc_pods_annotated(annotated as u64);
        }

        if !record.app_detected() {
            record.status_mut().app_detected = true;
            self.client.update_record_status(&record).await?;
        }
        Ok(())
    }
}
