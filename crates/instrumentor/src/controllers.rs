//! kube-runtime controllers wiring the reconcilers to watch events

use futures::StreamExt;
use instrumentor_lib::annotations::DETECTION_OWNER_LABEL;
use instrumentor_lib::client::KubeClusterClient;
use instrumentor_lib::health::{Component, HealthRegistry};
use instrumentor_lib::reconcile::{DetectionReconciler, WorkloadReconciler};
use instrumentor_lib::workload::{Request, WorkloadKind};
use instrumentor_lib::{InstrumentedApplication, ReconcileError};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Delay before retrying a reconcile that failed with a non-conflict error
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Shared state handed to every reconcile call
pub struct Context {
    pub workloads: WorkloadReconciler<KubeClusterClient>,
    pub detection: DetectionReconciler<KubeClusterClient>,
    pub health: HealthRegistry,
}

fn request_for<K: ResourceExt>(obj: &K) -> Request {
    Request::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Conflicts end the pass quietly; the next watch event retries
async fn finish(
    ctx: &Context,
    component: Component,
    result: Result<(), ReconcileError>,
) -> Result<Action, ReconcileError> {
    match result {
        Ok(()) => {
            ctx.health.reconcile_succeeded(component).await;
            Ok(Action::await_change())
        }
        Err(e) if e.is_conflict() => Ok(Action::await_change()),
        Err(e) => {
            ctx.health.reconcile_failed(component, e.to_string()).await;
            Err(e)
        }
    }
}

async fn reconcile_deployment(obj: Arc<Deployment>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let result = ctx
        .workloads
        .reconcile(WorkloadKind::Deployment, &request_for(obj.as_ref()))
        .await;
    finish(&ctx, Component::WorkloadController, result).await
}

async fn reconcile_statefulset(obj: Arc<StatefulSet>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let result = ctx
        .workloads
        .reconcile(WorkloadKind::StatefulSet, &request_for(obj.as_ref()))
        .await;
    finish(&ctx, Component::WorkloadController, result).await
}

async fn reconcile_record(
    obj: Arc<InstrumentedApplication>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let result = ctx.detection.reconcile(&request_for(obj.as_ref())).await;
    finish(&ctx, Component::RecordController, result).await
}

fn error_policy<K>(_obj: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!(error = %err, "Reconcile failed");
    Action::requeue(ERROR_REQUEUE)
}

fn log_result<K>(
    controller: &'static str,
    result: Result<(ObjectRef<K>, Action), controller::Error<ReconcileError, watcher::Error>>,
) where
    K: kube::Resource,
{
    match result {
        Ok((obj, _)) => debug!(controller, object = %obj.name, "Reconciled"),
        Err(controller::Error::ReconcilerFailed(_, obj)) => {
            debug!(controller, object = %obj.name, "Reconcile error handled by error policy")
        }
        Err(e) => warn!(controller, error = %e, "Controller error"),
    }
}

/// Run the workload and record controllers until their watch streams end
pub async fn run(client: Client, ctx: Arc<Context>) {
    let records = Api::<InstrumentedApplication>::all(client.clone());

    let deployments = Controller::new(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(records.clone(), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_deployment, error_policy, ctx.clone())
        .for_each(|result| async move { log_result("deployment", result) });

    let statefulsets = Controller::new(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .owns(records.clone(), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_statefulset, error_policy, ctx.clone())
        .for_each(|result| async move { log_result("statefulset", result) });

    let detector_pods = watcher::Config::default().labels(DETECTION_OWNER_LABEL);
    let instrumented_apps = Controller::new(records, watcher::Config::default())
        .owns(Api::<Pod>::all(client), detector_pods)
        .shutdown_on_signal()
        .run(reconcile_record, error_policy, ctx.clone())
        .for_each(|result| async move { log_result("instrumentedapplication", result) });

    tokio::join!(deployments, statefulsets, instrumented_apps);

    ctx.health.controller_stopped(Component::WorkloadController).await;
    ctx.health.controller_stopped(Component::RecordController).await;
}
