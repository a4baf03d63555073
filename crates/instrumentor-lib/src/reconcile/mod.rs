//! Reconcilers driving workloads through detection and instrumentation
//!
//! [`WorkloadReconciler`] runs for Deployments and StatefulSets: it creates
//! the InstrumentedApplication record and applies or removes agents once
//! detection completed. [`DetectionReconciler`] runs for records: it
//! schedules the detector pod and folds its result back into the record.

mod detection;
mod retry;
mod workload;


pub use detection::{build_detector_pod, DetectionReconciler, DetectorSettings};
pub use retry::RetryPolicy;
pub use workload::WorkloadReconciler;

use k8s_openapi::api::core::v1::Pod;

/// Controller names used in metrics and logs
pub const WORKLOAD_CONTROLLER: &str = "workload";
pub const DETECTION_CONTROLLER: &str = "instrumentedapplication";

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}
