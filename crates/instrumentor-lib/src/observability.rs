//! Observability infrastructure for the instrumentor
//!
//! Provides:
//! - Prometheus metrics (reconcile latency and outcomes, detection runs, patches)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile durations (in seconds)
const RECONCILE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Persist buckets cover the retry backoff (2s, 4s, 8s, 16s)
const PERSIST_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<InstrumentorMetricsInner> = OnceLock::new();

struct InstrumentorMetricsInner {
    reconcile_duration_seconds: HistogramVec,
    reconcile_errors: IntCounterVec,
    persist_duration_seconds: Histogram,
    records_created: IntCounter,
    detection_pods_created: IntCounter,
    detection_pods_deleted: IntCounter,
    detections_finished: IntCounterVec,
    workloads_patched: IntCounterVec,
    pods_annotated: IntCounter,
}

impl InstrumentorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram_vec!(
                "instrumentor_reconcile_duration_seconds",
                "Time spent in a single reconcile pass",
                &["controller"],
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            reconcile_errors: register_int_counter_vec!(
                "instrumentor_reconcile_errors_total",
                "Reconcile passes that ended with an error, by kind",
                &["controller", "kind"]
            )
            .expect("Failed to register reconcile_errors"),

            persist_duration_seconds: register_histogram!(
                "instrumentor_persist_duration_seconds",
                "Time to persist a patched workload, including retries",
                PERSIST_BUCKETS.to_vec()
            )
            .expect("Failed to register persist_duration_seconds"),

            records_created: register_int_counter!(
                "instrumentor_records_created_total",
                "InstrumentedApplication records created for workloads"
            )
            .expect("Failed to register records_created"),

            detection_pods_created: register_int_counter!(
                "instrumentor_detection_pods_created_total",
                "Detector pods scheduled"
            )
            .expect("Failed to register detection_pods_created"),

            detection_pods_deleted: register_int_counter!(
                "instrumentor_detection_pods_deleted_total",
                "Finished detector pods cleaned up"
            )
            .expect("Failed to register detection_pods_deleted"),

            detections_finished: register_int_counter_vec!(
                "instrumentor_detections_finished_total",
                "Detection runs that reached a terminal phase",
                &["phase"]
            )
            .expect("Failed to register detections_finished"),

            workloads_patched: register_int_counter_vec!(
                "instrumentor_workloads_patched_total",
                "Workload pod templates modified, by action",
                &["action"]
            )
            .expect("Failed to register workloads_patched"),

            pods_annotated: register_int_counter!(
                "instrumentor_pods_annotated_total",
                "Pods annotated with a detected application type"
            )
            .expect("Failed to register pods_annotated"),
        }
    }
}

/// Instrumentor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct InstrumentorMetrics {
    _private: (),
}

impl Default for InstrumentorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(InstrumentorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &InstrumentorMetricsInner {
        GLOBAL_METRICS.get_or_init(InstrumentorMetricsInner::new)
    }

    pub fn observe_reconcile(&self, controller: &str, duration_secs: f64) {
        self.inner()
            .reconcile_duration_seconds
            .with_label_values(&[controller])
            .observe(duration_secs);
    }

    /// `kind` is "conflict" for optimistic concurrency failures, "error" otherwise
    pub fn inc_reconcile_errors(&self, controller: &str, kind: &str) {
        self.inner()
            .reconcile_errors
            .with_label_values(&[controller, kind])
            .inc();
    }

    pub fn observe_persist(&self, duration_secs: f64) {
        self.inner().persist_duration_seconds.observe(duration_secs);
    }

    pub fn inc_records_created(&self) {
        self.inner().records_created.inc();
    }

    pub fn inc_detection_pods_created(&self) {
        self.inner().detection_pods_created.inc();
    }

    pub fn inc_detection_pods_deleted(&self) {
        self.inner().detection_pods_deleted.inc();
    }

    pub fn inc_detections_finished(&self, phase: &str) {
        self.inner()
            .detections_finished
            .with_label_values(&[phase])
            .inc();
    }

    /// `action` is "instrument", "rollback" or "service_name"
    pub fn inc_workloads_patched(&self, action: &str) {
        self.inner()
            .workloads_patched
            .with_label_values(&[action])
            .inc();
    }

    pub fn inc_pods_annotated(&self, count: u64) {
        self.inner().pods_annotated.inc_by(count);
    }
}

/// Structured logger for instrumentor lifecycle events
///
/// Provides consistent JSON-formatted logging of record, detection
/// and patch events.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    /// `namespace` is the namespace the instrumentor itself runs in
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            instrumentor_namespace = %self.namespace,
            version = %version,
            "Instrumentor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instrumentor_namespace = %self.namespace,
            reason = %reason,
            "Instrumentor shutting down"
        );
    }

    pub fn log_record_created(&self, kind: &str, namespace: &str, name: &str) {
        info!(
            event = "record_created",
            kind = %kind,
            namespace = %namespace,
            name = %name,
            "Created InstrumentedApplication for workload"
        );
    }

    pub fn log_detection_started(&self, namespace: &str, record: &str, target_pod: &str, detector_pod: &str) {
        info!(
            event = "detection_started",
            namespace = %namespace,
            record = %record,
            target_pod = %target_pod,
            detector_pod = %detector_pod,
            "Scheduled detector pod"
        );
    }

    pub fn log_detection_completed(&self, namespace: &str, record: &str, languages: usize, applications: usize) {
        info!(
            event = "detection_completed",
            namespace = %namespace,
            record = %record,
            languages = languages,
            applications = applications,
            "Detection finished"
        );
    }

    pub fn log_detection_failed(&self, namespace: &str, record: &str, reason: &str) {
        warn!(
            event = "detection_failed",
            namespace = %namespace,
            record = %record,
            reason = %reason,
            "Detection failed"
        );
    }

    pub fn log_workload_patched(&self, kind: &str, namespace: &str, name: &str, languages: &str) {
        info!(
            event = "workload_patched",
            kind = %kind,
            namespace = %namespace,
            name = %name,
            languages = %languages,
            "Injected instrumentation agents"
        );
    }

    pub fn log_workload_rolled_back(&self, kind: &str, namespace: &str, name: &str) {
        info!(
            event = "workload_rolled_back",
            kind = %kind,
            namespace = %namespace,
            name = %name,
            "Removed instrumentation agents"
        );
    }

    pub fn log_reconcile_conflict(&self, controller: &str, object: &str) {
        info!(
            event = "reconcile_conflict",
            controller = %controller,
            object = %object,
            "Object changed during reconcile, waiting for the next event"
        );
    }
}
