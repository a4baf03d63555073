//! Annotation and label keys plus helpers for reading them

use std::collections::BTreeMap;

/// Workload opts out of reconciliation entirely
pub const SKIP: &str = "logz.io/skip";
/// Workload opts out of application detection and annotation
pub const SKIP_APP_DETECTION: &str = "logz.io/skip_app_detection";
/// Requests traces instrumentation ("true") or rollback ("rollback")
pub const TRACES_INSTRUMENT: &str = "logz.io/traces_instrument";
/// Separate rollback request
pub const TRACES_ROLLBACK: &str = "logz.io/traces_rollback";
/// Normalized application type written onto pods
pub const APPLICATION_TYPE: &str = "logz.io/application_type";
/// User override for the reported service name
pub const SERVICE_NAME: &str = "logz.io/service-name";
/// Log type requested for the workload
pub const LOG_TYPE: &str = "logz.io/log_type";

/// Comma separated set of languages patched into the template
pub const INSTRUMENTATION_LANGUAGE: &str = "logz.io/instrumentation-language";
pub const TRACES_INSTRUMENTED: &str = "logz.io/traces-instrumented";
pub const METRICS_INSTRUMENTED: &str = "logz.io/metrics-instrumented";
/// JSON map of container name to env var names the patcher created
pub const INJECTED_ENV: &str = "logz.io/injected-env";

/// Marks detector pods
pub const DETECTION_POD: &str = "logz.io/instrumentation-detection-pod";
/// Label on detector pods naming the record that owns them
pub const DETECTION_OWNER_LABEL: &str = "logz.io/instrumented-app";

pub const ISTIO_INJECT: &str = "sidecar.istio.io/inject";
pub const LINKERD_INJECT: &str = "linkerd.io/inject";

pub const TRUE: &str = "true";
pub const ROLLBACK: &str = "rollback";

/// Compare an annotation value case-insensitively after trimming
pub fn has_value(annotations: Option<&BTreeMap<String, String>>, key: &str, expected: &str) -> bool {
    annotations
        .and_then(|a| a.get(key))
        .map(|v| v.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Look up a non-empty, trimmed annotation value
pub fn value<'a>(annotations: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    annotations
        .and_then(|a| a.get(key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Whether the workload asked for traces instrumentation
pub fn instrumentation_requested(annotations: Option<&BTreeMap<String, String>>) -> bool {
    !has_value(annotations, SKIP_APP_DETECTION, TRUE)
        && has_value(annotations, TRACES_INSTRUMENT, TRUE)
        && !rollback_requested(annotations)
}

/// Whether the workload asked for its instrumentation to be removed
pub fn rollback_requested(annotations: Option<&BTreeMap<String, String>>) -> bool {
    has_value(annotations, TRACES_INSTRUMENT, ROLLBACK)
        || has_value(annotations, TRACES_ROLLBACK, TRUE)
        || has_value(annotations, TRACES_ROLLBACK, ROLLBACK)
}

/// Kubernetes label values are limited to 63 characters
pub fn label_value(value: &str) -> String {
    let truncated: String = value.chars().take(63).collect();
    truncated
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
