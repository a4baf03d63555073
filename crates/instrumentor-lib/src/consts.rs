//! Shared constants

/// Namespace used when CURRENT_NS is not set
pub const DEFAULT_NAMESPACE: &str = "monitoring";
pub const CURRENT_NAMESPACE_ENV: &str = "CURRENT_NS";

/// Namespaces that are never instrumented or annotated
pub const IGNORED_NAMESPACES: &[&str] = &[
    "kube-system",
    "local-path-storage",
    "istio-system",
    "linkerd",
    "gatekeeper-system",
];

/// Sidecars excluded from detection
pub const SIDECAR_CONTAINERS: &[&str] = &["istio-proxy", "linkerd-proxy"];

pub const OTLP_GRPC_PORT: u16 = 4317;
pub const OTLP_HTTP_PORT: u16 = 4318;

/// Where the detector writes its result; also the detector container's
/// termination message path
pub const TERMINATION_MESSAGE_PATH: &str = "/dev/detection-result";

pub const DETECTOR_CONTAINER_NAME: &str = "instrumentation-detector";

/// Namespace the instrumentor runs in
pub fn current_namespace() -> String {
    std::env::var(CURRENT_NAMESPACE_ENV)
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// Whether a namespace is excluded from instrumentation
pub fn is_ignored_namespace(namespace: &str, own_namespace: &str) -> bool {
    namespace == own_namespace || IGNORED_NAMESPACES.contains(&namespace)
}
