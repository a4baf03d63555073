//! Python agent: auto-instrumentation site package prepended to PYTHONPATH

use super::env::EnvInjection;
use super::{AgentProfile, AgentSettings, NODE_IP, POD_NAME, RESOURCE_ATTRIBUTES};
use crate::consts::OTLP_HTTP_PORT;

const MOUNT_PATH: &str = "/otel-auto-instrumentation";
const HTTP_PROTOBUF: &str = "http/protobuf";

pub(super) const PROFILE: AgentProfile = AgentProfile {
    volume: "agentdir-python",
    mount_path: MOUNT_PATH,
    init_container: "copy-python-agent",
    init_command: &["cp", "-a", "/autoinstrumentation/.", "/otel-auto-instrumentation/"],
    runs_as_root: true,
    collects_metrics: true,
};

pub(super) fn env(settings: &AgentSettings, service_name: &str) -> Vec<EnvInjection> {
    vec![
        EnvInjection::field_ref(NODE_IP.0, NODE_IP.1),
        EnvInjection::field_ref(POD_NAME.0, POD_NAME.1),
        EnvInjection::fragment(
            "PYTHONPATH",
            format!("{MOUNT_PATH}/opentelemetry/instrumentation/auto_instrumentation:{MOUNT_PATH}"),
            ":",
        ),
        EnvInjection::literal("OTEL_EXPORTER_OTLP_TRACES_PROTOCOL", HTTP_PROTOBUF),
        EnvInjection::literal("OTEL_EXPORTER_OTLP_METRICS_PROTOCOL", HTTP_PROTOBUF),
        EnvInjection::literal(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            format!("http://{}:{}", settings.monitoring_service_endpoint, OTLP_HTTP_PORT),
        ),
        EnvInjection::literal(RESOURCE_ATTRIBUTES, super::resource_attributes(service_name))
            .with_service_name(),
        EnvInjection::literal("OTEL_TRACES_EXPORTER", "otlp"),
        EnvInjection::literal("OTEL_METRICS_EXPORTER", "otlp"),
    ]
}
