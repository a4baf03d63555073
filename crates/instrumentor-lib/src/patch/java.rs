//! Java agent: a javaagent jar loaded through JAVA_TOOL_OPTIONS

use super::env::EnvInjection;
use super::{AgentProfile, AgentSettings, NODE_IP, POD_NAME, RESOURCE_ATTRIBUTES};
use crate::consts::OTLP_GRPC_PORT;

pub(super) const PROFILE: AgentProfile = AgentProfile {
    volume: "agentdir-java",
    mount_path: "/agent",
    init_container: "copy-java-agent",
    init_command: &["cp", "/javaagent.jar", "/agent/opentelemetry-javaagent-all.jar"],
    runs_as_root: false,
    collects_metrics: false,
};

pub(super) fn env(settings: &AgentSettings, service_name: &str) -> Vec<EnvInjection> {
    let tool_options = format!(
        "-javaagent:/agent/opentelemetry-javaagent-all.jar \
         -Dotel.traces.sampler=always_on -Dotel.traces.exporter=otlp -Dotel.metrics.exporter=none \
         -Dotel.exporter.otlp.traces.endpoint=http://{}:{}",
        settings.monitoring_service_endpoint, OTLP_GRPC_PORT
    );

    vec![
        EnvInjection::field_ref(NODE_IP.0, NODE_IP.1),
        EnvInjection::field_ref(POD_NAME.0, POD_NAME.1),
        EnvInjection::fragment("JAVA_TOOL_OPTIONS", tool_options, " "),
        EnvInjection::literal(
            RESOURCE_ATTRIBUTES,
            super::resource_attributes(service_name),
        )
        .with_service_name(),
    ]
}
