//! Node.js agent: registered through NODE_OPTIONS --require

use super::env::EnvInjection;
use super::{AgentProfile, AgentSettings, NODE_IP};
use crate::consts::OTLP_GRPC_PORT;

pub(super) const PROFILE: AgentProfile = AgentProfile {
    volume: "agentdir-nodejs",
    mount_path: "/agent-nodejs",
    init_container: "copy-nodejs-agent",
    init_command: &["cp", "-a", "/autoinstrumentation/.", "/agent-nodejs/"],
    runs_as_root: false,
    collects_metrics: false,
};

pub(super) fn env(settings: &AgentSettings, service_name: &str) -> Vec<EnvInjection> {
    vec![
        EnvInjection::field_ref(NODE_IP.0, NODE_IP.1),
        EnvInjection::literal("OTEL_NODEJS_DEBUG", "true"),
        EnvInjection::literal("OTEL_TRACES_EXPORTER", "otlp"),
        EnvInjection::literal("OTEL_EXPORTER_OTLP_TRACES_PROTOCOL", "grpc"),
        EnvInjection::literal(
            "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
            format!("{}:{}", settings.monitoring_service_endpoint, OTLP_GRPC_PORT),
        ),
        EnvInjection::literal("OTEL_SERVICE_NAME", service_name).with_service_name(),
        EnvInjection::fragment("NODE_OPTIONS", "--require /agent-nodejs/autoinstrumentation.js", " "),
    ]
}
