//! .NET agent: CLR profiler plus startup hook

use super::env::EnvInjection;
use super::{AgentProfile, AgentSettings, NODE_IP, RESOURCE_ATTRIBUTES};
use crate::consts::OTLP_GRPC_PORT;

pub(super) const PROFILE: AgentProfile = AgentProfile {
    volume: "agentdir-dotnet",
    mount_path: "/agent",
    init_container: "copy-dotnet-agent",
    init_command: &["/bin/sh", "-c", "/init.sh"],
    runs_as_root: true,
    collects_metrics: false,
};

pub(super) fn env(settings: &AgentSettings, service_name: &str) -> Vec<EnvInjection> {
    vec![
        EnvInjection::field_ref(NODE_IP.0, NODE_IP.1),
        EnvInjection::literal("COR_ENABLE_PROFILING", "1"),
        EnvInjection::literal("COR_PROFILER", "{918728DD-259F-4A6A-AC2B-B85E1B658318}"),
        EnvInjection::literal(
            "COR_PROFILER_PATH",
            "/agent/linux-musl-x64/OpenTelemetry.AutoInstrumentation.ClrProfiler.Native.so",
        ),
        EnvInjection::literal("OTEL_DOTNET_AUTO_HOME", "/agent"),
        EnvInjection::literal(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            format!("http://{}:{}", settings.monitoring_service_endpoint, OTLP_GRPC_PORT),
        ),
        EnvInjection::literal("OTEL_SERVICE_NAME", service_name).with_service_name(),
        EnvInjection::literal("OTEL_TRACES_EXPORTER", "otlp"),
        EnvInjection::literal("OTEL_EXPORTER_OTLP_PROTOCOL", "grpc"),
        EnvInjection::literal(
            "DOTNET_STARTUP_HOOKS",
            "/agent/net/OpenTelemetry.AutoInstrumentation.StartupHook.dll",
        ),
        EnvInjection::literal("DOTNET_ADDITIONAL_DEPS", "/agent/AdditionalDeps"),
        EnvInjection::literal("DOTNET_SHARED_STORE", "/agent/store"),
        EnvInjection::literal(RESOURCE_ATTRIBUTES, "logz.io/language=dotnet"),
        EnvInjection::literal("OTEL_METRICS_EXPORTER", "none"),
        EnvInjection::literal("OTEL_LOGS_EXPORTER", "none"),
    ]
}
