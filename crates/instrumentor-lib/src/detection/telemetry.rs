//! OpenTelemetry pre-configuration and service name detection

use super::ProcessSample;

const RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
const SERVICE_NAME_ATTRIBUTE: &str = "service.name=";
/// Set by a connector that instruments through OpenTelemetry itself
const EASY_CONNECT_MARKER: &str = "easy.connect.version";

const ENV_MARKERS: &[&str] = &["OTEL", "OTLP"];
const DEPENDENCY_MARKERS: &[&str] = &["opentelemetry", "helios"];

/// Detects processes that already ship OpenTelemetry
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenTelemetryInspector;

impl OpenTelemetryInspector {
    pub fn is_preconfigured(&self, sample: &ProcessSample) -> bool {
        let easy_connect = sample
            .environ
            .get(RESOURCE_ATTRIBUTES)
            .map(|v| v.contains(EASY_CONNECT_MARKER))
            .unwrap_or(false);
        if easy_connect {
            return false;
        }

        sample
            .environ
            .keys()
            .any(|k| ENV_MARKERS.iter().any(|m| k.contains(m)))
            || ENV_MARKERS.iter().any(|m| sample.cmdline.contains(m))
            || sample
                .dependencies
                .keys()
                .any(|d| DEPENDENCY_MARKERS.iter().any(|m| d.contains(m)))
    }

    /// Whether any process of the container is pre-configured
    pub fn any_preconfigured(&self, samples: &[ProcessSample]) -> bool {
        samples.iter().any(|s| self.is_preconfigured(s))
    }
}

/// Service name a container already reports, if any.
///
/// `service.name` inside OTEL_RESOURCE_ATTRIBUTES wins over OTEL_SERVICE_NAME.
pub fn detect_service_name(samples: &[ProcessSample]) -> Option<String> {
    samples.iter().find_map(|s| {
        let from_attributes = s.environ.get(RESOURCE_ATTRIBUTES).and_then(|attrs| {
            attrs
                .split(',')
                .find_map(|attr| attr.trim().strip_prefix(SERVICE_NAME_ATTRIBUTE))
                .map(str::to_string)
        });
        from_attributes
            .or_else(|| s.environ.get(SERVICE_NAME).cloned())
            .filter(|name| !name.is_empty())
    })
}
