//! InstrumentedApplication custom resource
//!
//! One record exists per instrumentable workload. It carries the detection
//! results in its spec and the detection/instrumentation progress in its
//! status subresource.

use crate::models::{ApplicationByContainer, LanguageByContainer};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logz.io",
    version = "v1alpha1",
    kind = "InstrumentedApplication",
    namespaced,
    status = "InstrumentedApplicationStatus",
    shortname = "instapp",
    printcolumn = r#"{"name":"Detection","type":"string","jsonPath":".status.instrumentationDetection.phase"}"#,
    printcolumn = r#"{"name":"Traces","type":"boolean","jsonPath":".status.tracesInstrumented"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentedApplicationSpec {
    #[serde(default)]
    pub languages: Vec<LanguageByContainer>,
    #[serde(default)]
    pub applications: Vec<ApplicationByContainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub waiting_for_data_collection: bool,
    #[serde(default)]
    pub log_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentedApplicationStatus {
    #[serde(default)]
    pub instrumentation_detection: InstrumentationDetection,
    #[serde(default)]
    pub traces_instrumented: bool,
    #[serde(default)]
    pub metrics_instrumented: bool,
    #[serde(default)]
    pub app_detected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DetectionPhase>,
}

/// Progress of the detection run for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DetectionPhase {
    Pending,
    Running,
    Completed,
    Error,
}

impl DetectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// No further detection work will happen for this record
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl InstrumentedApplication {
    pub fn phase(&self) -> Option<DetectionPhase> {
        self.status
            .as_ref()
            .and_then(|s| s.instrumentation_detection.phase)
    }

    pub fn status_mut(&mut self) -> &mut InstrumentedApplicationStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn set_phase(&mut self, phase: DetectionPhase) {
        self.status_mut().instrumentation_detection.phase = Some(phase);
    }

    pub fn traces_instrumented(&self) -> bool {
        self.status.as_ref().map(|s| s.traces_instrumented).unwrap_or(false)
    }

    pub fn metrics_instrumented(&self) -> bool {
        self.status.as_ref().map(|s| s.metrics_instrumented).unwrap_or(false)
    }

    pub fn app_detected(&self) -> bool {
        self.status.as_ref().map(|s| s.app_detected).unwrap_or(false)
    }

    pub fn is_lang_detected(&self) -> bool {
        !self.spec.languages.is_empty()
    }

    pub fn is_app_detected(&self) -> bool {
        !self.spec.applications.is_empty()
    }

    /// The workload this record was created for
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references()
            .iter()
            .find(|o| o.controller.unwrap_or(false))
    }

    /// Whether the record's controller owner is the given workload
    pub fn is_owned_by(&self, kind: &str, name: &str) -> bool {
        self.controller_owner()
            .map(|o| o.kind == kind && o.name == name)
            .unwrap_or(false)
    }

    /// Forget service names recorded by a previous patch
    pub fn clear_active_service_names(&mut self) {
        for language in &mut self.spec.languages {
            language.active_service_name.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;

    fn owner(kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".into(),
            kind: kind.into(),
            name: name.into(),
            uid: format!("uid-{name}"),
            controller: Some(controller),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_helpers() {
        let mut record = InstrumentedApplication::new("checkout", Default::default());
        assert_eq!(record.phase(), None);

        record.set_phase(DetectionPhase::Pending);
        assert_eq!(record.phase(), Some(DetectionPhase::Pending));
        assert!(!DetectionPhase::Pending.is_terminal());
        assert!(DetectionPhase::Error.is_terminal());
    }

    #[test]
    fn test_controller_owner_lookup() {
        let mut record = InstrumentedApplication::new("checkout", Default::default());
        record.metadata.owner_references = Some(vec![
            owner("ReplicaSet", "checkout-abc", false),
            owner("Deployment", "checkout", true),
        ]);

        assert!(record.is_owned_by("Deployment", "checkout"));
        assert!(!record.is_owned_by("StatefulSet", "checkout"));
        assert!(!record.is_owned_by("ReplicaSet", "checkout-abc"));
    }

    #[test]
    fn test_status_wire_format() {
        let mut record = InstrumentedApplication::new(
            "checkout",
            InstrumentedApplicationSpec {
                languages: vec![LanguageByContainer::new("app", Language::Java)],
                ..Default::default()
            },
        );
        record.set_phase(DetectionPhase::Completed);
        record.status_mut().traces_instrumented = true;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["apiVersion"], "logz.io/v1alpha1");
        assert_eq!(json["spec"]["languages"][0]["language"], "java");
        assert_eq!(
            json["status"]["instrumentationDetection"]["phase"],
            "Completed"
        );
        assert_eq!(json["status"]["tracesInstrumented"], true);
    }
}
