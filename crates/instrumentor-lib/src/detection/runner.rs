//! Ordered inspector pipeline for one container

use super::application::ApplicationInspector;
use super::golang::BinaryIntrospector;
use super::language::default_language_inspectors;
use super::telemetry::{detect_service_name, OpenTelemetryInspector};
use super::{Inspector, ProcessSample};
use crate::models::{ApplicationByContainer, Language, LanguageByContainer};
use std::path::PathBuf;
use tracing::debug;

/// Detection outcome for a single container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetection {
    pub language: Option<LanguageByContainer>,
    pub application: Option<ApplicationByContainer>,
}

pub struct DetectionRunner {
    languages: Vec<Box<dyn Inspector<Output = Language>>>,
    applications: ApplicationInspector,
    telemetry: OpenTelemetryInspector,
}

impl DetectionRunner {
    /// Runner with the default inspector order, reading binaries under `proc_root`
    pub fn new(proc_root: impl Into<PathBuf>, introspector: Box<dyn BinaryIntrospector>) -> Self {
        Self::with_inspectors(default_language_inspectors(proc_root, introspector))
    }

    pub fn with_inspectors(languages: Vec<Box<dyn Inspector<Output = Language>>>) -> Self {
        Self {
            languages,
            applications: ApplicationInspector::new(),
            telemetry: OpenTelemetryInspector,
        }
    }

    fn language_of(&self, sample: &ProcessSample) -> Option<Language> {
        self.languages.iter().find_map(|inspector| {
            let language = inspector.inspect(sample)?;
            debug!(pid = sample.pid, inspector = inspector.name(), %language, "Language matched");
            Some(language)
        })
    }

    /// Classify a container from its process samples.
    ///
    /// The first process with a recognized language decides the container's
    /// language. Telemetry and service name signals are gathered from every
    /// process of the container.
    pub fn detect_container(&self, container: &str, samples: &[ProcessSample]) -> ContainerDetection {
        let language = samples.iter().find_map(|sample| {
            let language = self.language_of(sample)?;
            let mut detected = LanguageByContainer::new(container, language);
            if language == Language::Go {
                detected.process_name = sample.exe.clone();
            }
            detected.opentelemetry_preconfigured = self.telemetry.any_preconfigured(samples);
            detected.active_service_name = detect_service_name(samples).unwrap_or_default();
            Some(detected)
        });

        let application = samples.iter().find_map(|sample| {
            self.applications
                .inspect(sample)
                .map(|app_type| ApplicationByContainer {
                    container_name: container.to_string(),
                    application: app_type.to_string(),
                    log_type: String::new(),
                })
        });

        ContainerDetection {
            language,
            application,
        }
    }
}
