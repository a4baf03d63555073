//! Process-level language and application detection
//!
//! Runs inside the short-lived detector pod. The detector shares the node's
//! PID namespace, samples every process belonging to the target containers
//! and classifies them with an ordered set of inspectors.

mod application;
mod golang;
mod language;
mod manifest;
mod procfs;
mod runner;
mod telemetry;


pub use application::ApplicationInspector;
pub use golang::{BinaryIntrospector, ElfRuntimeIntrospector, GoInspector};
pub use language::{default_language_inspectors, DotNetInspector, ProcessNameInspector};
pub use manifest::{collect_dependencies, parse_go_mod, parse_package_json, parse_requirements};
pub use procfs::{container_mount_marker, ProcessSampler};
pub use runner::{ContainerDetection, DetectionRunner};
pub use telemetry::{detect_service_name, OpenTelemetryInspector};

use crate::error::DetectionError;
use crate::models::DetectionResult;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Snapshot of one process taken from procfs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSample {
    pub pid: i32,
    /// Resolved target of the process's exe link; empty when unreadable
    pub exe: String,
    /// Command line with NUL separators replaced by spaces
    pub cmdline: String,
    pub environ: HashMap<String, String>,
    /// Declared dependencies found in manifests under the process root
    pub dependencies: HashMap<String, String>,
}

/// Classifies a single process sample
pub trait Inspector: Send + Sync {
    type Output;

    fn name(&self) -> &'static str;

    fn inspect(&self, sample: &ProcessSample) -> Option<Self::Output>;
}

/// Sample and classify every named container of a pod
pub fn detect_pod(
    sampler: &ProcessSampler,
    runner: &DetectionRunner,
    pod_uid: &str,
    container_names: &[String],
) -> Result<DetectionResult, DetectionError> {
    let mut result = DetectionResult::default();

    for container in container_names.iter().filter(|c| !c.is_empty()) {
        let samples = sampler.find_all_in_container(pod_uid, container)?;
        let detection = runner.detect_container(container, &samples);

        info!(
            container = %container,
            processes = samples.len(),
            language = ?detection.language.as_ref().map(|l| l.language),
            application = ?detection.application.as_ref().map(|a| a.application.as_str()),
            "Container detection finished"
        );

        result.language_by_container.extend(detection.language);
        result.application_by_container.extend(detection.application);
    }

    Ok(result)
}

/// Write the result where the kubelet picks it up as the termination message
pub fn publish_result(path: &Path, result: &DetectionResult) -> Result<(), DetectionError> {
    let json = result.to_json()?;
    std::fs::write(path, json).map_err(|source| DetectionError::Write {
        path: path.to_path_buf(),
        source,
    })
}
