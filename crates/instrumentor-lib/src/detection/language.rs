//! Language inspectors based on process names and environment

use super::golang::{BinaryIntrospector, GoInspector};
use super::{Inspector, ProcessSample};
use crate::models::Language;
use std::path::PathBuf;

/// Matches a runtime name anywhere in the executable path or command line
pub struct ProcessNameInspector {
    language: Language,
    needle: &'static str,
}

impl ProcessNameInspector {
    pub const fn new(language: Language, needle: &'static str) -> Self {
        Self { language, needle }
    }

    pub const fn java() -> Self {
        Self::new(Language::Java, "java")
    }

    pub const fn python() -> Self {
        Self::new(Language::Python, "python")
    }

    pub const fn nodejs() -> Self {
        Self::new(Language::JavaScript, "node")
    }
}

impl Inspector for ProcessNameInspector {
    type Output = Language;

    fn name(&self) -> &'static str {
        self.needle
    }

    fn inspect(&self, sample: &ProcessSample) -> Option<Language> {
        (sample.exe.contains(self.needle) || sample.cmdline.contains(self.needle))
            .then_some(self.language)
    }
}

/// .NET runtimes export DOTNET_* or ASPNET* variables
pub struct DotNetInspector;

const DOTNET_MARKERS: &[&str] = &["ASPNET", "DOTNET"];

impl Inspector for DotNetInspector {
    type Output = Language;

    fn name(&self) -> &'static str {
        "dotnet"
    }

    fn inspect(&self, sample: &ProcessSample) -> Option<Language> {
        sample
            .environ
            .iter()
            .any(|(k, v)| DOTNET_MARKERS.iter().any(|m| k.contains(m) || v.contains(m)))
            .then_some(Language::DotNet)
    }
}

/// Inspectors in priority order: the first match wins for a process
pub fn default_language_inspectors(
    proc_root: impl Into<PathBuf>,
    introspector: Box<dyn BinaryIntrospector>,
) -> Vec<Box<dyn Inspector<Output = Language>>> {
    vec![
        Box::new(ProcessNameInspector::java()),
        Box::new(ProcessNameInspector::python()),
        Box::new(DotNetInspector),
        Box::new(ProcessNameInspector::nodejs()),
        Box::new(GoInspector::new(proc_root, introspector)),
    ]
}
