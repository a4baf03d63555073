//! Pod template patching for per-language telemetry agents
//!
//! Each supported language has an agent that is copied into a shared
//! emptyDir volume by an init container and activated through environment
//! variables. Patching is idempotent and reversible; injected variables are
//! tracked in a ledger annotation on the pod template.

mod annotation;
mod dotnet;
mod env;
mod java;
mod nodejs;
mod python;
mod template;

#[cfg(test)]
mod tests;

pub use annotation::AnnotationPatcher;
pub use env::{ContainerLedger, EnvInjection, EnvValue, InjectionLedger};

use crate::annotations;
use crate::error::PatchError;
use crate::models::Language;
use crate::record::InstrumentedApplication;
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec, VolumeMount};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use template::{
    ensure_init_container, ensure_volume, ensure_volume_mount, has_volume_mount,
    instrumented_languages, pod_security_context, pod_spec_mut, remove_init_container,
    remove_volume, remove_volume_mount, root_security_context, set_instrumented_languages,
    template_annotations,
};

/// (name, downward API field path)
const NODE_IP: (&str, &str) = ("NODE_IP", "status.hostIP");
const POD_NAME: (&str, &str) = ("POD_NAME", "metadata.name");
const RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";

fn resource_attributes(service_name: &str) -> String {
    format!("service.name={service_name},k8s.pod.name=$(POD_NAME)")
}

/// Images and endpoints the agents are configured with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSettings {
    /// Host of the collector service receiving OTLP
    pub monitoring_service_endpoint: String,
    pub java_agent_image: String,
    pub python_agent_image: String,
    pub dotnet_agent_image: String,
    pub nodejs_agent_image: String,
}

/// Static shape of a language agent
pub(crate) struct AgentProfile {
    volume: &'static str,
    mount_path: &'static str,
    init_container: &'static str,
    init_command: &'static [&'static str],
    /// Init container copies as root instead of the pod's user
    runs_as_root: bool,
    collects_metrics: bool,
}

/// Patcher for one supported language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguagePatcher {
    Java,
    Python,
    DotNet,
    NodeJs,
}

impl LanguagePatcher {
    pub fn for_language(language: Language) -> Result<Self, PatchError> {
        match language {
            Language::Java => Ok(Self::Java),
            Language::Python => Ok(Self::Python),
            Language::DotNet => Ok(Self::DotNet),
            Language::JavaScript => Ok(Self::NodeJs),
            Language::Go => Err(PatchError::NoPatcher(language)),
        }
    }

    pub fn language(&self) -> Language {
        match self {
            Self::Java => Language::Java,
            Self::Python => Language::Python,
            Self::DotNet => Language::DotNet,
            Self::NodeJs => Language::JavaScript,
        }
    }

    fn profile(&self) -> &'static AgentProfile {
        match self {
            Self::Java => &java::PROFILE,
            Self::Python => &python::PROFILE,
            Self::DotNet => &dotnet::PROFILE,
            Self::NodeJs => &nodejs::PROFILE,
        }
    }

    fn env(&self, settings: &AgentSettings, service_name: &str) -> Vec<EnvInjection> {
        match self {
            Self::Java => java::env(settings, service_name),
            Self::Python => python::env(settings, service_name),
            Self::DotNet => dotnet::env(settings, service_name),
            Self::NodeJs => nodejs::env(settings, service_name),
        }
    }

    fn image<'a>(&self, settings: &'a AgentSettings) -> &'a str {
        match self {
            Self::Java => &settings.java_agent_image,
            Self::Python => &settings.python_agent_image,
            Self::DotNet => &settings.dotnet_agent_image,
            Self::NodeJs => &settings.nodejs_agent_image,
        }
    }

    /// Containers of the template the record assigns to this language
    fn target_containers(&self, template: &PodTemplateSpec, record: &InstrumentedApplication) -> Vec<String> {
        let language = self.language();
        template
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .filter(|c| {
                record
                    .spec
                    .languages
                    .iter()
                    .any(|l| l.language == language && l.container_name == c.name)
            })
            .map(|c| c.name.clone())
            .collect()
    }

    /// Inject the agent into every container the record assigns to this
    /// language and mirror the computed service names into the record
    pub fn patch(
        &self,
        template: &mut PodTemplateSpec,
        record: &mut InstrumentedApplication,
        settings: &AgentSettings,
    ) -> Result<(), PatchError> {
        let targets = self.target_containers(template, record);
        if targets.is_empty() {
            return Ok(());
        }

        let service_names = targets
            .iter()
            .map(|c| Ok((c.clone(), service_name(template, c, record)?)))
            .collect::<Result<BTreeMap<String, String>, PatchError>>()?;

        let profile = self.profile();
        let mut ledger = InjectionLedger::load(template)?;
        let spec = pod_spec_mut(template);

        let security_context = if profile.runs_as_root {
            Some(root_security_context())
        } else {
            pod_security_context(spec)
        };
        ensure_volume(spec, profile.volume);
        ensure_init_container(
            spec,
            Container {
                name: profile.init_container.to_string(),
                image: Some(self.image(settings).to_string()),
                command: Some(profile.init_command.iter().map(|s| s.to_string()).collect()),
                security_context,
                volume_mounts: Some(vec![VolumeMount {
                    name: profile.volume.to_string(),
                    mount_path: profile.mount_path.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        );

        let mut named = BTreeSet::new();
        for container in spec.containers.iter_mut() {
            let Some(name) = service_names.get(&container.name) else {
                continue;
            };
            ensure_volume_mount(container, profile.volume, profile.mount_path);
            let container_ledger = ledger.container(&container.name);
            let injections = self.env(settings, name);
            for injection in &injections {
                injection.apply(container, container_ledger);
            }
            if sets_service_name(&injections, container_ledger) {
                named.insert(container.name.clone());
            }
        }
        ledger.store(template)?;

        let mut languages = instrumented_languages(template);
        languages.insert(self.language());
        set_instrumented_languages(template, &languages, collects_metrics(&languages));

        for entry in record.spec.languages.iter_mut() {
            if entry.language != self.language() || !named.contains(&entry.container_name) {
                continue;
            }
            if let Some(name) = service_names.get(&entry.container_name) {
                entry.active_service_name = name.clone();
            }
        }

        Ok(())
    }

    /// Remove everything [`Self::patch`] added, leaving user configuration intact
    pub fn unpatch(&self, template: &mut PodTemplateSpec) -> Result<(), PatchError> {
        let profile = self.profile();
        let mut ledger = InjectionLedger::load(template)?;

        if let Some(spec) = template.spec.as_mut() {
            for container in spec
                .containers
                .iter_mut()
                .filter(|c| has_volume_mount(c, profile.volume))
            {
                if let Some(container_ledger) = ledger.remove(&container.name) {
                    container_ledger.revert(container);
                }
                remove_volume_mount(container, profile.volume);
            }
            remove_init_container(spec, profile.init_container);
            remove_volume(spec, profile.volume);
        }
        ledger.store(template)?;

        let mut languages = instrumented_languages(template);
        languages.remove(&self.language());
        set_instrumented_languages(template, &languages, collects_metrics(&languages));
        Ok(())
    }

    /// Read from annotations only; patch and unpatch keep them in step
    pub fn is_traces_instrumented(&self, template: &PodTemplateSpec) -> bool {
        annotations::has_value(
            template_annotations(template),
            annotations::TRACES_INSTRUMENTED,
            annotations::TRUE,
        ) && instrumented_languages(template).contains(&self.language())
    }

    pub fn is_metrics_instrumented(&self, template: &PodTemplateSpec) -> bool {
        self.profile().collects_metrics
            && annotations::has_value(
                template_annotations(template),
                annotations::METRICS_INSTRUMENTED,
                annotations::TRUE,
            )
            && instrumented_languages(template).contains(&self.language())
    }

    /// Refresh injected service-name variables after the computed name
    /// changed. Returns whether the template or record was modified.
    pub fn update_service_name_env(
        &self,
        template: &mut PodTemplateSpec,
        record: &mut InstrumentedApplication,
        settings: &AgentSettings,
    ) -> Result<bool, PatchError> {
        let profile = self.profile();
        let ledger = InjectionLedger::load(template)?;
        let patched: Vec<String> = self
            .target_containers(template, record)
            .into_iter()
            .filter(|name| {
                template
                    .spec
                    .iter()
                    .flat_map(|s| s.containers.iter())
                    .any(|c| &c.name == name && has_volume_mount(c, profile.volume))
            })
            .collect();

        let mut service_names = BTreeMap::new();
        for container in &patched {
            service_names.insert(container.clone(), service_name(template, container, record)?);
        }

        let mut changed = false;
        let mut named = BTreeSet::new();
        if let Some(spec) = template.spec.as_mut() {
            for container in spec.containers.iter_mut() {
                let Some(name) = service_names.get(&container.name) else {
                    continue;
                };
                let Some(container_ledger) = ledger.get(&container.name) else {
                    continue;
                };
                let Some(env) = container.env.as_mut() else {
                    continue;
                };
                let injections = self.env(settings, name);
                if sets_service_name(&injections, container_ledger) {
                    named.insert(container.name.clone());
                }
                for injection in injections {
                    let EnvValue::Literal(expected) = &injection.value else {
                        continue;
                    };
                    if !injection.carries_service_name || !container_ledger.created.contains(injection.name) {
                        continue;
                    }
                    if let Some(var) = env.iter_mut().find(|e| e.name == injection.name) {
                        if var.value.as_ref() != Some(expected) {
                            var.value = Some(expected.clone());
                            changed = true;
                        }
                    }
                }
            }
        }

        for entry in record.spec.languages.iter_mut() {
            if entry.language != self.language() || !named.contains(&entry.container_name) {
                continue;
            }
            if let Some(name) = service_names.get(&entry.container_name) {
                if &entry.active_service_name != name {
                    entry.active_service_name = name.clone();
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}

/// The ledger shows the container got a variable carrying the service name
fn sets_service_name(injections: &[EnvInjection], ledger: &ContainerLedger) -> bool {
    injections
        .iter()
        .any(|i| i.carries_service_name && ledger.created.contains(i.name))
}

fn collects_metrics(languages: &BTreeSet<Language>) -> bool {
    languages.iter().any(|l| {
        LanguagePatcher::for_language(*l)
            .map(|p| p.profile().collects_metrics)
            .unwrap_or(false)
    })
}

/// Service name reported by a container.
///
/// An explicit annotation wins, then the container name when the pod has
/// several containers, then the owning workload's name.
pub fn service_name(
    template: &PodTemplateSpec,
    container: &str,
    record: &InstrumentedApplication,
) -> Result<String, PatchError> {
    if let Some(name) = annotations::value(template_annotations(template), annotations::SERVICE_NAME) {
        return Ok(name.to_string());
    }

    let container_count = template.spec.as_ref().map(|s| s.containers.len()).unwrap_or(0);
    if container_count > 1 {
        return Ok(container.to_string());
    }

    record
        .controller_owner()
        .or_else(|| record.owner_references().first())
        .map(|owner| owner.name.clone())
        .ok_or_else(|| PatchError::MissingOwner(record.name_any()))
}

/// Applies the language patchers a record calls for
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    settings: AgentSettings,
}

impl PatchEngine {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// One patcher per distinct detected language, in detection order.
    /// Languages without an agent leave their containers untouched.
    pub fn patchers(&self, record: &InstrumentedApplication) -> Result<Vec<LanguagePatcher>, PatchError> {
        let mut patchers: Vec<LanguagePatcher> = Vec::new();
        for entry in &record.spec.languages {
            let patcher = match LanguagePatcher::for_language(entry.language) {
                Ok(patcher) => patcher,
                Err(PatchError::NoPatcher(language)) => {
                    debug!(container = %entry.container_name, language = %language, "No agent for language, skipping container");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !patchers.contains(&patcher) {
                patchers.push(patcher);
            }
        }
        Ok(patchers)
    }

    pub fn modify_object(
        &self,
        template: &mut PodTemplateSpec,
        record: &mut InstrumentedApplication,
    ) -> Result<(), PatchError> {
        for patcher in self.patchers(record)? {
            patcher.patch(template, record, &self.settings)?;
        }
        Ok(())
    }

    pub fn rollback(
        &self,
        template: &mut PodTemplateSpec,
        record: &InstrumentedApplication,
    ) -> Result<(), PatchError> {
        for patcher in self.patchers(record)? {
            patcher.unpatch(template)?;
        }
        Ok(())
    }

    /// True only when every detected language is instrumented
    pub fn is_traces_instrumented(
        &self,
        template: &PodTemplateSpec,
        record: &InstrumentedApplication,
    ) -> Result<bool, PatchError> {
        let patchers = self.patchers(record)?;
        Ok(!patchers.is_empty() && patchers.iter().all(|p| p.is_traces_instrumented(template)))
    }

    pub fn is_metrics_instrumented(
        &self,
        template: &PodTemplateSpec,
        record: &InstrumentedApplication,
    ) -> Result<bool, PatchError> {
        Ok(self
            .patchers(record)?
            .iter()
            .any(|p| p.is_metrics_instrumented(template)))
    }

    pub fn update_active_service_name(
        &self,
        template: &mut PodTemplateSpec,
        record: &mut InstrumentedApplication,
    ) -> Result<bool, PatchError> {
        let mut changed = false;
        for patcher in self.patchers(record)? {
            changed |= patcher.update_service_name_env(template, record, &self.settings)?;
        }
        Ok(changed)
    }
}
