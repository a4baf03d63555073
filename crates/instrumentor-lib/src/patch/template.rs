//! Pod template mutation helpers shared by the language patchers

use crate::annotations;
use crate::models::Language;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, SecurityContext, Volume,
    VolumeMount,
};
use std::collections::{BTreeMap, BTreeSet};

pub fn annotations_mut(template: &mut PodTemplateSpec) -> &mut BTreeMap<String, String> {
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
}

pub fn template_annotations(template: &PodTemplateSpec) -> Option<&BTreeMap<String, String>> {
    template.metadata.as_ref().and_then(|m| m.annotations.as_ref())
}

pub fn remove_annotation(template: &mut PodTemplateSpec, key: &str) {
    if let Some(map) = template.metadata.as_mut().and_then(|m| m.annotations.as_mut()) {
        map.remove(key);
        if map.is_empty() {
            if let Some(meta) = template.metadata.as_mut() {
                meta.annotations = None;
            }
        }
    }
}

pub fn pod_spec_mut(template: &mut PodTemplateSpec) -> &mut PodSpec {
    template.spec.get_or_insert_with(Default::default)
}

pub fn ensure_volume(spec: &mut PodSpec, name: &str) {
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == name) {
        volumes.push(Volume {
            name: name.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
}

pub fn remove_volume(spec: &mut PodSpec, name: &str) {
    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|v| v.name != name);
        if volumes.is_empty() {
            spec.volumes = None;
        }
    }
}

pub fn ensure_init_container(spec: &mut PodSpec, container: Container) {
    let init = spec.init_containers.get_or_insert_with(Vec::new);
    if !init.iter().any(|c| c.name == container.name) {
        init.push(container);
    }
}

pub fn remove_init_container(spec: &mut PodSpec, name: &str) {
    if let Some(init) = spec.init_containers.as_mut() {
        init.retain(|c| c.name != name);
        if init.is_empty() {
            spec.init_containers = None;
        }
    }
}

pub fn has_volume_mount(container: &Container, name: &str) -> bool {
    container
        .volume_mounts
        .as_ref()
        .map(|m| m.iter().any(|m| m.name == name))
        .unwrap_or(false)
}

pub fn ensure_volume_mount(container: &mut Container, name: &str, mount_path: &str) {
    if !has_volume_mount(container, name) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: name.to_string(),
                mount_path: mount_path.to_string(),
                ..Default::default()
            });
    }
}

pub fn remove_volume_mount(container: &mut Container, name: &str) {
    if let Some(mounts) = container.volume_mounts.as_mut() {
        mounts.retain(|m| m.name != name);
        if mounts.is_empty() {
            container.volume_mounts = None;
        }
    }
}

/// Init containers copying agent files into a shared volume that must be
/// writable regardless of the pod's own user
pub fn root_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(false),
        run_as_user: Some(0),
        run_as_group: Some(0),
        ..Default::default()
    }
}

/// Run an init container with the same identity as the pod
pub fn pod_security_context(spec: &PodSpec) -> Option<SecurityContext> {
    let pod = spec.security_context.as_ref()?;
    Some(SecurityContext {
        run_as_user: pod.run_as_user,
        run_as_group: pod.run_as_group,
        run_as_non_root: pod.run_as_non_root,
        ..Default::default()
    })
}

/// Languages recorded in the instrumentation-language annotation
pub fn instrumented_languages(template: &PodTemplateSpec) -> BTreeSet<Language> {
    annotations::value(template_annotations(template), annotations::INSTRUMENTATION_LANGUAGE)
        .map(|raw| raw.split(',').filter_map(|l| l.parse().ok()).collect())
        .unwrap_or_default()
}

/// Rewrite the language set and the instrumented flags that derive from it
pub fn set_instrumented_languages(
    template: &mut PodTemplateSpec,
    languages: &BTreeSet<Language>,
    metrics: bool,
) {
    if languages.is_empty() {
        remove_annotation(template, annotations::INSTRUMENTATION_LANGUAGE);
        remove_annotation(template, annotations::TRACES_INSTRUMENTED);
        remove_annotation(template, annotations::METRICS_INSTRUMENTED);
        return;
    }

    let joined = languages
        .iter()
        .map(Language::as_str)
        .collect::<Vec<_>>()
        .join(",");
    let map = annotations_mut(template);
    map.insert(annotations::INSTRUMENTATION_LANGUAGE.to_string(), joined);
    map.insert(annotations::TRACES_INSTRUMENTED.to_string(), annotations::TRUE.to_string());
    if metrics {
        map.insert(annotations::METRICS_INSTRUMENTED.to_string(), annotations::TRUE.to_string());
    } else {
        remove_annotation(template, annotations::METRICS_INSTRUMENTED);
    }
}
