//! Patch engine tests

use super::*;
use crate::models::LanguageByContainer;
use crate::record::InstrumentedApplicationSpec;
use k8s_openapi::api::core::v1::{EnvVar, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeSet;

fn settings() -> AgentSettings {
    AgentSettings {
        monitoring_service_endpoint: "otel-collector.monitoring".into(),
        java_agent_image: "logzio/otel-agent-java:v1".into(),
        python_agent_image: "logzio/otel-agent-python:v1".into(),
        dotnet_agent_image: "logzio/otel-agent-dotnet:v1".into(),
        nodejs_agent_image: "logzio/otel-agent-nodejs:v1".into(),
    }
}

fn container(name: &str, env: &[(&str, &str)]) -> Container {
    Container {
        name: name.into(),
        image: Some(format!("shop/{name}:1.0")),
        env: if env.is_empty() {
            None
        } else {
            Some(
                env.iter()
                    .map(|(k, v)| EnvVar {
                        name: k.to_string(),
                        value: Some(v.to_string()),
                        value_from: None,
                    })
                    .collect(),
            )
        },
        ..Default::default()
    }
}

fn template(containers: Vec<Container>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some([("app".to_string(), "checkout".to_string())].into()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
    }
}

fn record(languages: &[(&str, Language)]) -> InstrumentedApplication {
    let mut record = InstrumentedApplication::new(
        "checkout",
        InstrumentedApplicationSpec {
            languages: languages
                .iter()
                .map(|(c, l)| LanguageByContainer::new(*c, *l))
                .collect(),
            ..Default::default()
        },
    );
    record.metadata.namespace = Some("shop".into());
    record.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        name: "checkout".into(),
        uid: "uid-1".into(),
        controller: Some(true),
        ..Default::default()
    }]);
    record
}

fn container_named<'a>(template: &'a PodTemplateSpec, name: &str) -> &'a Container {
    template
        .spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .find(|c| c.name == name)
        .unwrap()
}

fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)?
        .value
        .as_deref()
}

fn env_names(container: &Container) -> BTreeSet<String> {
    container
        .env
        .iter()
        .flatten()
        .map(|e| e.name.clone())
        .collect()
}

fn init_names(template: &PodTemplateSpec) -> Vec<String> {
    template
        .spec
        .as_ref()
        .unwrap()
        .init_containers
        .iter()
        .flatten()
        .map(|c| c.name.clone())
        .collect()
}

fn volume_names(template: &PodTemplateSpec) -> Vec<String> {
    template
        .spec
        .as_ref()
        .unwrap()
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.clone())
        .collect()
}

#[test]
fn test_python_patch_injects_agent() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[])]);
    let mut rec = record(&[("app", Language::Python)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    assert_eq!(volume_names(&tpl), vec!["agentdir-python"]);
    assert_eq!(init_names(&tpl), vec!["copy-python-agent"]);
    let init = &tpl.spec.as_ref().unwrap().init_containers.as_ref().unwrap()[0];
    assert_eq!(init.image.as_deref(), Some("logzio/otel-agent-python:v1"));
    assert_eq!(init.security_context.as_ref().unwrap().run_as_user, Some(0));

    let app = container_named(&tpl, "app");
    assert_eq!(env_value(app, "OTEL_TRACES_EXPORTER"), Some("otlp"));
    assert_eq!(
        env_value(app, "OTEL_EXPORTER_OTLP_ENDPOINT"),
        Some("http://otel-collector.monitoring:4318")
    );
    assert_eq!(
        env_value(app, "OTEL_RESOURCE_ATTRIBUTES"),
        Some("service.name=checkout,k8s.pod.name=$(POD_NAME)")
    );
    assert_eq!(app.env.as_ref().unwrap()[0].name, "POD_NAME");
    assert_eq!(app.volume_mounts.as_ref().unwrap()[0].mount_path, "/otel-auto-instrumentation");

    assert!(engine.is_traces_instrumented(&tpl, &rec).unwrap());
    assert!(engine.is_metrics_instrumented(&tpl, &rec).unwrap());
    assert_eq!(rec.spec.languages[0].active_service_name, "checkout");
}

#[test]
fn test_patch_is_idempotent() {
    let engine = PatchEngine::new(settings());
    let mut rec = record(&[("app", Language::Java)]);
    let mut once = template(vec![container("app", &[("JAVA_TOOL_OPTIONS", "-Xmx512m")])]);
    engine.modify_object(&mut once, &mut rec).unwrap();

    let mut twice = once.clone();
    engine.modify_object(&mut twice, &mut rec).unwrap();

    assert_eq!(once, twice);
    let app = container_named(&twice, "app");
    let options = env_value(app, "JAVA_TOOL_OPTIONS").unwrap();
    assert!(options.starts_with("-Xmx512m -javaagent:/agent/opentelemetry-javaagent-all.jar"));
    assert_eq!(options.matches("-javaagent").count(), 1);
}

#[test]
fn test_unpatch_restores_user_configuration() {
    for language in [Language::Java, Language::Python, Language::DotNet, Language::JavaScript] {
        let engine = PatchEngine::new(settings());
        let original = template(vec![container(
            "app",
            &[
                ("NODE_OPTIONS", "--max-old-space-size=256"),
                ("PYTHONPATH", "/srv/lib"),
                ("JAVA_TOOL_OPTIONS", "-Xmx1g"),
                ("OTEL_SERVICE_NAME", "user-defined"),
            ],
        )]);
        let mut rec = record(&[("app", language)]);

        let mut tpl = original.clone();
        engine.modify_object(&mut tpl, &mut rec).unwrap();
        assert!(engine.is_traces_instrumented(&tpl, &rec).unwrap(), "{language}");

        engine.rollback(&mut tpl, &rec).unwrap();
        assert_eq!(tpl, original, "{language}");
        assert!(!engine.is_traces_instrumented(&tpl, &rec).unwrap());
    }
}

#[test]
fn test_patch_is_scoped_to_recorded_containers() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[]), container("sidecar", &[("A", "1")])]);
    let mut rec = record(&[("app", Language::Python)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    let sidecar = container_named(&tpl, "sidecar");
    assert_eq!(env_names(sidecar), BTreeSet::from(["A".to_string()]));
    assert!(sidecar.volume_mounts.is_none());
    assert_eq!(rec.spec.languages[0].active_service_name, "app");
}

#[test]
fn test_multi_language_patches_compose() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("api", &[]), container("web", &[])]);
    let mut rec = record(&[("api", Language::Java), ("web", Language::JavaScript)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    assert_eq!(volume_names(&tpl), vec!["agentdir-java", "agentdir-nodejs"]);
    assert_eq!(env_value(container_named(&tpl, "web"), "OTEL_SERVICE_NAME"), Some("web"));
    assert!(env_value(container_named(&tpl, "api"), "NODE_OPTIONS").is_none());
    assert_eq!(
        tpl.metadata.as_ref().unwrap().annotations.as_ref().unwrap()
            [annotations::INSTRUMENTATION_LANGUAGE],
        "java,javascript"
    );
    assert!(engine.is_traces_instrumented(&tpl, &rec).unwrap());
    assert!(!engine.is_metrics_instrumented(&tpl, &rec).unwrap());

    // Removing one agent keeps the other intact
    LanguagePatcher::Java.unpatch(&mut tpl).unwrap();
    assert_eq!(volume_names(&tpl), vec!["agentdir-nodejs"]);
    assert!(LanguagePatcher::NodeJs.is_traces_instrumented(&tpl));
    assert!(!LanguagePatcher::Java.is_traces_instrumented(&tpl));
    assert_eq!(env_value(container_named(&tpl, "web"), "OTEL_SERVICE_NAME"), Some("web"));
}

#[test]
fn test_service_name_override_annotation() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[])]);
    tpl.metadata
        .as_mut()
        .unwrap()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotations::SERVICE_NAME.into(), "payments".into());
    let mut rec = record(&[("app", Language::DotNet)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    assert_eq!(env_value(container_named(&tpl, "app"), "OTEL_SERVICE_NAME"), Some("payments"));
    assert_eq!(rec.spec.languages[0].active_service_name, "payments");
}

#[test]
fn test_update_active_service_name() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[])]);
    let mut rec = record(&[("app", Language::Python)]);
    engine.modify_object(&mut tpl, &mut rec).unwrap();
    assert!(!engine.update_active_service_name(&mut tpl, &mut rec).unwrap());

    tpl.metadata
        .as_mut()
        .unwrap()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotations::SERVICE_NAME.into(), "checkout-v2".into());

    assert!(engine.update_active_service_name(&mut tpl, &mut rec).unwrap());
    assert_eq!(
        env_value(container_named(&tpl, "app"), "OTEL_RESOURCE_ATTRIBUTES"),
        Some("service.name=checkout-v2,k8s.pod.name=$(POD_NAME)")
    );
    assert_eq!(rec.spec.languages[0].active_service_name, "checkout-v2");
}

#[test]
fn test_go_containers_are_left_untouched() {
    assert!(matches!(
        LanguagePatcher::for_language(Language::Go),
        Err(PatchError::NoPatcher(Language::Go))
    ));

    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[]), container("api", &[("PORT", "8080")])]);
    let mut rec = record(&[("app", Language::Python), ("api", Language::Go)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    let api = container_named(&tpl, "api");
    assert_eq!(env_names(api), BTreeSet::from(["PORT".to_string()]));
    assert!(api.volume_mounts.is_none());
    assert_eq!(volume_names(&tpl), vec!["agentdir-python"]);
    assert!(engine.is_traces_instrumented(&tpl, &rec).unwrap());
    assert_eq!(rec.spec.languages[1].active_service_name, "");

    let original = template(vec![container("api", &[])]);
    let mut tpl = original.clone();
    let mut rec = record(&[("api", Language::Go)]);
    engine.modify_object(&mut tpl, &mut rec).unwrap();
    assert_eq!(tpl, original);
    assert!(!engine.is_traces_instrumented(&tpl, &rec).unwrap());
}

#[test]
fn test_user_service_name_is_not_reported_as_active() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container(
        "app",
        &[("OTEL_RESOURCE_ATTRIBUTES", "service.name=legacy-checkout")],
    )]);
    let mut rec = record(&[("app", Language::Java)]);

    engine.modify_object(&mut tpl, &mut rec).unwrap();

    assert_eq!(
        env_value(container_named(&tpl, "app"), "OTEL_RESOURCE_ATTRIBUTES"),
        Some("service.name=legacy-checkout")
    );
    assert_eq!(rec.spec.languages[0].active_service_name, "");
    assert!(!engine.update_active_service_name(&mut tpl, &mut rec).unwrap());
    assert_eq!(rec.spec.languages[0].active_service_name, "");
}

#[test]
fn test_missing_owner_is_an_error() {
    let engine = PatchEngine::new(settings());
    let mut tpl = template(vec![container("app", &[])]);
    let mut rec = record(&[("app", Language::Python)]);
    rec.metadata.owner_references = None;

    let err = engine.modify_object(&mut tpl, &mut rec).unwrap_err();
    assert!(matches!(err, PatchError::MissingOwner(name) if name == "checkout"));
}

#[test]
fn test_no_languages_is_not_instrumented() {
    let engine = PatchEngine::new(settings());
    let tpl = template(vec![container("app", &[])]);
    assert!(!engine.is_traces_instrumented(&tpl, &record(&[])).unwrap());
}
