//! Environment variable injection and the ledger that makes it reversible
//!
//! Every variable the patcher creates, and every fragment it appends to a
//! variable the user already set, is written to the `logz.io/injected-env`
//! template annotation. Unpatching replays the ledger instead of guessing
//! which values belong to the user.

use crate::annotations;
use crate::error::PatchError;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodTemplateSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    /// Downward API field; injected ahead of user variables so later values
    /// can reference it with `$(NAME)`
    FieldRef(&'static str),
    /// Appended to an existing value with the separator, or set on its own
    Fragment {
        value: String,
        separator: &'static str,
    },
}

/// One environment variable an agent needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInjection {
    pub name: &'static str,
    pub value: EnvValue,
    /// The value embeds the active service name
    pub carries_service_name: bool,
}

impl EnvInjection {
    pub fn literal(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: EnvValue::Literal(value.into()),
            carries_service_name: false,
        }
    }

    pub fn field_ref(name: &'static str, field_path: &'static str) -> Self {
        Self {
            name,
            value: EnvValue::FieldRef(field_path),
            carries_service_name: false,
        }
    }

    pub fn fragment(name: &'static str, value: impl Into<String>, separator: &'static str) -> Self {
        Self {
            name,
            value: EnvValue::Fragment {
                value: value.into(),
                separator,
            },
            carries_service_name: false,
        }
    }

    pub fn with_service_name(mut self) -> Self {
        self.carries_service_name = true;
        self
    }

    fn to_env_var(&self) -> EnvVar {
        match &self.value {
            EnvValue::Literal(value) | EnvValue::Fragment { value, .. } => EnvVar {
                name: self.name.to_string(),
                value: Some(value.clone()),
                value_from: None,
            },
            EnvValue::FieldRef(path) => EnvVar {
                name: self.name.to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        api_version: None,
                        field_path: path.to_string(),
                    }),
                    ..Default::default()
                }),
            },
        }
    }

    /// Inject into a container, recording what was changed in `ledger`.
    ///
    /// Variables the user already set keep their value; only fragments are
    /// appended to them, and never to a variable sourced through `valueFrom`.
    pub fn apply(&self, container: &mut Container, ledger: &mut ContainerLedger) {
        let env = container.env.get_or_insert_with(Vec::new);

        let Some(position) = env.iter().position(|e| e.name == self.name) else {
            match self.value {
                EnvValue::FieldRef(_) => env.insert(0, self.to_env_var()),
                _ => env.push(self.to_env_var()),
            }
            ledger.created.insert(self.name.to_string());
            return;
        };

        if ledger.created.contains(self.name) {
            return;
        }

        if let EnvValue::Fragment { value, separator } = &self.value {
            let existing = &mut env[position];
            if existing.value_from.is_some() {
                debug!(variable = self.name, container = %container.name, "Variable set through valueFrom, not appending agent options");
                return;
            }
            let current = existing.value.clone().unwrap_or_default();
            if current.contains(value.as_str()) {
                return;
            }
            let inserted = if current.is_empty() {
                value.clone()
            } else {
                format!("{separator}{value}")
            };
            existing.value = Some(format!("{current}{inserted}"));
            ledger.appended.insert(self.name.to_string(), inserted);
        }
    }
}

/// What the patcher changed in one container's environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLedger {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub created: BTreeSet<String>,
    /// Exact text appended to user variables, separator included
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub appended: BTreeMap<String, String>,
}

impl ContainerLedger {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.appended.is_empty()
    }

    /// Undo every recorded change to the container's environment
    pub fn revert(&self, container: &mut Container) {
        let Some(env) = container.env.as_mut() else {
            return;
        };

        env.retain(|e| !self.created.contains(&e.name));

        for var in env.iter_mut() {
            let (Some(inserted), Some(current)) = (self.appended.get(&var.name), var.value.as_ref())
            else {
                continue;
            };
            let Some(idx) = current.rfind(inserted.as_str()) else {
                continue;
            };
            var.value = Some(format!("{}{}", &current[..idx], &current[idx + inserted.len()..]));
        }

        if env.is_empty() {
            container.env = None;
        }
    }
}

/// Per-container ledgers stored on the pod template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InjectionLedger(BTreeMap<String, ContainerLedger>);

impl InjectionLedger {
    pub fn load(template: &PodTemplateSpec) -> Result<Self, PatchError> {
        let raw = template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(annotations::INJECTED_ENV));

        match raw {
            Some(raw) => serde_json::from_str(raw).map_err(|source| PatchError::Annotation {
                annotation: annotations::INJECTED_ENV,
                source,
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn store(&self, template: &mut PodTemplateSpec) -> Result<(), PatchError> {
        let ledgers: BTreeMap<&String, &ContainerLedger> =
            self.0.iter().filter(|(_, l)| !l.is_empty()).collect();

        if ledgers.is_empty() {
            super::template::remove_annotation(template, annotations::INJECTED_ENV);
            return Ok(());
        }

        let raw = serde_json::to_string(&ledgers).map_err(|source| PatchError::Annotation {
            annotation: annotations::INJECTED_ENV,
            source,
        })?;
        super::template::annotations_mut(template).insert(annotations::INJECTED_ENV.to_string(), raw);
        Ok(())
    }

    pub fn container(&mut self, name: &str) -> &mut ContainerLedger {
        self.0.entry(name.to_string()).or_default()
    }

    pub fn get(&self, name: &str) -> Option<&ContainerLedger> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ContainerLedger> {
        self.0.remove(name)
    }
}
