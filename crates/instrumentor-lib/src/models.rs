//! Core data models shared by the detector and the controller

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Programming language of a container's main process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    #[serde(rename = "dotnet")]
    DotNet,
    #[serde(rename = "javascript")]
    JavaScript,
    Go,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Python => "python",
            Self::DotNet => "dotnet",
            Self::JavaScript => "javascript",
            Self::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(Self::Java),
            "python" => Ok(Self::Python),
            "dotnet" => Ok(Self::DotNet),
            "javascript" => Ok(Self::JavaScript),
            "go" => Ok(Self::Go),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// Known applications: (process name pattern, normalized application type).
///
/// Order is the tie-break priority when a process matches several names.
pub const KNOWN_APPLICATIONS: &[(&str, &str)] = &[
    ("kafka-server", "kafka_server"),
    ("mysql", "mysql"),
    ("nginx", "nginx"),
];

/// Map a matched process name to its normalized application type
pub fn application_type(process_name: &str) -> Option<&'static str> {
    KNOWN_APPLICATIONS
        .iter()
        .find(|(name, _)| *name == process_name)
        .map(|(_, app_type)| *app_type)
}

/// Language detected for a single container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanguageByContainer {
    pub container_name: String,
    pub language: Language,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub opentelemetry_preconfigured: bool,
    #[serde(default)]
    pub active_service_name: String,
}

impl LanguageByContainer {
    pub fn new(container_name: impl Into<String>, language: Language) -> Self {
        Self {
            container_name: container_name.into(),
            language,
            process_name: String::new(),
            opentelemetry_preconfigured: false,
            active_service_name: String::new(),
        }
    }
}

/// Application detected for a single container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationByContainer {
    pub container_name: String,
    pub application: String,
    #[serde(default)]
    pub log_type: String,
}

/// Outcome of one detection run over the containers of a pod.
///
/// Serialized as the detector pod's termination message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub language_by_container: Vec<LanguageByContainer>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub application_by_container: Vec<ApplicationByContainer>,
}

impl DetectionResult {
    /// Parse a detector pod termination message
    pub fn from_termination_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message.trim())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_empty(&self) -> bool {
        self.language_by_container.is_empty() && self.application_by_container.is_empty()
    }
}

// Older detector builds emit `null` for empty lists.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
