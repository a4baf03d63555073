//! Error types for detection, patching and reconciliation

use crate::client::ClientError;
use crate::models::Language;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while sampling processes inside a detector pod
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read environment of process {pid}: {source}")]
    Environment {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write detection result to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode detection result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while patching a pod template
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("no instrumentation agent available for language {0}")]
    NoPatcher(Language),

    #[error("InstrumentedApplication {0} has no controller owner to derive a service name from")]
    MissingOwner(String),

    #[error("workload {0} has no pod template")]
    MissingTemplate(String),

    #[error("malformed {annotation} annotation: {source}")]
    Annotation {
        annotation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by a reconcile pass
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("{count} InstrumentedApplication records are owned by {kind} {namespace}/{name}")]
    MultipleRecords {
        count: usize,
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("no running pod found for {namespace}/{name}")]
    PodsNotFound { namespace: String, name: String },

    #[error("InstrumentedApplication {0} has no controller owner")]
    MissingOwner(String),

    #[error("unsupported owner kind {0}")]
    UnsupportedOwner(String),

    #[error("invalid detection result: {0}")]
    InvalidDetectionResult(#[source] serde_json::Error),
}

impl ReconcileError {
    /// Optimistic concurrency failure; the next watch event retries
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_not_found())
    }
}
