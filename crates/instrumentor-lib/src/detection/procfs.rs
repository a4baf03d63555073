//! procfs sampling of the processes that belong to a container

use super::manifest::collect_dependencies;
use super::ProcessSample;
use crate::error::DetectionError;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Substring that a container's kubelet-managed mount root contains
pub fn container_mount_marker(pod_uid: &str, container: &str) -> String {
    format!("{pod_uid}/containers/{container}")
}

/// Reads process information from a procfs root (normally the host's /proc)
pub struct ProcessSampler {
    proc_root: PathBuf,
}

impl ProcessSampler {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Sample every process whose mounts identify it as part of the container.
    ///
    /// Processes that exit while being sampled are skipped. An environment
    /// that exists but cannot be read fails the whole run.
    pub fn find_all_in_container(
        &self,
        pod_uid: &str,
        container: &str,
    ) -> Result<Vec<ProcessSample>, DetectionError> {
        let marker = container_mount_marker(pod_uid, container);
        let entries = fs::read_dir(&self.proc_root).map_err(|source| DetectionError::Read {
            path: self.proc_root.clone(),
            source,
        })?;

        let mut pids: Vec<i32> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        pids.sort_unstable();

        let mut samples = Vec::new();
        let mut dependencies: Option<HashMap<String, String>> = None;

        for pid in pids {
            let pid_dir = self.proc_root.join(pid.to_string());
            if !self.in_container(&pid_dir, &marker) {
                continue;
            }

            let environ = match read_environ(&pid_dir.join("environ")) {
                Ok(environ) => environ,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(pid, "Process exited during sampling");
                    continue;
                }
                Err(source) => return Err(DetectionError::Environment { pid, source }),
            };

            let deps = dependencies
                .get_or_insert_with(|| collect_dependencies(&pid_dir.join("root")))
                .clone();

            samples.push(ProcessSample {
                pid,
                exe: read_exe(&pid_dir),
                cmdline: read_cmdline(&pid_dir),
                environ,
                dependencies: deps,
            });
        }

        if samples.is_empty() {
            warn!(pod_uid, container, "No processes found for container");
        }

        Ok(samples)
    }

    fn in_container(&self, pid_dir: &Path, marker: &str) -> bool {
        match fs::read_to_string(pid_dir.join("mountinfo")) {
            Ok(content) => mountinfo_contains(&content, marker),
            Err(_) => false,
        }
    }
}

/// Whether any mount root (fourth mountinfo field) contains the marker as
/// whole path segments
fn mountinfo_contains(content: &str, marker: &str) -> bool {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|root| contains_path(root, marker))
}

/// `marker` occurs in `path` followed by `/` or the end of the path
fn contains_path(path: &str, marker: &str) -> bool {
    path.match_indices(marker).any(|(idx, _)| {
        let rest = &path[idx + marker.len()..];
        rest.is_empty() || rest.starts_with('/')
    })
}

fn read_exe(pid_dir: &Path) -> String {
    fs::read_link(pid_dir.join("exe"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_cmdline(pid_dir: &Path) -> String {
    match fs::read(pid_dir.join("cmdline")) {
        Ok(bytes) => bytes
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => String::new(),
    }
}

fn read_environ(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let bytes = fs::read(path)?;
    Ok(parse_environ(&bytes))
}

fn parse_environ(bytes: &[u8]) -> HashMap<String, String> {
    bytes
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
