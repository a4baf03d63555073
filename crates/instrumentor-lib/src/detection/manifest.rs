//! Dependency manifests found inside a container's root filesystem

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Pseudo filesystems never worth walking
const SKIPPED_ROOT_DIRS: &[&str] = &["proc", "sys", "dev"];

const REQUIREMENTS_TXT: &str = "requirements.txt";
const PACKAGE_JSON: &str = "package.json";
const GO_MOD: &str = "go.mod";

fn skip_entry(entry: &DirEntry) -> bool {
    entry.depth() == 1
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIPPED_ROOT_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Walk a root filesystem and merge the dependencies of every manifest.
///
/// Unreadable directories and malformed manifests are skipped.
pub fn collect_dependencies(root: &Path) -> HashMap<String, String> {
    let mut dependencies = HashMap::new();

    let manifests = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !skip_entry(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in manifests {
        let parser: fn(&str) -> Vec<(String, String)> = match entry.file_name().to_str() {
            Some(REQUIREMENTS_TXT) => parse_requirements,
            Some(PACKAGE_JSON) => parse_package_json,
            Some(GO_MOD) => parse_go_mod,
            _ => continue,
        };

        match fs::read_to_string(entry.path()) {
            Ok(content) => dependencies.extend(parser(&content)),
            Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping unreadable manifest"),
        }
    }

    dependencies
}

/// Parse `name==version` style requirement lines
pub fn parse_requirements(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            let split = line
                .find(|c: char| "=<>!~;[ ".contains(c))
                .unwrap_or(line.len());
            let (name, mut rest) = line.split_at(split);
            if name.is_empty() {
                return None;
            }
            if rest.starts_with('[') {
                rest = rest.split_once(']').map(|(_, r)| r).unwrap_or_default();
            }
            let version = rest
                .split(';')
                .next()
                .unwrap_or_default()
                .trim_start_matches(|c: char| "=<>!~ ".contains(c))
                .trim();
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}

/// Parse the `dependencies` object of a package.json
pub fn parse_package_json(content: &str) -> Vec<(String, String)> {
    let value: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    value
        .get("dependencies")
        .and_then(|d| d.as_object())
        .map(|deps| {
            deps.iter()
                .map(|(name, version)| {
                    (
                        name.clone(),
                        version.as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `require` directives of a go.mod
pub fn parse_go_mod(content: &str) -> Vec<(String, String)> {
    let mut dependencies = Vec::new();
    let mut in_block = false;

    for line in content.lines() {
        let line = line.split("//").next().unwrap_or_default().trim();
        if in_block {
            if line == ")" {
                in_block = false;
                continue;
            }
        } else if line == "require (" {
            in_block = true;
            continue;
        }

        let requirement = if in_block {
            line
        } else if let Some(rest) = line.strip_prefix("require ") {
            rest
        } else {
            continue;
        };

        let mut parts = requirement.split_whitespace();
        if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
            dependencies.push((module.to_string(), version.to_string()));
        }
    }

    dependencies
}
