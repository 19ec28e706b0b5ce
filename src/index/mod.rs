//! The Resource Index: the process-wide map from logical module names to
//! file paths.
//!
//! Built by scanning a root directory tree exactly once, then shared
//! read-only across every test file in the run. Two parallel namespaces are
//! maintained: regular modules, and manual substitutes found under the
//! reserved substitute subdirectory (by default `__substitutes__`).
//!
//! A logical name claimed by two distinct files is a fatal build error:
//! silent shadowing would make the real-vs-mock decision depend on scan
//! order.

pub mod cache;

use std::path::{Path, PathBuf};

use im::HashMap;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::diagnostics::EngineError;

pub use cache::shared;

/// Read-only map from logical module names to candidate file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceIndex {
    modules: HashMap<String, PathBuf>,
    substitutes: HashMap<String, PathBuf>,
    module_suffixes: Vec<String>,
    fingerprint: String,
}

impl ResourceIndex {
    /// Scans the configured root and builds the index. Idempotent: the
    /// same root and config always produce the same index.
    pub fn build(config: &EngineConfig) -> Result<Self, EngineError> {
        let ignore = RegexSet::new(&config.ignore_patterns)
            .map_err(|e| EngineError::config(format!("invalid ignore pattern: {}", e)))?;

        let mut modules: HashMap<String, PathBuf> = HashMap::new();
        let mut substitutes: HashMap<String, PathBuf> = HashMap::new();

        for entry in WalkDir::new(&config.root_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                EngineError::config(format!(
                    "failed to scan '{}': {}",
                    config.root_dir.display(),
                    e
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if ignore.is_match(&path.to_string_lossy()) {
                continue;
            }
            let Some(logical) = config.logical_name_of(path) else {
                continue;
            };

            let path = canonical(path);
            let namespace = if in_substitute_dir(&path, &config.substitute_dir) {
                &mut substitutes
            } else {
                &mut modules
            };
            if let Some(first) = namespace.get(&logical) {
                if *first != path {
                    return Err(EngineError::DuplicateModuleName {
                        name: logical,
                        first: first.clone(),
                        second: path,
                    });
                }
                continue;
            }
            namespace.insert(logical, path);
        }

        Ok(Self {
            modules,
            substitutes,
            module_suffixes: config.module_suffixes.clone(),
            fingerprint: config.fingerprint(),
        })
    }

    pub fn lookup(&self, logical_name: &str) -> Option<&PathBuf> {
        self.modules.get(logical_name)
    }

    pub fn lookup_substitute(&self, logical_name: &str) -> Option<&PathBuf> {
        self.substitutes.get(logical_name)
    }

    /// Suffixes tried when resolving extension-less path requests.
    pub fn module_suffixes(&self) -> &[String] {
        &self.module_suffixes
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn substitute_count(&self) -> usize {
        self.substitutes.len()
    }

    /// All registered (logical name, path) pairs, sorted by name.
    pub fn entries(&self) -> Vec<(String, PathBuf, bool)> {
        let mut entries: Vec<(String, PathBuf, bool)> = self
            .modules
            .iter()
            .map(|(n, p)| (n.clone(), p.clone(), false))
            .chain(
                self.substitutes
                    .iter()
                    .map(|(n, p)| (n.clone(), p.clone(), true)),
            )
            .collect();
        entries.sort();
        entries
    }
}

fn in_substitute_dir(path: &Path, substitute_dir: &str) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == substitute_dir)
}

// Canonical absolute form; files seen by the scan exist, so failures are
// limited to exotic filesystems and fall back to the scanned path.
pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_detection_checks_the_parent_directory() {
        assert!(in_substitute_dir(
            Path::new("/r/__substitutes__/M.module.yaml"),
            "__substitutes__"
        ));
        assert!(!in_substitute_dir(
            Path::new("/r/lib/M.module.yaml"),
            "__substitutes__"
        ));
    }
}
