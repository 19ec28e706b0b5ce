//! Engine configuration.
//!
//! An [`EngineConfig`] describes one project root: where modules live, how
//! test files are recognized, which names are rewritten before resolution,
//! and which caches may be used. Configs load from YAML and every field has
//! a default, so a config file only states what it changes.
//!
//! The index cache and the timing cache are both keyed by
//! [`EngineConfig::fingerprint`], a digest of the resolution-relevant
//! fields; changing any of them invalidates both caches.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::diagnostics::EngineError;

/// One ordered name-mapping rule: the first pattern matching a requested
/// name rewrites it to `target` before resolution proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameMapping {
    pub pattern: String,
    pub target: String,
}

/// Configuration for a test run over one project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Directory scanned for modules and test files.
    pub root_dir: PathBuf,
    /// Regex patterns; paths matching any of them are skipped during the
    /// index scan.
    pub ignore_patterns: Vec<String>,
    /// Name of the reserved subdirectory holding manual substitutes.
    pub substitute_dir: String,
    /// File suffixes registered as modules under their logical name.
    pub module_suffixes: Vec<String>,
    /// File suffixes treated as test files.
    pub test_suffixes: Vec<String>,
    /// Ordered name-mapping rules, evaluated in declaration order.
    pub name_mappings: Vec<NameMapping>,
    /// Module name required through the registry before each test file
    /// executes.
    pub setup_script: Option<String>,
    /// Default automocking policy for every file run.
    pub automock: bool,
    /// Where on-disk caches live; None disables persistence.
    pub cache_dir: Option<PathBuf>,
    /// Whether to consult on-disk caches at all.
    pub use_cache: bool,
    /// Sample process memory after each file's disposal.
    pub log_heap_usage: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            ignore_patterns: Vec::new(),
            substitute_dir: "__substitutes__".to_string(),
            module_suffixes: vec![".module.yaml".to_string(), ".module.yml".to_string()],
            test_suffixes: vec![".test.yaml".to_string(), ".test.yml".to_string()],
            name_mappings: Vec::new(),
            setup_script: None,
            automock: true,
            cache_dir: None,
            use_cache: true,
            log_heap_usage: false,
        }
    }
}

impl EngineConfig {
    /// Loads a config file, applying defaults for absent fields.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            EngineError::config(format!("failed to parse '{}': {}", path.display(), e))
        })
    }

    /// Convenience constructor for a root directory with default policy.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root.into(),
            ..Self::default()
        }
    }

    /// Stable digest of the resolution-relevant configuration. Keys both
    /// the resource-index cache and the timing cache.
    pub fn fingerprint(&self) -> String {
        let relevant = serde_json::json!({
            "root": self.root_dir,
            "ignore": self.ignore_patterns,
            "substitute-dir": self.substitute_dir,
            "module-suffixes": self.module_suffixes,
            "name-mappings": self.name_mappings.iter()
                .map(|m| [m.pattern.as_str(), m.target.as_str()])
                .collect::<Vec<_>>(),
        });
        let mut hasher = Sha256::new();
        hasher.update(relevant.to_string().as_bytes());
        let digest = hasher.finalize();
        // First 16 bytes are plenty for a cache key.
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Path of an on-disk cache file for this config, or None when cache
    /// persistence is disabled.
    pub fn cache_file(&self, kind: &str) -> Option<PathBuf> {
        if !self.use_cache {
            return None;
        }
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{}.json", kind, self.fingerprint())))
    }

    /// Recursively discovers test files under the root. Sorted for
    /// deterministic candidate order before sequencing.
    pub fn discover_test_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root_dir) {
            let entry = entry
                .map_err(|e| EngineError::config(format!("failed to walk root: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if self.is_test_file(path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn is_test_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.test_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    pub fn is_module_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.module_suffixes
            .iter()
            .any(|s| name.ends_with(s.as_str()))
    }

    /// Strips the module suffix to obtain the logical name a file is
    /// registered under.
    pub fn logical_name_of(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        for suffix in &self.module_suffixes {
            if let Some(stem) = name.strip_suffix(suffix.as_str()) {
                if !stem.is_empty() {
                    return Some(stem.to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_mappings() {
        let a = EngineConfig::for_root("/tmp/project");
        let b = EngineConfig::for_root("/tmp/project");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = EngineConfig::for_root("/tmp/project");
        c.name_mappings.push(NameMapping {
            pattern: "^image!.*$".to_string(),
            target: "GlobalImageStub".to_string(),
        });
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn logical_name_strips_the_module_suffix() {
        let config = EngineConfig::default();
        assert_eq!(
            config.logical_name_of(Path::new("/r/RegularModule.module.yaml")),
            Some("RegularModule".to_string())
        );
        assert_eq!(config.logical_name_of(Path::new("/r/notes.txt")), None);
    }

    #[test]
    fn test_files_match_by_suffix() {
        let config = EngineConfig::default();
        assert!(config.is_test_file(Path::new("/r/root.test.yaml")));
        assert!(!config.is_test_file(Path::new("/r/root.module.yaml")));
    }
}
