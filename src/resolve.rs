//! Name resolution: from a request string to a canonical module identity.
//!
//! `resolve` is a pure function of (requesting file, requested name, index,
//! mapping rules). It knows nothing about mocking policy; real-vs-mock is
//! decided one layer up in the registry. Strategies are tried in a fixed
//! order (name mapping, path joining, logical-name lookup, substitute
//! lookup), and a failed resolution reports every strategy it attempted.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::config::NameMapping;
use crate::diagnostics::EngineError;
use crate::index::{canonical, ResourceIndex};

// ============================================================================
// TYPES
// ============================================================================

/// The canonical identity of one loadable unit. Two request strings
/// resolving to the same identity share one registry cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleIdentity {
    /// An absolute file path.
    File(PathBuf),
    /// A name-mapped target that exists only as a manual substitute.
    Virtual(String),
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleIdentity::File(path) => write!(f, "{}", path.display()),
            ModuleIdentity::Virtual(name) => write!(f, "virtual:{}", name),
        }
    }
}

/// A fully resolved request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: ModuleIdentity,
    /// The logical name consulted in the index, when the request was not a
    /// path. The registry uses it for manual-substitute lookup.
    pub logical: Option<String>,
    /// The post-mapping name, when a mapping rule rewrote the request.
    pub rewritten: Option<String>,
}

/// A compiled name-mapping rule.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pattern: Regex,
    target: String,
}

/// Compiles configured mapping rules, preserving declaration order.
pub fn compile_rules(mappings: &[NameMapping]) -> Result<Vec<MappingRule>, EngineError> {
    mappings
        .iter()
        .map(|m| {
            let pattern = Regex::new(&m.pattern).map_err(|e| {
                EngineError::config(format!("invalid name-mapping pattern '{}': {}", m.pattern, e))
            })?;
            Ok(MappingRule {
                pattern,
                target: m.target.clone(),
            })
        })
        .collect()
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolves a requested name from a requesting file to a module identity.
///
/// Deterministic: identical inputs always yield identical identities.
pub fn resolve(
    from: &Path,
    requested: &str,
    index: &ResourceIndex,
    rules: &[MappingRule],
) -> Result<Resolution, EngineError> {
    let mut attempted = Vec::new();

    // First matching rule wins and rewrites the request.
    let rewritten = apply_rules(requested, rules);
    if !rules.is_empty() {
        attempted.push("name-mapping".to_string());
    }
    let effective = rewritten.as_deref().unwrap_or(requested);

    if is_path_request(effective) {
        attempted.push("path resolution".to_string());
        if let Some(path) = resolve_path(from, effective, index.module_suffixes()) {
            return Ok(Resolution {
                identity: ModuleIdentity::File(path),
                logical: None,
                rewritten,
            });
        }
    } else {
        attempted.push("logical-name lookup".to_string());
        if let Some(path) = index.lookup(effective) {
            return Ok(Resolution {
                identity: ModuleIdentity::File(path.clone()),
                logical: Some(effective.to_string()),
                rewritten,
            });
        }
        attempted.push("manual-substitute lookup".to_string());
        if index.lookup_substitute(effective).is_some() {
            return Ok(Resolution {
                identity: ModuleIdentity::Virtual(effective.to_string()),
                logical: Some(effective.to_string()),
                rewritten,
            });
        }
    }

    Err(EngineError::ModuleNotFound {
        requested: requested.to_string(),
        rewritten,
        from: from.to_path_buf(),
        attempted,
    })
}

fn apply_rules(requested: &str, rules: &[MappingRule]) -> Option<String> {
    for rule in rules {
        if rule.pattern.is_match(requested) {
            return Some(rule.target.clone());
        }
    }
    None
}

fn is_path_request(name: &str) -> bool {
    name.starts_with("./") || name.starts_with("../") || Path::new(name).is_absolute()
}

// Joins a path request against the requesting file's directory, trying the
// configured module suffixes when the bare path does not exist.
fn resolve_path(from: &Path, request: &str, suffixes: &[String]) -> Option<PathBuf> {
    let base = if Path::new(request).is_absolute() {
        PathBuf::from(request)
    } else {
        from.parent().unwrap_or_else(|| Path::new(".")).join(request)
    };
    let base = normalize(&base);

    if base.is_file() {
        return Some(canonical(&base));
    }
    let file_name = base.file_name()?.to_str()?.to_string();
    for suffix in suffixes {
        let candidate = base.with_file_name(format!("{}{}", file_name, suffix));
        if candidate.is_file() {
            return Some(canonical(&candidate));
        }
    }
    None
}

// Lexical normalization: folds `.` and `..` without touching the
// filesystem. Symlink-accurate canonicalization happens on the final
// existing candidate.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> Vec<MappingRule> {
        let mappings: Vec<NameMapping> = pairs
            .iter()
            .map(|(p, t)| NameMapping {
                pattern: p.to_string(),
                target: t.to_string(),
            })
            .collect();
        compile_rules(&mappings).unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules(&[
            ("^image!.*$", "GlobalImageStub"),
            ("^image!special$", "SpecialStub"),
        ]);
        assert_eq!(
            apply_rules("image!special", &rules),
            Some("GlobalImageStub".to_string())
        );
        assert_eq!(apply_rules("plain", &rules), None);
    }

    #[test]
    fn invalid_mapping_pattern_is_a_config_error() {
        let mappings = vec![NameMapping {
            pattern: "([".to_string(),
            target: "X".to_string(),
        }];
        let err = compile_rules(&mappings).unwrap_err();
        assert_eq!(err.error_code(), "understudy::config::invalid");
    }

    #[test]
    fn path_requests_are_recognized() {
        assert!(is_path_request("./sibling"));
        assert!(is_path_request("../parent/mod"));
        assert!(is_path_request("/abs/path"));
        assert!(!is_path_request("LogicalName"));
    }

    #[test]
    fn normalization_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("/r/sub/../Regular.module.yaml")),
            PathBuf::from("/r/Regular.module.yaml")
        );
        assert_eq!(
            normalize(Path::new("/r/./a/./b")),
            PathBuf::from("/r/a/b")
        );
    }
}
