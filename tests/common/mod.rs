//! Shared helpers for the integration suites: fixture locations and
//! pre-wired engine components over the committed fixture roots.
#![allow(dead_code)]

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use understudy::config::{EngineConfig, NameMapping};
use understudy::evaluate::YamlEvaluator;
use understudy::index::ResourceIndex;
use understudy::registry::ModuleRegistry;
use understudy::sandbox::SandboxEnvironment;

/// The main fixture root: regular modules, substitutes, cycles, and test
/// files.
pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/root")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixture_root().join(name)
}

/// A root where two files claim the same logical name.
pub fn duplicate_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/dup_root")
}

pub fn default_config() -> EngineConfig {
    EngineConfig::for_root(fixture_root())
}

/// Config with the image-stub name mapping installed.
pub fn mapping_config() -> EngineConfig {
    let mut config = default_config();
    config.name_mappings.push(NameMapping {
        pattern: "^image!.*$".to_string(),
        target: "GlobalImageStub".to_string(),
    });
    config
}

pub fn engine(config: EngineConfig) -> (Arc<EngineConfig>, Arc<ResourceIndex>) {
    let index = ResourceIndex::build(&config).expect("fixture index should build");
    (Arc::new(config), Arc::new(index))
}

/// A fresh registry and sandbox, as the orchestrator would wire them for
/// one file.
pub fn registry_for(config: EngineConfig) -> (ModuleRegistry, SandboxEnvironment) {
    let (config, index) = engine(config);
    let registry = ModuleRegistry::new(index, config, Rc::new(YamlEvaluator::new()))
        .expect("registry should build");
    (registry, SandboxEnvironment::new())
}

/// The file most requires in these suites originate from.
pub fn requesting_file() -> PathBuf {
    fixture_path("root.test.yaml")
}

/// A scratch directory unique to one test, under the target dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target/test-scratch")
        .join(format!("{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}
