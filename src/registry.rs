//! The per-file Module Registry: caching, cycle handling, and the
//! real-vs-mock decision.
//!
//! One registry serves exactly one test file run. It owns two disjoint
//! caches, real modules and mocks, so the same identity can be loaded
//! both ways without collision, and the mocking policy as explicit fields
//! (automock flag, per-identity real overrides) passed by ownership into
//! every decision. There is no process-wide mutable policy state.
//!
//! Real entries are two-phase: a `Pending` placeholder carrying the
//! in-progress exports object is inserted before evaluation begins, and
//! replaced by `Resolved` on completion. A dependency cycle A→B→A is
//! served the pending exports of A during B's evaluation instead of
//! recursing forever.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::collaborators::CoverageCollector;
use crate::config::EngineConfig;
use crate::diagnostics::EngineError;
use crate::evaluate::ModuleEvaluator;
use crate::index::ResourceIndex;
use crate::mock;
use crate::resolve::{self, MappingRule, ModuleIdentity, Resolution};
use crate::sandbox::SandboxEnvironment;
use crate::value::Value;

// ============================================================================
// REGISTRY STATE
// ============================================================================

/// A real-module cache entry.
#[derive(Clone)]
pub enum ModuleEntry {
    /// Evaluation in flight; holds the partially-populated exports object.
    Pending(Value),
    /// Evaluation complete.
    Resolved(Value),
}

impl ModuleEntry {
    pub fn value(&self) -> &Value {
        match self {
            ModuleEntry::Pending(v) | ModuleEntry::Resolved(v) => v,
        }
    }
}

/// Per-test-file module registry.
pub struct ModuleRegistry {
    index: Arc<ResourceIndex>,
    config: Arc<EngineConfig>,
    rules: Vec<MappingRule>,
    evaluator: Rc<dyn ModuleEvaluator>,
    loaded_real: HashMap<ModuleIdentity, ModuleEntry>,
    loaded_mock: HashMap<ModuleIdentity, Value>,
    automock_enabled: bool,
    real_overrides: HashSet<ModuleIdentity>,
    coverage: Option<Rc<dyn CoverageCollector>>,
}

impl ModuleRegistry {
    pub fn new(
        index: Arc<ResourceIndex>,
        config: Arc<EngineConfig>,
        evaluator: Rc<dyn ModuleEvaluator>,
    ) -> Result<Self, EngineError> {
        let rules = resolve::compile_rules(&config.name_mappings)?;
        Ok(Self {
            index,
            automock_enabled: config.automock,
            config,
            rules,
            evaluator,
            loaded_real: HashMap::new(),
            loaded_mock: HashMap::new(),
            real_overrides: HashSet::new(),
            coverage: None,
        })
    }

    pub fn with_coverage(mut self, coverage: Rc<dyn CoverageCollector>) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Resolves a request without loading anything.
    pub fn resolve(&self, from: &Path, requested: &str) -> Result<Resolution, EngineError> {
        resolve::resolve(from, requested, &self.index, &self.rules)
    }

    // ========================================================================
    // REQUIRE
    // ========================================================================

    /// Requires the real implementation of a module, loading it at most
    /// once per file run.
    pub fn require_module(
        &mut self,
        sandbox: &mut SandboxEnvironment,
        from: &Path,
        requested: &str,
    ) -> Result<Value, EngineError> {
        let resolution = self.resolve(from, requested)?;
        self.require_resolved_real(sandbox, &resolution)
    }

    /// The automocking decision: manual substitute, synthesized mock, or
    /// the real module, depending on policy and what is registered.
    pub fn require_module_or_mock(
        &mut self,
        sandbox: &mut SandboxEnvironment,
        from: &Path,
        requested: &str,
    ) -> Result<Value, EngineError> {
        let resolution = self.resolve(from, requested)?;

        if !self.automock_enabled || self.real_overrides.contains(&resolution.identity) {
            return self.require_resolved_real(sandbox, &resolution);
        }
        if let Some(mock) = self.loaded_mock.get(&resolution.identity) {
            return Ok(mock.clone());
        }

        // Manual substitutes always win over automatic synthesis.
        if let Some(logical) = resolution.logical.as_deref() {
            if let Some(substitute) = self.index.lookup_substitute(logical).cloned() {
                let sub_resolution = Resolution {
                    identity: ModuleIdentity::File(substitute),
                    logical: Some(logical.to_string()),
                    rewritten: None,
                };
                let value = self.require_resolved_real(sandbox, &sub_resolution)?;
                self.loaded_mock.insert(resolution.identity, value.clone());
                return Ok(value);
            }
        }

        // Synthesize from the real export value. An already-loaded real
        // module (resolved, or pending mid-cycle) is reused; otherwise the
        // module is evaluated transiently, without retaining a real entry.
        let real = match self.loaded_real.get(&resolution.identity) {
            Some(entry) => entry.value().clone(),
            None => self.evaluate_module(sandbox, &resolution.identity, false)?,
        };
        let mock = mock::synthesize(&real);
        self.loaded_mock.insert(resolution.identity, mock.clone());
        Ok(mock)
    }

    fn require_resolved_real(
        &mut self,
        sandbox: &mut SandboxEnvironment,
        resolution: &Resolution,
    ) -> Result<Value, EngineError> {
        if let Some(entry) = self.loaded_real.get(&resolution.identity) {
            return Ok(entry.value().clone());
        }
        self.evaluate_module(sandbox, &resolution.identity, true)
    }

    // Evaluates one module's source in the sandbox. `retain` keeps the
    // resolved entry in the real cache; the transient path (automock
    // synthesis) drops it after evaluation.
    fn evaluate_module(
        &mut self,
        sandbox: &mut SandboxEnvironment,
        identity: &ModuleIdentity,
        retain: bool,
    ) -> Result<Value, EngineError> {
        let path = self.source_path(identity)?;
        let source = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::evaluation(identity, format!("failed to read source: {}", e))
        })?;

        let exports = Value::new_mapping();
        self.loaded_real
            .insert(identity.clone(), ModuleEntry::Pending(exports.clone()));

        let evaluator = Rc::clone(&self.evaluator);
        let mut scope = ModuleScope {
            registry: self,
            sandbox,
            file: path.clone(),
            exports,
        };
        let result = evaluator.evaluate(&source, identity, &mut scope);

        match result {
            Ok(value) => {
                if retain {
                    self.loaded_real
                        .insert(identity.clone(), ModuleEntry::Resolved(value.clone()));
                } else {
                    self.loaded_real.remove(identity);
                }
                if let Some(coverage) = &self.coverage {
                    coverage.on_module_evaluated(&path, &source);
                }
                Ok(value)
            }
            Err(err) => {
                // Drop the cycle-guard placeholder so a later require is
                // not handed corrupt partial state.
                self.loaded_real.remove(identity);
                Err(err)
            }
        }
    }

    fn source_path(&self, identity: &ModuleIdentity) -> Result<PathBuf, EngineError> {
        match identity {
            ModuleIdentity::File(path) => Ok(path.clone()),
            ModuleIdentity::Virtual(name) => self
                .index
                .lookup_substitute(name)
                .cloned()
                .ok_or_else(|| {
                    EngineError::internal(format!(
                        "virtual module '{}' has no registered substitute",
                        name
                    ))
                }),
        }
    }

    // ========================================================================
    // POLICY
    // ========================================================================

    /// Toggles automocking for subsequent requires. Cached entries are
    /// never invalidated retroactively.
    pub fn set_automock(&mut self, enabled: bool) {
        self.automock_enabled = enabled;
    }

    /// Restores the configured automock default.
    pub fn restore_automock(&mut self) {
        self.automock_enabled = self.config.automock;
    }

    pub fn automock_enabled(&self) -> bool {
        self.automock_enabled
    }

    /// Forces one name to always resolve to the real implementation.
    /// The name goes through full resolution, so denormalized spellings of
    /// the same module land on the same identity.
    pub fn force_real(&mut self, from: &Path, requested: &str) -> Result<(), EngineError> {
        let resolution = self.resolve(from, requested)?;
        self.real_overrides.insert(resolution.identity);
        Ok(())
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub fn has_real(&self, identity: &ModuleIdentity) -> bool {
        self.loaded_real.contains_key(identity)
    }

    pub fn has_mock(&self, identity: &ModuleIdentity) -> bool {
        self.loaded_mock.contains_key(identity)
    }

    /// Releases every cached module. Called on teardown.
    pub fn clear(&mut self) {
        self.loaded_real.clear();
        self.loaded_mock.clear();
        self.real_overrides.clear();
    }
}

// ============================================================================
// MODULE SCOPE
// ============================================================================

/// The surface an evaluating module sees: requires recurse into the owning
/// registry, policy mutations apply to the rest of the file run, and the
/// exports object is the module's own in-progress mapping.
pub struct ModuleScope<'a> {
    registry: &'a mut ModuleRegistry,
    sandbox: &'a mut SandboxEnvironment,
    file: PathBuf,
    exports: Value,
}

impl<'a> ModuleScope<'a> {
    pub fn require(&mut self, requested: &str) -> Result<Value, EngineError> {
        let from = self.file.clone();
        self.registry.require_module(self.sandbox, &from, requested)
    }

    pub fn require_or_mock(&mut self, requested: &str) -> Result<Value, EngineError> {
        let from = self.file.clone();
        self.registry
            .require_module_or_mock(self.sandbox, &from, requested)
    }

    pub fn set_automock(&mut self, enabled: bool) {
        self.registry.set_automock(enabled);
    }

    pub fn restore_automock(&mut self) {
        self.registry.restore_automock();
    }

    pub fn force_real(&mut self, requested: &str) -> Result<(), EngineError> {
        let from = self.file.clone();
        self.registry.force_real(&from, requested)
    }

    /// The module's in-progress exports mapping.
    pub fn exports(&self) -> &Value {
        &self.exports
    }

    /// Publishes one export. Visible immediately to any module holding the
    /// in-progress exports object through a cycle.
    pub fn export(&self, key: &str, value: Value) {
        if let Some(map) = self.exports.as_mapping() {
            map.insert(key, value);
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn emit(&mut self, text: &str) {
        use crate::sandbox::OutputSink;
        self.sandbox.console().emit(text);
    }

    pub fn schedule_timer(&mut self, delay_ms: u64) -> u64 {
        self.sandbox.timers().schedule(delay_ms)
    }

    pub fn global(&self, key: &str) -> Option<Value> {
        self.sandbox.global(key)
    }

    pub fn set_global(&self, key: &str, value: Value) {
        self.sandbox.set_global(key, value);
    }

    /// Direct access to the exports mapping for computed members.
    pub fn exports_mapping(&self) -> Option<&Rc<crate::value::MappingValue>> {
        self.exports.as_mapping()
    }
}
