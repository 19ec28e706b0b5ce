//! The test-runner collaborator seam and the built-in declarative runner.
//!
//! The orchestrator hands the runner a registry and sandbox for one file
//! and consumes per-assertion records back. The built-in runner requires
//! the test file as a real module (so its directives execute through the
//! registry) and then interprets the file's `cases` list:
//!
//! ```yaml
//! directives:
//!   - require-mock: RegularModule
//!     bind: mock
//! exports:
//!   mock: {ref: mock}
//! cases:
//!   - name: stand-in records calls
//!     call: {target: [mock, setModuleStateValue], args: [1, 2]}
//!     actual: {calls-of: [mock, setModuleStateValue]}
//!     expected: 1
//! ```
//!
//! Case paths index into the module's exported value graph. Observations:
//! `value-at`, `calls-of`, `args-of`, `is-stand-in`, `same-object`,
//! `type-of`, or a plain literal. A failed observation fails that
//! assertion; a failure to collect the file at all propagates as the
//! file's execution error.

use std::path::Path;

use serde_yaml::Value as Yaml;

use crate::diagnostics::EngineError;
use crate::evaluate::{literal, member_of};
use crate::registry::ModuleRegistry;
use crate::results::AssertionRecord;
use crate::sandbox::SandboxEnvironment;
use crate::value::Value;

/// Everything a runner gets for one file.
pub struct RunnerContext<'a> {
    pub registry: &'a mut ModuleRegistry,
    pub sandbox: &'a mut SandboxEnvironment,
    pub path: &'a Path,
}

/// External test-runner collaborator.
pub trait TestRunner {
    fn run(&self, ctx: &mut RunnerContext<'_>) -> Result<Vec<AssertionRecord>, EngineError>;
}

/// Built-in runner for declarative YAML test files.
#[derive(Debug, Default)]
pub struct DeclarativeRunner;

impl DeclarativeRunner {
    pub fn new() -> Self {
        Self
    }
}

impl TestRunner for DeclarativeRunner {
    fn run(&self, ctx: &mut RunnerContext<'_>) -> Result<Vec<AssertionRecord>, EngineError> {
        // Collection: evaluate the test file as a real module. Its
        // requires and policy directives run here.
        let request = ctx.path.to_string_lossy().to_string();
        let exports = ctx
            .registry
            .require_module(ctx.sandbox, ctx.path, &request)?;

        let source = std::fs::read_to_string(ctx.path).map_err(|e| {
            EngineError::evaluation(ctx.path.display(), format!("failed to read test file: {}", e))
        })?;
        let doc: Yaml = serde_yaml::from_str(&source).map_err(|e| {
            EngineError::evaluation(ctx.path.display(), format!("invalid test file: {}", e))
        })?;

        let mut records = Vec::new();
        let Some(Yaml::Sequence(cases)) = doc.get("cases") else {
            return Ok(records);
        };
        for (i, case) in cases.iter().enumerate() {
            let title = case
                .get("name")
                .and_then(Yaml::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("case {}", i + 1));
            records.push(run_case(&title, case, &exports));
        }
        Ok(records)
    }
}

// ============================================================================
// CASE EXECUTION
// ============================================================================

fn run_case(title: &str, case: &Yaml, exports: &Value) -> AssertionRecord {
    match run_case_inner(case, exports) {
        Ok(()) => AssertionRecord::passed(title),
        Err(message) => AssertionRecord::failed(title, message),
    }
}

fn run_case_inner(case: &Yaml, exports: &Value) -> Result<(), String> {
    let mut acted = false;

    if let Some(call) = case.get("call") {
        acted = true;
        perform_call(call, exports)?;
    }

    if let Some(actual_spec) = case.get("actual") {
        let expected_spec = case
            .get("expected")
            .ok_or_else(|| "case has an actual clause but no expected clause".to_string())?;
        let actual = observe(actual_spec, exports)?;
        let expected = literal(expected_spec).map_err(|e| e.to_string())?;
        if actual != expected {
            return Err(format!(
                "value mismatch\n  expected: {}\n  actual:   {}",
                expected, actual
            ));
        }
        acted = true;
    }

    if acted {
        Ok(())
    } else {
        Err("case has neither a call nor an actual clause".to_string())
    }
}

fn perform_call(call: &Yaml, exports: &Value) -> Result<(), String> {
    let target_path = call
        .get("target")
        .ok_or_else(|| "call needs a target path".to_string())?;
    let target = walk(exports, target_path)?;
    let func = target
        .as_function()
        .ok_or_else(|| format!("call target is not a function: {}", target.type_name()))?;
    let mut args = Vec::new();
    if let Some(Yaml::Sequence(specs)) = call.get("args") {
        for spec in specs {
            args.push(literal(spec).map_err(|e| e.to_string())?);
        }
    }
    func.call(&args)
        .map(|_| ())
        .map_err(|e| format!("call raised: {}", e))
}

// Produces the observed value for an `actual` clause.
fn observe(spec: &Yaml, exports: &Value) -> Result<Value, String> {
    if let Yaml::Mapping(map) = spec {
        if map.len() == 1 {
            if let Some(path) = spec.get("value-at") {
                return walk(exports, path);
            }
            if let Some(path) = spec.get("calls-of") {
                let func = function_at(exports, path)?;
                return Ok(Value::Number(func.call_count() as f64));
            }
            if let Some(body) = spec.get("args-of") {
                let path = body
                    .get("path")
                    .ok_or_else(|| "args-of needs a path".to_string())?;
                let call_index = body.get("call").and_then(Yaml::as_u64).unwrap_or(0) as usize;
                let func = function_at(exports, path)?;
                let calls = func.calls();
                let record = calls
                    .get(call_index)
                    .ok_or_else(|| format!("no recorded call {}", call_index))?;
                return Ok(Value::sequence(record.clone()));
            }
            if let Some(path) = spec.get("is-stand-in") {
                let func = function_at(exports, path)?;
                return Ok(Value::Bool(func.is_stand_in()));
            }
            if let Some(path) = spec.get("type-of") {
                let value = walk(exports, path)?;
                return Ok(Value::String(value.type_name().to_string()));
            }
            if let Some(body) = spec.get("same-object") {
                let a = body
                    .get("a")
                    .ok_or_else(|| "same-object needs paths a and b".to_string())?;
                let b = body
                    .get("b")
                    .ok_or_else(|| "same-object needs paths a and b".to_string())?;
                let left = walk(exports, a)?;
                let right = walk(exports, b)?;
                return Ok(Value::Bool(left.same_object(&right)));
            }
        }
    }
    literal(spec).map_err(|e| e.to_string())
}

fn function_at(
    exports: &Value,
    path: &Yaml,
) -> Result<std::rc::Rc<crate::value::FunctionValue>, String> {
    let value = walk(exports, path)?;
    value
        .as_function()
        .cloned()
        .ok_or_else(|| format!("not a function: {}", value.type_name()))
}

// Walks a case path (sequence of keys/indices) into the export graph.
fn walk(exports: &Value, path: &Yaml) -> Result<Value, String> {
    let segments: Vec<String> = match path {
        Yaml::String(s) => vec![s.clone()],
        Yaml::Sequence(items) => items
            .iter()
            .map(|s| match s {
                Yaml::String(s) => Ok(s.clone()),
                Yaml::Number(n) => Ok(n.to_string()),
                _ => Err("path segments must be strings or numbers".to_string()),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err("path must be a string or a sequence".to_string()),
    };
    let mut current = exports.clone();
    for segment in &segments {
        current = member_of(&current, segment, "case path").map_err(|e| e.to_string())?;
    }
    Ok(current)
}
