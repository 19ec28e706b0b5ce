//! Module evaluation: turning source text into an exported value.
//!
//! The engine treats "evaluate module source" as a seam: anything
//! implementing [`ModuleEvaluator`] can host module code. Evaluation
//! receives a [`ModuleScope`] wired back into the owning registry, so a
//! module's own requires recurse through the same caches and its policy
//! mutations apply to the rest of the file run.
//!
//! The built-in [`YamlEvaluator`] evaluates a declarative YAML module
//! format: an ordered `directives` list executed top to bottom, then an
//! `exports` tree of value specs published key by key into the module's
//! in-progress exports mapping (which is what dependency cycles observe).
//!
//! Directives:
//! - `require` / `require-mock` with an optional `bind` alias
//! - `automock: true|false`, `unmock: <name>`, `restore-automock: true`
//! - `export: {key, value}` to publish mid-evaluation
//! - `call: {target, args}` to invoke a function during evaluation
//! - `print: <text>`, `schedule: <ms>`, `set-global: {key, value}`
//!
//! Value specs: YAML literals, `{fn: …}` function declarations,
//! `{getter: …}` computed members, `{class: …}` class declarations,
//! `{ref: …}` references to required bindings, `{global: <name>}`.

use std::collections::HashMap;
use std::rc::Rc;

use serde_yaml::Value as Yaml;

use crate::diagnostics::EngineError;
use crate::registry::ModuleScope;
use crate::resolve::ModuleIdentity;
use crate::value::{ClassValue, FnBehavior, FunctionValue, MappingValue, Value};

/// The "evaluate module source" primitive.
pub trait ModuleEvaluator {
    fn evaluate(
        &self,
        source: &str,
        identity: &ModuleIdentity,
        scope: &mut ModuleScope<'_>,
    ) -> Result<Value, EngineError>;
}

/// Built-in evaluator for the declarative YAML module format.
#[derive(Debug, Default)]
pub struct YamlEvaluator;

impl YamlEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleEvaluator for YamlEvaluator {
    fn evaluate(
        &self,
        source: &str,
        identity: &ModuleIdentity,
        scope: &mut ModuleScope<'_>,
    ) -> Result<Value, EngineError> {
        let module = identity.to_string();
        let doc: Yaml = serde_yaml::from_str(source)
            .map_err(|e| EngineError::evaluation(&module, format!("invalid module source: {}", e)))?;

        match &doc {
            Yaml::Null => return Ok(scope.exports().clone()),
            Yaml::Mapping(_) => {}
            _ => {
                return Err(EngineError::evaluation(
                    &module,
                    "module source must be a mapping",
                ))
            }
        }

        let mut bindings: HashMap<String, Value> = HashMap::new();

        if let Some(directives) = doc.get("directives") {
            let Yaml::Sequence(directives) = directives else {
                return Err(EngineError::evaluation(&module, "directives must be a sequence"));
            };
            for directive in directives {
                apply_directive(directive, scope, &mut bindings, &module)?;
            }
        }

        if let Some(exports) = doc.get("exports") {
            let Yaml::Mapping(entries) = exports else {
                return Err(EngineError::evaluation(&module, "exports must be a mapping"));
            };
            let Some(target) = scope.exports_mapping().cloned() else {
                return Err(EngineError::internal("module exports object is not a mapping"));
            };
            for (key, spec) in entries {
                let key = key_str(key, &module)?;
                insert_entry(&target, &key, spec, &bindings, scope, &module)?;
            }
        }

        Ok(scope.exports().clone())
    }
}

// ============================================================================
// DIRECTIVES
// ============================================================================

fn apply_directive(
    directive: &Yaml,
    scope: &mut ModuleScope<'_>,
    bindings: &mut HashMap<String, Value>,
    module: &str,
) -> Result<(), EngineError> {
    let Yaml::Mapping(_) = directive else {
        return Err(EngineError::evaluation(module, "directive must be a mapping"));
    };

    if let Some(name) = directive.get("require") {
        let name = str_of(name, module, "require")?;
        let value = scope.require(&name)?;
        let alias = opt_str(directive.get("bind")).unwrap_or_else(|| name.clone());
        bindings.insert(alias, value);
        return Ok(());
    }
    if let Some(name) = directive.get("require-mock") {
        let name = str_of(name, module, "require-mock")?;
        let value = scope.require_or_mock(&name)?;
        let alias = opt_str(directive.get("bind")).unwrap_or_else(|| name.clone());
        bindings.insert(alias, value);
        return Ok(());
    }
    if let Some(flag) = directive.get("automock") {
        scope.set_automock(flag_of(flag, module, "automock")?);
        return Ok(());
    }
    if let Some(name) = directive.get("unmock") {
        let name = str_of(name, module, "unmock")?;
        scope.force_real(&name)?;
        return Ok(());
    }
    if directive.get("restore-automock").is_some() {
        scope.restore_automock();
        return Ok(());
    }
    if let Some(entry) = directive.get("export") {
        let key = entry
            .get("key")
            .and_then(Yaml::as_str)
            .ok_or_else(|| EngineError::evaluation(module, "export directive needs a key"))?
            .to_string();
        let spec = entry
            .get("value")
            .ok_or_else(|| EngineError::evaluation(module, "export directive needs a value"))?;
        let value = build_value(spec, bindings, scope, module, Some(&key))?;
        scope.export(&key, value);
        return Ok(());
    }
    if let Some(call) = directive.get("call") {
        let target_spec = call
            .get("target")
            .ok_or_else(|| EngineError::evaluation(module, "call directive needs a target"))?;
        let target = build_value(target_spec, bindings, scope, module, None)?;
        let mut args = Vec::new();
        if let Some(Yaml::Sequence(specs)) = call.get("args") {
            for spec in specs {
                args.push(build_value(spec, bindings, scope, module, None)?);
            }
        }
        let Some(func) = target.as_function() else {
            return Err(EngineError::evaluation(
                module,
                format!("call target is not a function: {}", target.type_name()),
            ));
        };
        func.call(&args)?;
        return Ok(());
    }
    if let Some(text) = directive.get("print") {
        let text = str_of(text, module, "print")?;
        scope.emit(&text);
        return Ok(());
    }
    if let Some(delay) = directive.get("schedule") {
        let delay = delay
            .as_u64()
            .ok_or_else(|| EngineError::evaluation(module, "schedule delay must be a number"))?;
        scope.schedule_timer(delay);
        return Ok(());
    }
    if let Some(entry) = directive.get("set-global") {
        let key = entry
            .get("key")
            .and_then(Yaml::as_str)
            .ok_or_else(|| EngineError::evaluation(module, "set-global directive needs a key"))?;
        let spec = entry.get("value").unwrap_or(&Yaml::Null);
        let value = build_value(spec, bindings, scope, module, Some(key))?;
        scope.set_global(key, value);
        return Ok(());
    }

    Err(EngineError::evaluation(module, "unknown directive"))
}

// ============================================================================
// VALUE SPECS
// ============================================================================

// Builds a value from a spec. Computed (`getter`) members are only legal
// as mapping entries and are handled by `insert_entry` before this runs.
fn build_value(
    spec: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
    name_hint: Option<&str>,
) -> Result<Value, EngineError> {
    match spec {
        Yaml::Null => Ok(Value::Nil),
        Yaml::Bool(b) => Ok(Value::Bool(*b)),
        Yaml::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(0.0))),
        Yaml::String(s) => Ok(Value::String(s.clone())),
        Yaml::Sequence(items) => {
            let mut built = Vec::with_capacity(items.len());
            for item in items {
                built.push(build_value(item, bindings, scope, module, None)?);
            }
            Ok(Value::sequence(built))
        }
        Yaml::Mapping(map) => {
            if map.len() == 1 {
                if let Some(body) = spec.get("fn") {
                    return build_function(body, bindings, scope, module, name_hint);
                }
                if let Some(body) = spec.get("class") {
                    return build_class(body, bindings, scope, module, name_hint);
                }
                if let Some(path) = spec.get("ref") {
                    return resolve_ref(path, bindings, module);
                }
                if let Some(name) = spec.get("global") {
                    let name = str_of(name, module, "global")?;
                    return Ok(scope.global(&name).unwrap_or(Value::Nil));
                }
                if spec.get("getter").is_some() {
                    return Err(EngineError::evaluation(
                        module,
                        "computed members are only valid inside a mapping",
                    ));
                }
            }
            let target = Rc::new(MappingValue::new());
            for (key, member) in map {
                let key = key_str(key, module)?;
                insert_entry(&target, &key, member, bindings, scope, module)?;
            }
            Ok(Value::Mapping(target))
        }
        Yaml::Tagged(_) => Err(EngineError::evaluation(module, "unsupported tagged value")),
    }
}

// Inserts one member into a mapping, routing `getter` specs to computed
// slots and everything else through `build_value`.
fn insert_entry(
    target: &Rc<MappingValue>,
    key: &str,
    spec: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
) -> Result<(), EngineError> {
    if let Yaml::Mapping(map) = spec {
        if map.len() == 1 {
            if let Some(body) = spec.get("getter") {
                let getter = build_getter(body, bindings, scope, module, key)?;
                target.insert_computed(key, getter);
                return Ok(());
            }
        }
    }
    let value = build_value(spec, bindings, scope, module, Some(key))?;
    target.insert(key, value);
    Ok(())
}

fn build_getter(
    body: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
    key: &str,
) -> Result<crate::value::GetterFn, EngineError> {
    if let Some(message) = body.get("raises").and_then(Yaml::as_str) {
        let module = module.to_string();
        let message = message.to_string();
        return Ok(Rc::new(move || {
            Err(EngineError::evaluation(&module, &message))
        }));
    }
    if let Some(spec) = body.get("value") {
        let value = build_value(spec, bindings, scope, module, Some(key))?;
        return Ok(Rc::new(move || Ok(value.clone())));
    }
    Err(EngineError::evaluation(
        module,
        format!("getter '{}' needs either a value or a raises message", key),
    ))
}

fn build_function(
    body: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
    name_hint: Option<&str>,
) -> Result<Value, EngineError> {
    let behavior = fn_behavior(body, bindings, scope, module)?;
    Ok(Value::Function(Rc::new(FunctionValue::new(
        name_hint.map(String::from),
        behavior,
    ))))
}

fn fn_behavior(
    body: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
) -> Result<FnBehavior, EngineError> {
    match body {
        Yaml::Null => Ok(FnBehavior::Returns(Value::Nil)),
        Yaml::Mapping(map) => {
            if let Some(spec) = body.get("returns") {
                return Ok(FnBehavior::Returns(build_value(
                    spec, bindings, scope, module, None,
                )?));
            }
            if let Some(message) = body.get("raises").and_then(Yaml::as_str) {
                return Ok(FnBehavior::Raises(message.to_string()));
            }
            if body.get("echo").and_then(Yaml::as_bool) == Some(true) {
                return Ok(FnBehavior::Echo);
            }
            if map.is_empty() {
                return Ok(FnBehavior::Returns(Value::Nil));
            }
            Err(EngineError::evaluation(module, "unknown function behavior"))
        }
        _ => Err(EngineError::evaluation(
            module,
            "function body must be a mapping",
        )),
    }
}

// Walks a `ref` path: the first segment names a binding, the rest walk
// members (mapping keys, sequence indices, class members).
fn resolve_ref(
    path: &Yaml,
    bindings: &HashMap<String, Value>,
    module: &str,
) -> Result<Value, EngineError> {
    let segments: Vec<String> = match path {
        Yaml::String(s) => vec![s.clone()],
        Yaml::Sequence(items) => items
            .iter()
            .map(|s| key_str(s, module))
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(EngineError::evaluation(
                module,
                "ref must be a binding name or a path sequence",
            ))
        }
    };
    let Some((first, rest)) = segments.split_first() else {
        return Err(EngineError::evaluation(module, "empty ref path"));
    };
    let mut current = bindings
        .get(first)
        .cloned()
        .ok_or_else(|| EngineError::evaluation(module, format!("unknown binding '{}'", first)))?;

    for segment in rest {
        current = member_of(&current, segment, module)?;
    }
    Ok(current)
}

pub(crate) fn member_of(value: &Value, segment: &str, module: &str) -> Result<Value, EngineError> {
    match value {
        Value::Mapping(map) => map.get(segment).transpose()?.ok_or_else(|| {
            EngineError::evaluation(module, format!("no member '{}' in mapping", segment))
        }),
        Value::Sequence(items) => {
            let index: usize = segment.parse().map_err(|_| {
                EngineError::evaluation(module, format!("invalid sequence index '{}'", segment))
            })?;
            items.borrow().get(index).cloned().ok_or_else(|| {
                EngineError::evaluation(module, format!("sequence index {} out of range", index))
            })
        }
        Value::Class(class) => {
            if let Some(member) = class.members.get(segment) {
                return member;
            }
            if let Some(member) = class.proto.get(segment) {
                return member;
            }
            Err(EngineError::evaluation(
                module,
                format!("no member '{}' on class", segment),
            ))
        }
        other => Err(EngineError::evaluation(
            module,
            format!("cannot access member '{}' of {}", segment, other.type_name()),
        )),
    }
}

fn build_class(
    body: &Yaml,
    bindings: &HashMap<String, Value>,
    scope: &ModuleScope<'_>,
    module: &str,
    name_hint: Option<&str>,
) -> Result<Value, EngineError> {
    let name = body
        .get("name")
        .and_then(Yaml::as_str)
        .map(String::from)
        .or_else(|| name_hint.map(String::from));
    let constructor_behavior = match body.get("constructor") {
        Some(spec) => fn_behavior(spec, bindings, scope, module)?,
        None => FnBehavior::Returns(Value::Nil),
    };
    let class = ClassValue::new(
        name.clone(),
        FunctionValue::new(name, constructor_behavior),
    );
    if let Some(Yaml::Mapping(members)) = body.get("members") {
        for (key, spec) in members {
            let key = key_str(key, module)?;
            insert_entry(&class.members, &key, spec, bindings, scope, module)?;
        }
    }
    if let Some(Yaml::Mapping(proto)) = body.get("proto") {
        for (key, spec) in proto {
            let key = key_str(key, module)?;
            insert_entry(&class.proto, &key, spec, bindings, scope, module)?;
        }
    }
    Ok(Value::Class(Rc::new(class)))
}

// ============================================================================
// LITERALS
// ============================================================================

/// Converts a plain YAML literal (no bindings, no special forms) into a
/// value. Used by the declarative runner for `expected` clauses.
pub fn literal(spec: &Yaml) -> Result<Value, EngineError> {
    match spec {
        Yaml::Null => Ok(Value::Nil),
        Yaml::Bool(b) => Ok(Value::Bool(*b)),
        Yaml::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(0.0))),
        Yaml::String(s) => Ok(Value::String(s.clone())),
        Yaml::Sequence(items) => {
            let built: Result<Vec<Value>, EngineError> = items.iter().map(literal).collect();
            Ok(Value::sequence(built?))
        }
        Yaml::Mapping(map) => {
            let target = Rc::new(MappingValue::new());
            for (key, member) in map {
                let key = key_str(key, "literal")?;
                target.insert(key, literal(member)?);
            }
            Ok(Value::Mapping(target))
        }
        Yaml::Tagged(_) => Err(EngineError::evaluation("literal", "unsupported tagged value")),
    }
}

// ============================================================================
// YAML HELPERS
// ============================================================================

fn key_str(key: &Yaml, module: &str) -> Result<String, EngineError> {
    match key {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        _ => Err(EngineError::evaluation(module, "keys must be strings")),
    }
}

fn str_of(value: &Yaml, module: &str, context: &str) -> Result<String, EngineError> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| EngineError::evaluation(module, format!("{} expects a string", context)))
}

fn opt_str(value: Option<&Yaml>) -> Option<String> {
    value.and_then(Yaml::as_str).map(String::from)
}

// Accepts booleans and the "on"/"off" spellings.
fn flag_of(value: &Yaml, module: &str, context: &str) -> Result<bool, EngineError> {
    match value {
        Yaml::Bool(b) => Ok(*b),
        Yaml::String(s) if s == "on" => Ok(true),
        Yaml::String(s) if s == "off" => Ok(false),
        _ => Err(EngineError::evaluation(
            module,
            format!("{} expects on or off", context),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_handles_nested_structures() {
        let spec: Yaml = serde_yaml::from_str("{a: [1, true, two], b: {c: null}}").unwrap();
        let value = literal(&spec).unwrap();
        let map = value.as_mapping().unwrap();
        let a = map.get("a").unwrap().unwrap();
        let Value::Sequence(items) = &a else {
            panic!("expected sequence");
        };
        assert_eq!(items.borrow()[0], Value::Number(1.0));
        assert_eq!(items.borrow()[1], Value::Bool(true));
        let b = map.get("b").unwrap().unwrap();
        assert_eq!(
            b.as_mapping().unwrap().get("c").unwrap().unwrap(),
            Value::Nil
        );
    }

    #[test]
    fn flag_accepts_on_off_spellings() {
        assert!(flag_of(&Yaml::String("on".to_string()), "m", "automock").unwrap());
        assert!(!flag_of(&Yaml::String("off".to_string()), "m", "automock").unwrap());
        assert!(flag_of(&Yaml::Bool(true), "m", "automock").unwrap());
        assert!(flag_of(&Yaml::Number(1.into()), "m", "automock").is_err());
    }

    #[test]
    fn member_walks_cover_mappings_and_sequences() {
        let map = Rc::new(MappingValue::new());
        map.insert("items", Value::sequence(vec![Value::Number(7.0)]));
        let value = Value::Mapping(map);
        let items = member_of(&value, "items", "m").unwrap();
        assert_eq!(member_of(&items, "0", "m").unwrap(), Value::Number(7.0));
        assert!(member_of(&items, "9", "m").is_err());
        assert!(member_of(&Value::Nil, "x", "m").is_err());
    }
}
