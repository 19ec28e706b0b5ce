//! The dynamic value model for module exports.
//!
//! Every module evaluation produces a [`Value`]. Containers (sequences,
//! mappings, functions, classes) have shared reference semantics via `Rc`,
//! which gives the engine the two properties the registry relies on:
//! reference-stable caching (repeat requires hand back the same object) and
//! observable in-progress exports during dependency cycles.
//!
//! Values are capability-tagged (see [`ValueKind`]): the mock synthesizer
//! discriminates on the tag before walking, never on ad-hoc shape probing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use im::HashMap;

use crate::diagnostics::EngineError;

// ============================================================================
// CORE TYPES
// ============================================================================

/// A recorded invocation: the arguments one call received.
pub type CallRecord = Vec<Value>;

/// A computed mapping member. Reading it may fail, which is exactly the
/// case the mock synthesizer must survive.
pub type GetterFn = Rc<dyn Fn() -> Result<Value, EngineError>>;

/// A value in a module's export graph.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Rc<RefCell<Vec<Value>>>),
    Mapping(Rc<MappingValue>),
    Function(Rc<FunctionValue>),
    Class(Rc<ClassValue>),
    /// Inert placeholder: produced when introspection of a member fails
    /// during mock synthesis. Carries no behavior and no members.
    Opaque,
}

/// Capability tag used to discriminate values before structural walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Function,
    Class,
    Sequence,
    Mapping,
    Primitive,
    Other,
}

/// One member of a mapping: either a plain value or a computed getter.
#[derive(Clone)]
pub enum Slot {
    Eager(Value),
    Computed(GetterFn),
}

/// A keyed mapping with shared identity.
#[derive(Default)]
pub struct MappingValue {
    slots: RefCell<HashMap<String, Slot>>,
}

/// Declarative behavior of a function value.
#[derive(Clone)]
pub enum FnBehavior {
    /// Returns a fixed value on every call.
    Returns(Value),
    /// Returns its arguments back as a sequence.
    Echo,
    /// Fails every call with the given message.
    Raises(String),
    /// Call-recording stand-in: records arguments, returns Nil, never
    /// invokes any original behavior.
    StandIn,
    /// Arbitrary native behavior supplied by an embedder.
    Native(Rc<dyn Fn(&[Value]) -> Result<Value, EngineError>>),
}

/// A callable value. Every function tracks its own call history, so real
/// and synthesized copies of the same module member have independently
/// observable call state.
pub struct FunctionValue {
    pub name: Option<String>,
    pub behavior: FnBehavior,
    calls: RefCell<Vec<CallRecord>>,
}

/// A class-like construct: callable constructor with attached named
/// members at both the static and prototype level.
pub struct ClassValue {
    pub name: Option<String>,
    pub constructor: Rc<FunctionValue>,
    pub members: Rc<MappingValue>,
    pub proto: Rc<MappingValue>,
}

// ============================================================================
// MAPPING
// ============================================================================

impl MappingValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.slots.borrow_mut().insert(key.into(), Slot::Eager(value));
    }

    pub fn insert_computed(&self, key: impl Into<String>, getter: GetterFn) {
        self.slots
            .borrow_mut()
            .insert(key.into(), Slot::Computed(getter));
    }

    /// Reads a member. Computed members run their getter, which may fail.
    pub fn get(&self, key: &str) -> Option<Result<Value, EngineError>> {
        let slots = self.slots.borrow();
        slots.get(key).map(|slot| match slot {
            Slot::Eager(v) => Ok(v.clone()),
            Slot::Computed(getter) => getter(),
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Snapshot of the slot table for structural walks.
    pub fn slots(&self) -> HashMap<String, Slot> {
        self.slots.borrow().clone()
    }

    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }
}

// ============================================================================
// FUNCTIONS AND CLASSES
// ============================================================================

impl FunctionValue {
    pub fn new(name: Option<String>, behavior: FnBehavior) -> Self {
        Self {
            name,
            behavior,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Creates a call-recording stand-in, optionally named after the
    /// function it replaces.
    pub fn stand_in(name: Option<String>) -> Self {
        Self::new(name, FnBehavior::StandIn)
    }

    pub fn is_stand_in(&self) -> bool {
        matches!(self.behavior, FnBehavior::StandIn)
    }

    /// Invokes the function, recording the arguments first so even a
    /// failing call is observable in the call history.
    pub fn call(&self, args: &[Value]) -> Result<Value, EngineError> {
        self.calls.borrow_mut().push(args.to_vec());
        match &self.behavior {
            FnBehavior::Returns(v) => Ok(v.clone()),
            FnBehavior::Echo => Ok(Value::sequence(args.to_vec())),
            FnBehavior::Raises(message) => Err(EngineError::evaluation(
                self.name.as_deref().unwrap_or("<anonymous>"),
                message,
            )),
            FnBehavior::StandIn => Ok(Value::Nil),
            FnBehavior::Native(f) => f(args),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.borrow().clone()
    }
}

impl ClassValue {
    pub fn new(name: Option<String>, constructor: FunctionValue) -> Self {
        Self {
            name,
            constructor: Rc::new(constructor),
            members: Rc::new(MappingValue::new()),
            proto: Rc::new(MappingValue::new()),
        }
    }
}

// ============================================================================
// VALUE
// ============================================================================

impl Value {
    pub fn new_mapping() -> Value {
        Value::Mapping(Rc::new(MappingValue::new()))
    }

    pub fn sequence(items: Vec<Value>) -> Value {
        Value::Sequence(Rc::new(RefCell::new(items)))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Function(_) => ValueKind::Function,
            Value::Class(_) => ValueKind::Class,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::Mapping(_) => ValueKind::Mapping,
            Value::Nil | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                ValueKind::Primitive
            }
            Value::Opaque => ValueKind::Other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Sequence(_) => "Sequence",
            Value::Mapping(_) => "Mapping",
            Value::Function(_) => "Function",
            Value::Class(_) => "Class",
            Value::Opaque => "Opaque",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Rc<MappingValue>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<FunctionValue>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Source identity for reference-keyed arenas: the address of the
    /// backing allocation for shared variants, None for copied-by-value
    /// primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Sequence(s) => Some(Rc::as_ptr(s) as usize),
            Value::Mapping(m) => Some(Rc::as_ptr(m) as *const u8 as usize),
            Value::Function(f) => Some(Rc::as_ptr(f) as *const u8 as usize),
            Value::Class(c) => Some(Rc::as_ptr(c) as *const u8 as usize),
            _ => None,
        }
    }

    /// True when both values are the same shared allocation.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

// ============================================================================
// EQUALITY AND DISPLAY
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Opaque, Value::Opaque) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Mapping(a), Value::Mapping(b)) => {
                Rc::ptr_eq(a, b) || mapping_eq(a, b)
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// Structural comparison over eager members; computed members only compare
// equal to themselves (same getter allocation).
fn mapping_eq(a: &MappingValue, b: &MappingValue) -> bool {
    let slots_a = a.slots();
    let slots_b = b.slots();
    if slots_a.len() != slots_b.len() {
        return false;
    }
    for (key, slot_a) in slots_a.iter() {
        let Some(slot_b) = slots_b.get(key) else {
            return false;
        };
        let equal = match (slot_a, slot_b) {
            (Slot::Eager(va), Slot::Eager(vb)) => va == vb,
            (Slot::Computed(ga), Slot::Computed(gb)) => Rc::ptr_eq(ga, gb),
            _ => false,
        };
        if !equal {
            return false;
        }
    }
    true
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(items) => {
                write!(f, "(")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                let slots = map.slots();
                for (i, key) in map.keys().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match slots.get(key) {
                        Some(Slot::Eager(v)) => write!(f, "{}: {}", key, v)?,
                        Some(Slot::Computed(_)) => write!(f, "{}: <computed>", key)?,
                        None => {}
                    }
                }
                write!(f, "}}")
            }
            Value::Function(func) => {
                let label = if func.is_stand_in() { "stand-in" } else { "fn" };
                match &func.name {
                    Some(name) => write!(f, "[{} {}]", label, name),
                    None => write!(f, "[{}]", label),
                }
            }
            Value::Class(class) => match &class.name {
                Some(name) => write!(f, "[class {}]", name),
                None => write!(f, "[class]"),
            },
            Value::Opaque => write!(f, "[opaque]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_recording_tracks_arguments_in_order() {
        let func = FunctionValue::stand_in(Some("setValue".to_string()));
        func.call(&[Value::Number(1.0)]).unwrap();
        func.call(&[Value::String("two".to_string()), Value::Bool(true)])
            .unwrap();
        assert_eq!(func.call_count(), 2);
        let calls = func.calls();
        assert_eq!(calls[0], vec![Value::Number(1.0)]);
        assert_eq!(calls[1].len(), 2);
    }

    #[test]
    fn stand_in_returns_nil_without_original_behavior() {
        let func = FunctionValue::stand_in(None);
        assert_eq!(func.call(&[]).unwrap(), Value::Nil);
    }

    #[test]
    fn raising_function_records_the_failing_call() {
        let func = FunctionValue::new(None, FnBehavior::Raises("boom".to_string()));
        assert!(func.call(&[Value::Nil]).is_err());
        assert_eq!(func.call_count(), 1);
    }

    #[test]
    fn mapping_getter_failures_surface_as_errors() {
        let map = MappingValue::new();
        map.insert("value", Value::Number(5.0));
        map.insert_computed(
            "toJSON",
            Rc::new(|| Err(EngineError::evaluation("getter", "raise"))),
        );
        assert_eq!(map.get("value").unwrap().unwrap(), Value::Number(5.0));
        assert!(map.get("toJSON").unwrap().is_err());
    }

    #[test]
    fn shared_mappings_compare_by_structure_and_identity() {
        let a = Value::new_mapping();
        let b = a.clone();
        assert!(a.same_object(&b));
        assert_eq!(a, b);

        let c = Value::new_mapping();
        assert!(!a.same_object(&c));
        assert_eq!(a, c); // both empty: structurally equal, distinct objects
    }

    #[test]
    fn display_renders_numbers_like_integers_when_whole() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(3.5).to_string(), "3.5");
    }
}
