//! Mock synthesis: structurally-shaped substitutes for real module exports.
//!
//! `synthesize` is a total function: it never fails, for any input. The
//! walk discriminates on the value's capability tag, rebuilds containers
//! with the same shape, turns every function into a call-recording
//! stand-in, and copies primitives by value. Two guards make it total:
//!
//! - A visited arena keyed by source reference identity. A value seen
//!   twice reuses the synthetic produced the first time, so shared
//!   substructure and cycles survive with their shape intact.
//! - Member introspection failures stay inside the walk. A computed
//!   member whose getter fails is replaced by an inert placeholder, so
//!   synthesis of arbitrary third-party module shapes cannot crash a run.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{ClassValue, FunctionValue, MappingValue, Slot, Value};

// Visited arena: source allocation address to the synthetic standing in
// for it.
type Arena = HashMap<usize, Value>;

/// Produces a mock with the same structural shape as `value`.
pub fn synthesize(value: &Value) -> Value {
    let mut arena = Arena::new();
    synthesize_inner(value, &mut arena)
}

fn synthesize_inner(value: &Value, arena: &mut Arena) -> Value {
    if let Some(id) = value.identity() {
        if let Some(existing) = arena.get(&id) {
            return existing.clone();
        }
    }

    match value {
        Value::Nil | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Opaque => {
            value.clone()
        }
        Value::Function(func) => {
            let stand_in = Value::Function(Rc::new(FunctionValue::stand_in(func.name.clone())));
            arena.insert(value.identity().unwrap_or_default(), stand_in.clone());
            stand_in
        }
        Value::Sequence(items) => {
            let synthetic = Value::sequence(Vec::new());
            arena.insert(value.identity().unwrap_or_default(), synthetic.clone());
            if let Value::Sequence(target) = &synthetic {
                // Arena entry exists before the walk so self-references in
                // the source land on the synthetic container.
                let source: Vec<Value> = items.borrow().clone();
                for item in &source {
                    let child = synthesize_inner(item, arena);
                    target.borrow_mut().push(child);
                }
            }
            synthetic
        }
        Value::Mapping(map) => {
            let synthetic = Value::new_mapping();
            arena.insert(value.identity().unwrap_or_default(), synthetic.clone());
            if let Value::Mapping(target) = &synthetic {
                fill_mapping(map, target, arena);
            }
            synthetic
        }
        Value::Class(class) => {
            let constructor = FunctionValue::stand_in(class.constructor.name.clone());
            let synthetic_class = Rc::new(ClassValue::new(class.name.clone(), constructor));
            let synthetic = Value::Class(Rc::clone(&synthetic_class));
            arena.insert(value.identity().unwrap_or_default(), synthetic.clone());
            fill_mapping(&class.members, &synthetic_class.members, arena);
            fill_mapping(&class.proto, &synthetic_class.proto, arena);
            synthetic
        }
    }
}

// Walks one mapping's slots into a synthetic mapping. Member inspection
// failures degrade to an inert placeholder for that member only.
fn fill_mapping(source: &Rc<MappingValue>, target: &Rc<MappingValue>, arena: &mut Arena) {
    for (key, slot) in source.slots() {
        let synthetic = match slot {
            Slot::Eager(member) => synthesize_inner(&member, arena),
            Slot::Computed(getter) => match getter() {
                Ok(member) => synthesize_inner(&member, arena),
                Err(_) => Value::Opaque,
            },
        };
        target.insert(key, synthetic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::EngineError;
    use crate::value::FnBehavior;

    fn real_fn(name: &str) -> Value {
        Value::Function(Rc::new(FunctionValue::new(
            Some(name.to_string()),
            FnBehavior::Returns(Value::Number(42.0)),
        )))
    }

    #[test]
    fn functions_become_recording_stand_ins() {
        let real = real_fn("getAnswer");
        let mock = synthesize(&real);

        let real_func = real.as_function().unwrap();
        let mock_func = mock.as_function().unwrap();
        assert!(mock_func.is_stand_in());
        assert_eq!(mock_func.name.as_deref(), Some("getAnswer"));

        // The stand-in records and returns Nil; the original is untouched.
        assert_eq!(mock_func.call(&[Value::Number(7.0)]).unwrap(), Value::Nil);
        assert_eq!(mock_func.call_count(), 1);
        assert_eq!(real_func.call_count(), 0);
    }

    #[test]
    fn mappings_are_rebuilt_with_the_same_shape() {
        let map = MappingValue::new();
        map.insert("label", Value::String("real".to_string()));
        map.insert("compute", real_fn("compute"));
        let source = Value::Mapping(Rc::new(map));

        let mock = synthesize(&source);
        let mock_map = mock.as_mapping().unwrap();
        assert_eq!(
            mock_map.get("label").unwrap().unwrap(),
            Value::String("real".to_string())
        );
        let member = mock_map.get("compute").unwrap().unwrap();
        assert!(member.as_function().unwrap().is_stand_in());
        assert!(!mock.same_object(&source));
    }

    #[test]
    fn failing_getter_degrades_to_placeholder_with_siblings_intact() {
        let map = MappingValue::new();
        map.insert("value", Value::Number(5.0));
        map.insert_computed(
            "toJSON",
            Rc::new(|| Err(EngineError::evaluation("getter", "raise"))),
        );
        let mock = synthesize(&Value::Mapping(Rc::new(map)));

        let mock_map = mock.as_mapping().unwrap();
        assert_eq!(mock_map.get("value").unwrap().unwrap(), Value::Number(5.0));
        assert_eq!(mock_map.get("toJSON").unwrap().unwrap(), Value::Opaque);
    }

    #[test]
    fn self_referential_mapping_synthesizes_without_recursing_forever() {
        let map = Rc::new(MappingValue::new());
        let source = Value::Mapping(Rc::clone(&map));
        map.insert("me", source.clone());

        let mock = synthesize(&source);
        let mock_map = mock.as_mapping().unwrap();
        let inner = mock_map.get("me").unwrap().unwrap();
        // The cycle is preserved on the synthetic side.
        assert!(inner.same_object(&mock));
    }

    #[test]
    fn shared_substructure_stays_shared() {
        let shared = Value::new_mapping();
        shared.as_mapping().unwrap().insert("x", Value::Number(1.0));
        let outer = MappingValue::new();
        outer.insert("a", shared.clone());
        outer.insert("b", shared.clone());

        let mock = synthesize(&Value::Mapping(Rc::new(outer)));
        let mock_map = mock.as_mapping().unwrap();
        let a = mock_map.get("a").unwrap().unwrap();
        let b = mock_map.get("b").unwrap().unwrap();
        assert!(a.same_object(&b));
        assert!(!a.same_object(&shared));
    }

    #[test]
    fn classes_get_stand_in_constructor_and_members() {
        let class = ClassValue::new(
            Some("Widget".to_string()),
            FunctionValue::new(Some("Widget".to_string()), FnBehavior::Echo),
        );
        class.members.insert("create", real_fn("create"));
        class.proto.insert("render", real_fn("render"));
        let mock = synthesize(&Value::Class(Rc::new(class)));

        let Value::Class(mock_class) = &mock else {
            panic!("expected a class value");
        };
        assert!(mock_class.constructor.is_stand_in());
        let create = mock_class.members.get("create").unwrap().unwrap();
        let render = mock_class.proto.get("render").unwrap().unwrap();
        assert!(create.as_function().unwrap().is_stand_in());
        assert!(render.as_function().unwrap().is_stand_in());
    }

    #[test]
    fn sequences_synthesize_each_element() {
        let source = Value::sequence(vec![Value::Number(1.0), real_fn("f")]);
        let mock = synthesize(&source);
        let Value::Sequence(items) = &mock else {
            panic!("expected a sequence");
        };
        let items = items.borrow();
        assert_eq!(items[0], Value::Number(1.0));
        assert!(items[1].as_function().unwrap().is_stand_in());
    }
}
