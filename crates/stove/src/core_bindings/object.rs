//! `Object`: the root of every class's superclass chain. Identity
//! equality, the default `toString`, and the `is` operator's
//! superclass-walk all live here since every other built-in class
//! copies this table down as its own starting point.

use crate::heap::HeapObject;
use crate::value::Value;
use crate::vm::Vm;

use super::{ok, PrimitiveOutcome};

pub fn install(vm: &mut Vm, object: crate::heap::HeapId) {
    super::bind(vm, object, "==(_)", |vm, args| ok(Value::bool(args[0].eq_value(&args[1], &vm.heap))));
    super::bind(vm, object, "!=(_)", |vm, args| ok(Value::bool(!args[0].eq_value(&args[1], &vm.heap))));
    super::bind(vm, object, "!", |_vm, args| ok(Value::bool(args[0].is_falsy())));
    super::bind(vm, object, "toString", |vm, args| ok(vm.make_string(display_string(vm, args[0]))));
    super::bind(vm, object, "typeof", |vm, args| {
        let class_id = vm.class_of_value(args[0]);
        ok(Value::Obj(class_id))
    });
    super::bind(vm, object, "type", |vm, args| {
        let class_id = vm.class_of_value(args[0]);
        ok(Value::Obj(class_id))
    });
    super::bind(vm, object, "is(_)", |vm, args| {
        let Value::Obj(target_id) = args[1] else {
            return PrimitiveOutcome::Error(vm.make_string("right operand of 'is' must be a Class"));
        };
        if !matches!(vm.heap.get(target_id), HeapObject::Class(_)) {
            return PrimitiveOutcome::Error(vm.make_string("right operand of 'is' must be a Class"));
        }
        let mut current = Some(vm.class_of_value(args[0]));
        while let Some(id) = current {
            if id == target_id {
                return ok(Value::True);
            }
            let HeapObject::Class(c) = vm.heap.get(id) else { unreachable!() };
            current = c.superclass;
        }
        ok(Value::False)
    });
}

/// Renders `value` the way `Object.toString`, `List.join`, and every
/// `System.print`/`write` primitive display it. Matches on the cheap
/// Copy `ObjType` tag rather than holding a `&HeapObject` borrow, since
/// nested List/Map elements need to recurse back through `&mut Vm`.
pub(crate) fn display_string(vm: &mut Vm, value: Value) -> String {
    match value {
        Value::Undefined | Value::Null => "null".to_string(),
        Value::True => "true".to_string(),
        Value::False => "false".to_string(),
        Value::Num(n) => crate::core_bindings::num::format_num(n),
        Value::Obj(id) => display_object(vm, id),
    }
}

fn display_object(vm: &mut Vm, id: crate::heap::HeapId) -> String {
    use crate::heap::ObjType;
    match vm.heap.obj_type(id) {
        ObjType::String => {
            let HeapObject::String(s) = vm.heap.get(id) else { unreachable!() };
            String::from_utf8_lossy(&s.bytes).into_owned()
        }
        ObjType::Range => {
            let HeapObject::Range(r) = vm.heap.get(id) else { unreachable!() };
            format!("{}..{}", r.from, r.to)
        }
        ObjType::List => {
            let elements = {
                let HeapObject::List(l) = vm.heap.get(id) else { unreachable!() };
                l.elements.clone()
            };
            let parts: Vec<String> = elements.into_iter().map(|v| display_string(vm, v)).collect();
            format!("[{}]", parts.join(", "))
        }
        ObjType::Map => {
            let entries: Vec<(Value, Value)> = {
                let HeapObject::Map(m) = vm.heap.get(id) else { unreachable!() };
                m.entries.iter().filter(|e| !matches!(e.key, Value::Undefined)).map(|e| (e.key, e.value)).collect()
            };
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", display_string(vm, k), display_string(vm, v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        ObjType::Class => {
            let HeapObject::Class(c) = vm.heap.get(id) else { unreachable!() };
            display_object(vm, c.name)
        }
        ObjType::Fn | ObjType::Closure => "<fn>".to_string(),
        ObjType::Thread => "<thread>".to_string(),
        ObjType::Instance => {
            let class_id = vm.heap.class_of(id).unwrap_or(vm.classes().object);
            let HeapObject::Class(c) = vm.heap.get(class_id) else { unreachable!() };
            let name = display_object(vm, c.name);
            format!("instance of {name}")
        }
        ObjType::Module | ObjType::Upvalue => "<object>".to_string(),
    }
}
