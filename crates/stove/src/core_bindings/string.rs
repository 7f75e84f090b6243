//! `String`: UTF-8 bytes under the hood, indexed and sliced by Unicode
//! scalar value (not raw byte offset) to match how script source text
//! itself is measured.

use crate::heap::{HeapId, HeapObject};
use crate::value::Value;
use crate::vm::Vm;

use super::{ok, PrimitiveOutcome};

fn as_str(vm: &Vm, value: Value) -> Option<String> {
    let Value::Obj(id) = value else { return None };
    match vm.heap.get(id) {
        HeapObject::String(s) => Some(s.as_str().into_owned()),
        _ => None,
    }
}

pub fn install(vm: &mut Vm, string: HeapId) {
    super::bind(vm, string, "+(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(b) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("can only concatenate String with String"));
        };
        let combined = format!("{a}{b}");
        ok(vm.make_string(combined))
    });

    super::bind(vm, string, "*(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(n) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("String * requires a Num repeat count"));
        };
        let repeated = a.repeat(n.max(0.0) as usize);
        ok(vm.make_string(repeated))
    });

    super::bind(vm, string, "==(_)", |vm, args| {
        ok(Value::bool(args[0].eq_value(&args[1], &vm.heap)))
    });
    super::bind(vm, string, "!=(_)", |vm, args| {
        ok(Value::bool(!args[0].eq_value(&args[1], &vm.heap)))
    });

    super::bind(vm, string, "count", |vm, args| {
        let Some(s) = as_str(vm, args[0]) else { unreachable!() };
        ok(Value::Num(s.chars().count() as f64))
    });
    super::bind(vm, string, "byteCount_", |vm, args| {
        let Some(s) = as_str(vm, args[0]) else { unreachable!() };
        ok(Value::Num(s.len() as f64))
    });

    super::bind(vm, string, "[_]", |vm, args| {
        let Some(s) = as_str(vm, args[0]) else { unreachable!() };
        if let Value::Obj(id) = args[1] {
            if let HeapObject::Range(r) = vm.heap.get(id) {
                let (from, to, ascending) = (r.min(), r.max(), r.ascending());
                return char_slice(vm, &s, from, to, ascending);
            }
        }
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("String[_] requires a Num or Range index"));
        };
        let chars: Vec<char> = s.chars().collect();
        let Some(idx) = normalize_index(i, chars.len()) else {
            return PrimitiveOutcome::Error(vm.make_string("string index out of bounds"));
        };
        ok(vm.make_string(chars[idx].to_string()))
    });

    super::bind(vm, string, "contains(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(b) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("contains(_) requires a String"));
        };
        ok(Value::bool(a.contains(b.as_ref())))
    });
    super::bind(vm, string, "startsWith(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(b) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("startsWith(_) requires a String"));
        };
        ok(Value::bool(a.starts_with(b.as_ref())))
    });
    super::bind(vm, string, "endsWith(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(b) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("endsWith(_) requires a String"));
        };
        ok(Value::bool(a.ends_with(b.as_ref())))
    });
    super::bind(vm, string, "indexOf(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(b) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("indexOf(_) requires a String"));
        };
        match a.find(b.as_ref()) {
            Some(byte_idx) => ok(Value::Num(a[..byte_idx].chars().count() as f64)),
            None => ok(Value::Num(-1.0)),
        }
    });
    super::bind(vm, string, "split(_)", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let Some(sep) = as_str(vm, args[1]) else {
            return PrimitiveOutcome::Error(vm.make_string("split(_) requires a String separator"));
        };
        let parts: Vec<String> = if sep.is_empty() {
            a.chars().map(|c| c.to_string()).collect()
        } else {
            a.split(sep.as_ref()).map(|s| s.to_string()).collect()
        };
        let list_class = vm.classes().list;
        let elements = parts.into_iter().map(|p| vm.make_string(p)).collect();
        let id = vm.heap.allocate(Some(list_class), HeapObject::List(crate::heap::StoveList { elements }));
        ok(Value::Obj(id))
    });
    super::bind(vm, string, "trim", |vm, args| {
        let Some(a) = as_str(vm, args[0]) else { unreachable!() };
        let trimmed = a.trim().to_string();
        ok(vm.make_string(trimmed))
    });
    super::bind(vm, string, "toString", |_vm, args| ok(args[0]));
    super::bind(vm, string, "codePointAt_(_)", |vm, args| {
        let Some(s) = as_str(vm, args[0]) else { unreachable!() };
        let Some(i) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("codePointAt_(_) requires a Num index"));
        };
        let chars: Vec<char> = s.chars().collect();
        let Some(idx) = normalize_index(i, chars.len()) else {
            return PrimitiveOutcome::Error(vm.make_string("string index out of bounds"));
        };
        ok(Value::Num(chars[idx] as u32 as f64))
    });

    // The compiler emits `import "name"` as a zero-argument call on the
    // pushed module-name string (see `compiler::parser::import_statement`).
    super::bind(vm, string, "import_()", |vm, args| {
        let Some(name) = as_str(vm, args[0]).map(|c| c.into_owned()) else { unreachable!() };
        let Some(mut loader) = vm.loader.take() else {
            return PrimitiveOutcome::Error(vm.make_string("no module loader configured"));
        };
        let load_result = loader.load(&name);
        vm.loader = Some(loader);
        match load_result {
            Ok(source) => match vm.execute_module(&name, &source) {
                Ok(_) => ok(Value::Null),
                Err(e) => PrimitiveOutcome::Error(e.value),
            },
            Err(e) => PrimitiveOutcome::Error(vm.make_string(format!("could not load module '{name}': {e}"))),
        }
    });
}

/// Negative indices count from the end, per the data model's `-1` ==
/// last-element convention (shared with `List`).
fn normalize_index(i: f64, len: usize) -> Option<usize> {
    let i = i as i64;
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

fn char_slice(vm: &mut Vm, s: &str, range_from: f64, range_to: f64, ascending: bool) -> PrimitiveOutcome {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let (Some(from), Some(to)) = (normalize_index(range_from, len), normalize_index(range_to, len)) else {
        return ok(vm.make_string(""));
    };
    if ascending {
        ok(vm.make_string(chars[from..=to].iter().collect::<String>()))
    } else {
        ok(vm.make_string(chars[from..=to].iter().rev().collect::<String>()))
    }
}
