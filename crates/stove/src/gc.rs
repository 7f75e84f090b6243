//! Tri-color mark-and-sweep, non-moving, stop-the-world with respect to
//! script execution (invoked synchronously from allocator entry points,
//! never concurrently with a running fiber).

use crate::heap::{HeapId, HeapObject, Method, UpvalueObj};
use crate::value::Value;
use crate::vm::Vm;

/// Runs one full collection cycle: reset marks, gray every root, drain
/// the gray worklist by blackening, sweep the unmarked, then recompute
/// `next_gc`.
pub fn collect(vm: &mut Vm) {
    vm.heap.reset_marks();
    let mut worklist = Vec::new();

    gray_roots(vm, &mut worklist);

    while let Some(id) = worklist.pop() {
        blacken(vm, id, &mut worklist);
    }

    vm.heap.sweep();
    vm.heap.next_gc =
        ((vm.heap.allocated_bytes as f64) * vm.heap.heap_growth_factor).max(vm.heap.min_heap_size as f64) as usize;
}

fn gray(id: HeapId, worklist: &mut Vec<HeapId>, vm: &mut Vm) {
    if vm.heap.mark_white_to_gray(id) {
        worklist.push(id);
    }
}

fn gray_value(value: Value, worklist: &mut Vec<HeapId>, vm: &mut Vm) {
    if let Value::Obj(id) = value {
        gray(id, worklist, vm);
    }
}

/// Root set: current fiber (and transitively everything it reaches),
/// `allModules`, the built-in class table. The method-name symbol
/// table's strings are process-interned Rust `String`s, not heap
/// objects, so they need no graying. The compiler's live compile-unit
/// chain is not a root here: compilation and collection never
/// interleave in this implementation — the compiler holds its
/// in-progress `Fn` constants on the Rust stack until `bake_fn` hands
/// them to the heap.
fn gray_roots(vm: &mut Vm, worklist: &mut Vec<HeapId>) {
    if let Some(fiber) = vm.current_fiber {
        gray(fiber, worklist, vm);
    }

    let module_ids: Vec<HeapId> = vm.modules.values().copied().collect();
    for id in module_ids {
        gray(id, worklist, vm);
    }

    if let Some(classes) = vm.classes {
        for id in [
            classes.object,
            classes.class,
            classes.bool_,
            classes.num,
            classes.string,
            classes.list,
            classes.map,
            classes.range,
            classes.null,
            classes.fn_,
            classes.thread,
            classes.system,
        ] {
            gray(id, worklist, vm);
        }
    }
}

/// Gathered outgoing references for one object, extracted before any
/// graying happens so the `&HeapObject` borrow is released first (graying
/// needs `&mut vm.heap`).
#[derive(Default)]
struct Refs {
    values: Vec<Value>,
    ids: Vec<HeapId>,
}

fn collect_refs(vm: &Vm, id: HeapId) -> Refs {
    let mut refs = Refs::default();
    match vm.heap.get(id) {
        HeapObject::Class(c) => {
            refs.ids.push(c.name);
            if let Some(s) = c.superclass {
                refs.ids.push(s);
            }
            for m in &c.methods {
                if let Method::Script(closure) = m {
                    refs.ids.push(*closure);
                }
            }
        }
        HeapObject::Closure(c) => {
            refs.ids.push(c.fn_id);
            refs.ids.extend(c.upvalues.iter().copied());
        }
        HeapObject::Thread(t) => {
            refs.values.extend(t.stack.iter().copied());
            refs.values.push(t.error);
            refs.ids.extend(t.frames.iter().map(|f| f.closure));
            refs.ids.extend(t.open_upvalues.iter().copied());
            if let Some(caller) = t.caller {
                refs.ids.push(caller);
            }
        }
        HeapObject::Fn(f) => {
            refs.values.extend(f.constants.iter().copied());
            refs.ids.push(f.module);
        }
        HeapObject::Instance(i) => refs.values.extend(i.fields.iter().copied()),
        HeapObject::List(l) => refs.values.extend(l.elements.iter().copied()),
        HeapObject::Map(m) => {
            for e in &m.entries {
                if !matches!(e.key, Value::Undefined) {
                    refs.values.push(e.key);
                    refs.values.push(e.value);
                }
            }
        }
        HeapObject::Module(m) => {
            refs.values.extend(m.var_values.iter().copied());
            if let Some(name) = m.name {
                refs.ids.push(name);
            }
        }
        HeapObject::Upvalue(UpvalueObj::Closed(v)) => refs.values.push(*v),
        // An open upvalue's pointee is reachable via the owning fiber's
        // stack, which is already walked above; nothing to add here.
        HeapObject::Upvalue(UpvalueObj::Open { .. }) => {}
        HeapObject::Range(_) | HeapObject::String(_) => {}
    }
    refs
}

fn blacken(vm: &mut Vm, id: HeapId, worklist: &mut Vec<HeapId>) {
    if let Some(class_id) = vm.heap.class_of(id) {
        gray(class_id, worklist, vm);
    }
    let refs = collect_refs(vm, id);
    for v in refs.values {
        gray_value(v, worklist, vm);
    }
    for child in refs.ids {
        gray(child, worklist, vm);
    }
    vm.heap.mark_black(id);
}
