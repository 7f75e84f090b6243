//! Built-in classes (`Object`, `Class`, `Bool`, `Num`, `String`, `List`,
//! `Map`, `Range`, `Null`, `Fn`, `Thread`) and their primitive methods,
//! plus the ambient `System` class (`print`, `write`, `writeString`,
//! `clock`) the embedded core script needs for the scenarios in the
//! spec's testable-properties section. We specify the *shape* of these
//! bindings — native fn pointers installed directly into each class's
//! method table — rather than running a separate "core script" module;
//! see `SPEC_FULL.md` §4.6 for the enumerated method list this module
//! implements against.
//!
//! Static members (`List.new()`, `Thread.new(_)`, every `System.*` call)
//! dispatch through a class's *metaclass*, not its own instance method
//! table — the same split `vm::create_class` uses for user-defined
//! classes. Built-ins that need no statics at all (`Object`, `Bool`,
//! `String`, `Range`, `Null`) simply share `Class` as their metaclass;
//! the handful that do (`List`, `Map`, `Thread`, `Fn`, `Num`, `System`)
//! each get a small dedicated one, seeded with `Class`'s own methods so
//! `List is Class`, `List.name`, etc. still hold.

mod num;
mod object;
mod sequence;
mod string;
mod system;
mod thread;

pub(crate) use object::display_string;

use crate::heap::{ClassObj, HeapId, HeapObject, Method, StoveList};
use crate::value::Value;
use crate::vm::{BuiltinClasses, Vm};

pub type PrimitiveFn = fn(&mut Vm, &mut [Value]) -> PrimitiveOutcome;

pub enum PrimitiveOutcome {
    /// Overwrite the receiver slot with this value; discard the N
    /// argument slots.
    Return(Value),
    /// Set the fiber's error field to this value.
    Error(Value),
    /// A `Thread.*` primitive already switched the current fiber; the
    /// VM should just continue its dispatch loop.
    FiberSwitch,
}

pub(crate) fn ok(v: Value) -> PrimitiveOutcome {
    PrimitiveOutcome::Return(v)
}

fn new_builtin_class(vm: &mut Vm, name: &str, superclass: Option<HeapId>, field_count: u32) -> HeapId {
    let name_id = vm.heap.allocate(None, HeapObject::String(crate::heap::StoveString::new(name.as_bytes().to_vec())));
    vm.heap.allocate(
        None,
        HeapObject::Class(ClassObj { superclass, field_count, name: name_id, methods: Vec::new(), is_builtin: true }),
    )
}

fn bind(vm: &mut Vm, class: HeapId, signature: &str, f: PrimitiveFn) {
    let symbol = vm.symbols.intern(signature);
    let HeapObject::Class(c) = vm.heap.get_mut(class) else { unreachable!() };
    c.set_method(symbol, Method::Primitive(f));
}

fn bind_fncall(vm: &mut Vm, class: HeapId, signature: &str) {
    let symbol = vm.symbols.intern(signature);
    let HeapObject::Class(c) = vm.heap.get_mut(class) else { unreachable!() };
    c.set_method(symbol, Method::FnCall);
}

/// Builds a fresh metaclass for `owner`, seeded with `Class`'s own
/// method table (so `owner.name`, `owner.toString`, `owner is Class`
/// keep working), and points `owner`'s own class-of slot at it.
fn make_metaclass(vm: &mut Vm, owner: HeapId) -> HeapId {
    let class_id = vm.classes().class;
    let methods = {
        let HeapObject::Class(c) = vm.heap.get(class_id) else { unreachable!() };
        c.methods.clone()
    };
    let name_id = {
        let HeapObject::Class(c) = vm.heap.get(owner) else { unreachable!() };
        c.name
    };
    let meta = ClassObj { superclass: Some(class_id), field_count: 0, name: name_id, methods, is_builtin: true };
    let meta_id = vm.heap.allocate(Some(class_id), HeapObject::Class(meta));
    vm.heap.set_class_of(owner, meta_id);
    meta_id
}

/// Installs every built-in class and its primitive methods, then
/// resolves `vm.classes`. Called once from `Vm::new`.
pub fn install(vm: &mut Vm) {
    let object = new_builtin_class(vm, "Object", None, 0);
    let class = new_builtin_class(vm, "Class", Some(object), 0);
    let bool_ = new_builtin_class(vm, "Bool", Some(object), 0);
    let num = new_builtin_class(vm, "Num", Some(object), 0);
    let string = new_builtin_class(vm, "String", Some(object), 0);
    let list = new_builtin_class(vm, "List", Some(object), 0);
    let map = new_builtin_class(vm, "Map", Some(object), 0);
    let range = new_builtin_class(vm, "Range", Some(object), 0);
    let null = new_builtin_class(vm, "Null", Some(object), 0);
    let fn_ = new_builtin_class(vm, "Fn", Some(object), 0);
    let thread = new_builtin_class(vm, "Thread", Some(object), 0);
    let system = new_builtin_class(vm, "System", Some(object), 0);

    // Every object's header carries a class pointer; for these
    // bootstrap classes that's `Class` itself (shared, the way a user
    // class's plain instances all point at that one class object), and
    // `Class`'s own metaclass is itself — the one genuinely
    // self-referential edge in the object model.
    for id in [object, bool_, num, string, list, map, range, null, fn_, thread, system] {
        vm.heap.set_class_of(id, class);
    }
    vm.heap.set_class_of(class, class);

    vm.classes = Some(BuiltinClasses { object, class, bool_, num, string, list, map, range, null, fn_, thread, system });

    object::install(vm, object);
    let object_methods = {
        let HeapObject::Class(c) = vm.heap.get(object) else { unreachable!() };
        c.methods.clone()
    };
    for &id in &[class, bool_, num, string, list, map, range, null, fn_, thread, system] {
        if let HeapObject::Class(c) = vm.heap.get_mut(id) {
            c.methods = object_methods.clone();
        }
    }

    bind(vm, class, "name", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Class(c) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Obj(c.name))
    });
    bind(vm, class, "supertype", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Class(c) = vm.heap.get(id) else { unreachable!() };
        match c.superclass {
            Some(s) => ok(Value::Obj(s)),
            None => ok(Value::Null),
        }
    });
    bind(vm, class, "toString", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        let HeapObject::Class(c) = vm.heap.get(id) else { unreachable!() };
        ok(Value::Obj(c.name))
    });

    num::install(vm, num);
    string::install(vm, string);
    sequence::install_list(vm, list);
    sequence::install_map(vm, map);
    sequence::install_range(vm, range);
    thread::install(vm, thread);

    bind(vm, bool_, "toString", |vm, args| {
        let s = if matches!(args[0], Value::True) { "true" } else { "false" };
        ok(vm.make_string(s))
    });
    bind(vm, bool_, "!", |_vm, args| ok(Value::bool(args[0].is_falsy())));
    bind_fncall(vm, fn_, "call()");
    for argc in 1..=crate::bytecode::MAX_CALL_ARGS {
        let sig = format!("call({})", vec!["_"; argc as usize].join(","));
        bind_fncall(vm, fn_, &sig);
    }
    bind(vm, fn_, "arity", |vm, args| {
        let Value::Obj(closure_id) = args[0] else { unreachable!() };
        let HeapObject::Closure(c) = vm.heap.get(closure_id) else { unreachable!() };
        let HeapObject::Fn(f) = vm.heap.get(c.fn_id) else { unreachable!() };
        ok(Value::Num(f.arity as f64))
    });
    bind(vm, null, "toString", |vm, _| ok(vm.make_string("null")));
    bind(vm, null, "!", |_vm, _| ok(Value::True));

    // Static constructors and the `System` surface each live on a
    // dedicated metaclass rather than the class's own instance table.
    let list_meta = make_metaclass(vm, list);
    bind(vm, list_meta, "new()", |vm, _args| {
        let list_class = vm.classes().list;
        let id = vm.heap.allocate(Some(list_class), HeapObject::List(StoveList { elements: Vec::new() }));
        ok(Value::Obj(id))
    });
    bind(vm, list_meta, "new(_)", |vm, args| {
        let Some(n) = args[1].as_num() else {
            return PrimitiveOutcome::Error(vm.make_string("List.new(_) requires a Num fill count"));
        };
        let list_class = vm.classes().list;
        let id = vm.heap.allocate(
            Some(list_class),
            HeapObject::List(StoveList { elements: vec![Value::Null; n.max(0.0) as usize] }),
        );
        ok(Value::Obj(id))
    });

    let map_meta = make_metaclass(vm, map);
    bind(vm, map_meta, "new()", |vm, _args| {
        let map_class = vm.classes().map;
        let id = vm.heap.allocate(Some(map_class), HeapObject::Map(crate::heap::StoveMap::new()));
        ok(Value::Obj(id))
    });

    let fn_meta = make_metaclass(vm, fn_);
    bind(vm, fn_meta, "new(_)", |_vm, args| ok(args[1]));

    let num_meta = make_metaclass(vm, num);
    num::install_static(vm, num_meta);

    let thread_meta = make_metaclass(vm, thread);
    thread::install_static(vm, thread_meta);

    let system_meta = make_metaclass(vm, system);
    system::install(vm, system_meta);
}
