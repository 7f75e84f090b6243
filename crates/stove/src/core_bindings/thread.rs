//! `Thread`: a cooperative fiber. Instance methods (`call`, `isDone`,
//! `abort(_)`) operate on a specific fiber value; the statics
//! (`new(_)`, `yield(_)`, `suspend`, `abort(_)`, `current`) operate on
//! whichever fiber happens to be running, so they live on `Thread`'s
//! metaclass instead.

use crate::core_bindings::PrimitiveOutcome;
use crate::heap::HeapId;
use crate::value::Value;
use crate::vm::Vm;

use super::ok;

pub fn install(vm: &mut Vm, thread: HeapId) {
    super::bind(vm, thread, "call()", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        vm.thread_call(id, Value::Null)
    });
    super::bind(vm, thread, "call(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        vm.thread_call(id, args[1])
    });
    super::bind(vm, thread, "isDone", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        ok(Value::bool(vm.fiber_is_done(id)))
    });
    super::bind(vm, thread, "abort(_)", |vm, args| {
        let Value::Obj(id) = args[0] else { unreachable!() };
        vm.thread_abort(id, args[1])
    });
}

pub fn install_static(vm: &mut Vm, meta: HeapId) {
    super::bind(vm, meta, "new(_)", |vm, args| {
        let Value::Obj(closure_id) = args[1] else {
            return PrimitiveOutcome::Error(vm.make_string("Thread.new(_) requires a Fn"));
        };
        let fiber = vm.spawn_fiber(closure_id, Value::Null);
        ok(Value::Obj(fiber))
    });
    super::bind(vm, meta, "yield", |vm, _args| vm.thread_yield(Value::Null));
    super::bind(vm, meta, "yield(_)", |vm, args| vm.thread_yield(args[1]));
    super::bind(vm, meta, "suspend", |vm, _args| vm.thread_suspend());
    super::bind(vm, meta, "abort(_)", |vm, args| {
        let Some(fiber_id) = vm.current_fiber else {
            return PrimitiveOutcome::Error(vm.make_string("Thread.abort with no running fiber"));
        };
        vm.thread_abort(fiber_id, args[1])
    });
    super::bind(vm, meta, "current", |vm, _args| match vm.current_fiber {
        Some(id) => ok(Value::Obj(id)),
        None => ok(Value::Null),
    });
}
