//! `System`: the one class this language didn't originally have — a
//! thin ambient-I/O surface (`print`, `write`, `writeString`, `clock`)
//! so scripts and the scenario tests have something to observe output
//! and elapsed time through. Every member is static, bound onto
//! `System`'s own metaclass.

use crate::heap::HeapId;
use crate::value::Value;
use crate::vm::Vm;

use super::ok;

pub fn install(vm: &mut Vm, meta: HeapId) {
    super::bind(vm, meta, "print(_)", |vm, args| {
        let text = super::display_string(vm, args[1]);
        println!("{text}");
        ok(args[1])
    });
    super::bind(vm, meta, "write(_)", |vm, args| {
        let text = super::display_string(vm, args[1]);
        print!("{text}");
        ok(args[1])
    });
    super::bind(vm, meta, "writeString(_)", |vm, args| {
        let text = super::display_string(vm, args[1]);
        print!("{text}");
        ok(args[1])
    });
    super::bind(vm, meta, "clock", |_vm, _args| {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        ok(Value::Num(secs))
    });
}
