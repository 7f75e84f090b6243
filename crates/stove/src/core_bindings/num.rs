//! `Num`: IEEE-754 double arithmetic, comparisons, bitwise ops (via a
//! truncating `f64 -> i64` cast), and range construction (`..`/`...`).
//! No div-by-zero or domain runtime errors — `1/0`, `0/0`, `(-1).sqrt`
//! all produce the IEEE infinities/NaN a host float would.

use crate::heap::{HeapId, HeapObject, StoveRange};
use crate::value::Value;
use crate::vm::Vm;

use super::{ok, PrimitiveOutcome};

fn operand(vm: &mut Vm, args: &[Value], index: usize) -> Result<f64, PrimitiveOutcome> {
    args[index].as_num().ok_or_else(|| PrimitiveOutcome::Error(vm.make_string("operand must be a Num")))
}

macro_rules! arith {
    ($vm:ident, $class:ident, $sig:literal, $op:tt) => {
        super::bind($vm, $class, $sig, |vm, args| {
            let a = args[0].as_num().unwrap();
            let b = match operand(vm, args, 1) {
                Ok(b) => b,
                Err(e) => return e,
            };
            ok(Value::Num(a $op b))
        });
    };
}

macro_rules! compare {
    ($vm:ident, $class:ident, $sig:literal, $op:tt) => {
        super::bind($vm, $class, $sig, |vm, args| {
            let a = args[0].as_num().unwrap();
            let b = match operand(vm, args, 1) {
                Ok(b) => b,
                Err(e) => return e,
            };
            ok(Value::bool(a $op b))
        });
    };
}

macro_rules! bitwise {
    ($vm:ident, $class:ident, $sig:literal, $op:tt) => {
        super::bind($vm, $class, $sig, |vm, args| {
            let a = args[0].as_num().unwrap() as i64;
            let b = match operand(vm, args, 1) {
                Ok(b) => b,
                Err(e) => return e,
            } as i64;
            ok(Value::Num((a $op b) as f64))
        });
    };
}

pub fn install(vm: &mut Vm, num: HeapId) {
    arith!(vm, num, "+(_)", +);
    arith!(vm, num, "-(_)", -);
    arith!(vm, num, "*(_)", *);
    arith!(vm, num, "/(_)", /);
    arith!(vm, num, "%(_)", %);
    compare!(vm, num, "<(_)", <);
    compare!(vm, num, "<=(_)", <=);
    compare!(vm, num, ">(_)", >);
    compare!(vm, num, ">=(_)", >=);
    bitwise!(vm, num, "&(_)", &);
    bitwise!(vm, num, "|(_)", |);
    bitwise!(vm, num, "^(_)", ^);

    super::bind(vm, num, "<<(_)", |vm, args| {
        let a = args[0].as_num().unwrap() as i64;
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        } as i64
            & 63;
        ok(Value::Num(((a as u64) << (b as u32)) as i64 as f64))
    });
    super::bind(vm, num, ">>(_)", |vm, args| {
        let a = args[0].as_num().unwrap() as i64;
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        } as i64
            & 63;
        ok(Value::Num((a >> (b as u32)) as f64))
    });

    super::bind(vm, num, "==(_)", |_vm, args| {
        let eq = matches!(args[1], Value::Num(b) if args[0].as_num() == Some(b));
        ok(Value::bool(eq))
    });
    super::bind(vm, num, "!=(_)", |_vm, args| {
        let eq = matches!(args[1], Value::Num(b) if args[0].as_num() == Some(b));
        ok(Value::bool(!eq))
    });

    super::bind(vm, num, "-", |_vm, args| ok(Value::Num(-args[0].as_num().unwrap())));
    super::bind(vm, num, "~", |_vm, args| ok(Value::Num(!(args[0].as_num().unwrap() as i64) as f64)));

    super::bind(vm, num, "abs", |_vm, args| ok(Value::Num(args[0].as_num().unwrap().abs())));
    super::bind(vm, num, "sqrt", |_vm, args| ok(Value::Num(args[0].as_num().unwrap().sqrt())));
    super::bind(vm, num, "floor", |_vm, args| ok(Value::Num(args[0].as_num().unwrap().floor())));
    super::bind(vm, num, "ceil", |_vm, args| ok(Value::Num(args[0].as_num().unwrap().ceil())));
    super::bind(vm, num, "round", |_vm, args| ok(Value::Num(args[0].as_num().unwrap().round())));
    super::bind(vm, num, "min(_)", |vm, args| {
        let a = args[0].as_num().unwrap();
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        };
        ok(Value::Num(a.min(b)))
    });
    super::bind(vm, num, "max(_)", |vm, args| {
        let a = args[0].as_num().unwrap();
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        };
        ok(Value::Num(a.max(b)))
    });
    super::bind(vm, num, "pow(_)", |vm, args| {
        let a = args[0].as_num().unwrap();
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        };
        ok(Value::Num(a.powf(b)))
    });

    super::bind(vm, num, "toString", |vm, args| {
        let n = args[0].as_num().unwrap();
        ok(vm.make_string(format_num(n)))
    });

    super::bind(vm, num, "..(_)", |vm, args| {
        let a = args[0].as_num().unwrap();
        let b = match operand(vm, args, 1) {
            Ok(b) => b,
            Err(e) => return e,
        };
        let range_class = vm.classes().range;
        let id = vm.heap.allocate(Some(range_class), HeapObject::Range(StoveRange { from: a, to: b }));
        ok(Value::Obj(id))
    });
}

pub fn install_static(vm: &mut Vm, meta: HeapId) {
    super::bind(vm, meta, "fromString(_)", |vm, args| {
        let Value::Obj(id) = args[1] else {
            return PrimitiveOutcome::Error(vm.make_string("Num.fromString(_) requires a String"));
        };
        let HeapObject::String(s) = vm.heap.get(id) else {
            return PrimitiveOutcome::Error(vm.make_string("Num.fromString(_) requires a String"));
        };
        let text = String::from_utf8_lossy(&s.bytes);
        match text.trim().parse::<f64>() {
            Ok(n) => ok(Value::Num(n)),
            Err(_) => ok(Value::Null),
        }
    });
}

/// Integral doubles print without a trailing `.0`, matching the
/// `toString`/interpolation convention scripts expect from `5 / 1`.
pub(crate) fn format_num(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "infinity".to_string() } else { "-infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
