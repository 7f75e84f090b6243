//! End-to-end scenarios driven through the embedder API, one per
//! observable language feature: recursion, closure capture, fiber
//! rendezvous, inheritance/`super`, list/map literals with string
//! interpolation, and Unicode escapes.

use stove::embed::Vm;
use stove::heap::HeapObject;
use stove::{ExecOutcome, ModuleLoader, Value};

struct NoImports;

impl ModuleLoader for NoImports {
    fn load(&mut self, name: &str) -> std::io::Result<String> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such module: {name}")))
    }
}

fn run(source: &str) -> Value {
    let mut vm = Vm::new(Box::new(NoImports));
    match vm.execute_module("test", source) {
        ExecOutcome::Success(value) => value,
        ExecOutcome::Error(e) => panic!("unexpected error running:\n{source}\n\n{e}"),
    }
}

/// Reads a `Value::Obj` string back out to a Rust `String`; panics if
/// the value isn't a string, since every scenario below knows exactly
/// what shape its result is.
fn as_string(source: &str) -> String {
    let mut vm = Vm::new(Box::new(NoImports));
    let value = match vm.execute_module("test", source) {
        ExecOutcome::Success(value) => value,
        ExecOutcome::Error(e) => panic!("unexpected error running:\n{source}\n\n{e}"),
    };
    let Value::Obj(id) = value else { panic!("expected a string value, got {value:?}") };
    let HeapObject::String(s) = vm.inner().heap.get(id) else { panic!("expected a string object") };
    s.as_str().into_owned()
}

#[test]
fn fib_recursion() {
    let value = run(
        r"
        define fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }
        return fib(10)
        ",
    );
    assert_eq!(value, Value::Num(55.0));
}

#[test]
fn closure_captures_by_reference() {
    let value = run(
        r"
        define makeCounter() {
          var n = 0
          return Fn.new() { n = n + 1; return n }
        }
        var c = makeCounter()
        return c.call() + c.call() + c.call()
        ",
    );
    assert_eq!(value, Value::Num(6.0));
}

#[test]
fn fiber_rendezvous() {
    let value = run(
        r"
        var t = Thread.new() { Thread.yield(42); return 7 }
        var first = t.call()
        var second = t.call()
        return first + second + (t.isDone ? 100 : 0)
        ",
    );
    assert_eq!(value, Value::Num(149.0));
}

#[test]
fn inheritance_and_super() {
    let value = as_string(
        r#"
        class A { greet() { return "A" } }
        class B < A { greet() { return super.greet() + "B" } }
        return B.new().greet()
        "#,
    );
    assert_eq!(value, "AB");
}

#[test]
fn list_and_map_literals_with_interpolation() {
    let value = as_string(
        r#"
        var xs = [1,2,3]
        var name = "world"
        return "hello %(name), sum=%(xs[0]+xs[1]+xs[2])"
        "#,
    );
    assert_eq!(value, "hello world, sum=6");
}

#[test]
fn unicode_escape() {
    let value = as_string(r#"return "你好""#);
    assert_eq!(value, "\u{4f60}\u{597d}");
    assert_eq!(value.len(), 6);
}

#[test]
fn map_set_get_remove_round_trip() {
    let value = run(
        r#"
        var m = {"a": 1, "b": 2}
        m["c"] = 3
        var sum = m["a"] + m["b"] + m["c"]
        m.remove("b")
        return sum + (m.containsKey("b") ? 1000 : 0) + m.count
        "#,
    );
    assert_eq!(value, Value::Num(8.0));
}

#[test]
fn range_iteration_sums_inclusive_bounds() {
    let value = run(
        r"
        var total = 0
        for (i is 1..5) { total = total + i }
        return total
        ",
    );
    assert_eq!(value, Value::Num(15.0));
}
