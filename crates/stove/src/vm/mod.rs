//! The bytecode interpreter: frame stack, value stack (both owned by
//! the current fiber), method dispatch, closures/upvalues, and
//! cooperative fiber scheduling. One `match` over `Opcode` drives
//! execution, reading operands directly out of the current frame's
//! `Fn::instructions` — the direct-threaded/switch-based dispatch loop
//! the spec calls for.

mod fiber;

use ahash::AHashMap;

use crate::bytecode::Opcode;
use crate::core_bindings::PrimitiveOutcome;
use crate::error::{RunResult, RuntimeError, SourceLoc};
use crate::heap::{
    ClassObj, ClosureObj, Frame, Heap, HeapId, HeapObject, InstanceObj, Method, StoveModule,
    ThreadObj, UpvalueObj,
};
use crate::symbol::SymbolTable;
use crate::value::Value;

pub use fiber::FiberOutcome;

/// The handful of classes the VM installs at startup; also the GC's
/// extra root set beyond the current fiber and `allModules`.
#[derive(Clone, Copy)]
pub struct BuiltinClasses {
    pub object: HeapId,
    pub class: HeapId,
    pub bool_: HeapId,
    pub num: HeapId,
    pub string: HeapId,
    pub list: HeapId,
    pub map: HeapId,
    pub range: HeapId,
    pub null: HeapId,
    pub fn_: HeapId,
    pub thread: HeapId,
    pub system: HeapId,
}

/// Hook the embedder provides to resolve `import "name"` to source
/// text. Mirrors the "read-file and resolve-module-by-name hooks are
/// provided by the embedder" line of the embedder API.
pub trait ModuleLoader {
    fn load(&mut self, name: &str) -> std::io::Result<String>;
}

pub struct Vm {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub modules: AHashMap<String, HeapId>,
    pub classes: Option<BuiltinClasses>,
    pub current_fiber: Option<HeapId>,
    pub loader: Option<Box<dyn ModuleLoader>>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            heap: Heap::new(),
            symbols: SymbolTable::new(),
            modules: AHashMap::new(),
            classes: None,
            current_fiber: None,
            loader: None,
        };
        crate::core_bindings::install(&mut vm);
        vm
    }

    pub fn classes(&self) -> BuiltinClasses {
        self.classes.expect("builtin classes not installed")
    }

    // --- module management -------------------------------------------

    pub fn get_or_create_module(&mut self, name: &str) -> HeapId {
        if let Some(&id) = self.modules.get(name) {
            return id;
        }
        let name_id = self.heap.allocate(
            None,
            HeapObject::String(crate::heap::StoveString::new(name.as_bytes().to_vec())),
        );
        let module = self.heap.allocate(None, HeapObject::Module(StoveModule::new(Some(name_id))));
        self.inherit_core_vars(module);
        self.modules.insert(name.to_string(), module);
        module
    }

    /// Every new module inherits the built-in class bindings so
    /// `Object`, `List`, `System`, etc. are visible without an explicit
    /// import.
    fn inherit_core_vars(&mut self, module: HeapId) {
        let classes = self.classes();
        let bindings: &[(&str, HeapId)] = &[
            ("Object", classes.object),
            ("Class", classes.class),
            ("Bool", classes.bool_),
            ("Num", classes.num),
            ("String", classes.string),
            ("List", classes.list),
            ("Map", classes.map),
            ("Range", classes.range),
            ("Null", classes.null),
            ("Fn", classes.fn_),
            ("Thread", classes.thread),
            ("System", classes.system),
        ];
        let HeapObject::Module(m) = self.heap.get_mut(module) else { unreachable!() };
        for (name, id) in bindings {
            if m.find_var(name).is_none() {
                m.var_names.push((*name).to_string());
                m.var_values.push(Value::Obj(*id));
            }
        }
    }

    /// Compiles and runs `source` as module `name`, creating it if new.
    /// This is the embedder-facing `executeModule` operation.
    pub fn execute_module(&mut self, name: &str, source: &str) -> RunResult<Value> {
        let module = self.get_or_create_module(name);
        let fn_id = crate::compiler::compile_module(source, name, &mut self.heap, &mut self.symbols, module)
            .map_err(|e| RuntimeError {
                value: self.make_string(format!("{e}")),
                loc: Some(e.loc),
            })?;
        let closure = self.heap.allocate(
            Some(self.classes().fn_),
            HeapObject::Closure(ClosureObj { fn_id, upvalues: Vec::new() }),
        );
        self.finalize_pending_superclasses(fn_id);
        self.run_closure_to_completion(closure)
    }

    /// `Super*` opcodes reserve a `Null` constant slot at compile time,
    /// patched here once the enclosing `CreateClass` sequence (which
    /// runs as ordinary bytecode, not at compile time) has actually
    /// produced the class object. We patch lazily: the first call
    /// through a `Super*` opcode resolves and caches the real
    /// superclass into that constant slot.
    fn finalize_pending_superclasses(&mut self, _fn_id: HeapId) {
        // Patched on first use inside `dispatch_super` instead of ahead
        // of time, since the class object doesn't exist until its
        // `CreateClass` instruction actually executes.
    }

    pub fn make_string(&mut self, s: impl Into<String>) -> Value {
        let id = self.heap.allocate(
            Some(self.classes().string),
            HeapObject::String(crate::heap::StoveString::new(s.into().into_bytes())),
        );
        Value::Obj(id)
    }

    // --- fiber scheduling primitives, exposed to core_bindings ------------
    //
    // `mod fiber` is private to this module; these thin wrappers are the
    // only door `core_bindings::thread` has into it.

    pub fn spawn_fiber(&mut self, closure: HeapId, initial_arg: Value) -> HeapId {
        fiber::spawn_fiber(self, closure, initial_arg)
    }

    pub fn thread_call(&mut self, fiber_id: HeapId, arg: Value) -> PrimitiveOutcome {
        fiber::thread_call(self, fiber_id, arg)
    }

    pub fn thread_yield(&mut self, arg: Value) -> PrimitiveOutcome {
        fiber::thread_yield(self, arg)
    }

    pub fn thread_suspend(&mut self) -> PrimitiveOutcome {
        fiber::thread_suspend(self)
    }

    pub fn thread_abort(&mut self, fiber_id: HeapId, err: Value) -> PrimitiveOutcome {
        fiber::thread_abort(self, fiber_id, err)
    }

    pub fn fiber_is_done(&self, fiber_id: HeapId) -> bool {
        fiber::is_done(self, fiber_id)
    }

    // --- fiber-driven execution ----------------------------------------

    /// Creates a fresh fiber for `closure`, runs it (and any fiber it
    /// transitively switches to) until the whole chain halts, and
    /// returns the top-level result or propagates a runtime error.
    pub fn run_closure_to_completion(&mut self, closure: HeapId) -> RunResult<Value> {
        let fiber = fiber::spawn_fiber(self, closure, Value::Null);
        self.current_fiber = Some(fiber);
        loop {
            match self.run()? {
                FiberOutcome::Halted(value) => return Ok(value),
                FiberOutcome::Suspended => return Ok(Value::Null),
            }
        }
    }

    /// Runs the current fiber until it halts (frame stack empties with
    /// no caller), suspends (`Thread.suspend`), or raises an unhandled
    /// runtime error.
    pub fn run(&mut self) -> RunResult<FiberOutcome> {
        loop {
            let Some(fiber_id) = self.current_fiber else {
                return Ok(FiberOutcome::Suspended);
            };
            let op = self.fetch_opcode(fiber_id);
            let Some(op) = op else {
                // Frame stack ran dry: fiber finished by falling off
                // the end without an explicit Return (shouldn't happen
                // since every Fn ends with PushNull;Return, but guards
                // against an empty top-level module fn).
                if let Some(outcome) = self.finish_fiber(fiber_id, Value::Null)? {
                    return Ok(outcome);
                }
                continue;
            };
            if let Some(outcome) = self.execute(fiber_id, op)? {
                return Ok(outcome);
            }
            if self.heap.allocated_bytes > self.heap.next_gc {
                crate::gc::collect(self);
            }
        }
    }

    fn fetch_opcode(&mut self, fiber_id: HeapId) -> Option<Opcode> {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        let frame = thread.frames.last_mut()?;
        let HeapObject::Closure(closure) = self.heap.get(frame.closure) else { unreachable!() };
        let HeapObject::Fn(fn_obj) = self.heap.get(closure.fn_id) else { unreachable!() };
        if frame.ip >= fn_obj.instructions.len() {
            return None;
        }
        let byte = fn_obj.instructions[frame.ip];
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.frames.last_mut().unwrap().ip += 1;
        Opcode::from_byte(byte)
    }

    fn read_u8(&mut self, fiber_id: HeapId) -> u8 {
        let (closure, ip) = {
            let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
            let frame = thread.frames.last().unwrap();
            (frame.closure, frame.ip)
        };
        let HeapObject::Closure(c) = self.heap.get(closure) else { unreachable!() };
        let HeapObject::Fn(f) = self.heap.get(c.fn_id) else { unreachable!() };
        let byte = f.instructions[ip];
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.frames.last_mut().unwrap().ip += 1;
        byte
    }

    fn read_u16(&mut self, fiber_id: HeapId) -> u16 {
        let hi = self.read_u8(fiber_id);
        let lo = self.read_u8(fiber_id);
        u16::from_be_bytes([hi, lo])
    }

    fn current_line(&self, fiber_id: HeapId) -> Option<SourceLoc> {
        None
    }

    fn push(&mut self, fiber_id: HeapId, value: Value) {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.stack.push(value);
    }

    /// Delivers `value` to a fiber that's being resumed after a
    /// `Thread.*` switch. If the fiber has a pending
    /// `resume_receiver_index` (the receiver+args slots its own
    /// suspending call reserved), truncates back to it first so the
    /// delivered value lands exactly where that call's result belongs,
    /// the same truncate-then-push shape `Method::Primitive`'s
    /// `Return` arm uses for an ordinary call.
    pub(crate) fn deliver_resume_value(&mut self, fiber_id: HeapId, value: Value) {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        match thread.resume_receiver_index.take() {
            Some(idx) => {
                thread.stack.truncate(idx);
                thread.stack.push(value);
            }
            None => thread.stack.push(value),
        }
    }

    fn pop(&mut self, fiber_id: HeapId) -> Value {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, fiber_id: HeapId, depth_from_top: usize) -> Value {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        thread.stack[thread.stack.len() - 1 - depth_from_top]
    }

    fn stack_top_index(&self, fiber_id: HeapId) -> usize {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        thread.stack.len()
    }

    fn frame_base(&self, fiber_id: HeapId) -> usize {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        thread.frames.last().unwrap().stack_base
    }

    /// Raises a runtime error: stores it on the fiber, to be observed
    /// after the current opcode's handling returns.
    fn raise(&mut self, fiber_id: HeapId, value: Value) {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.error = value;
    }

    fn execute(&mut self, fiber_id: HeapId, op: Opcode) -> RunResult<Option<FiberOutcome>> {
        use Opcode::*;
        match op {
            LoadConstant => {
                let idx = self.read_u16(fiber_id);
                let value = self.constant(fiber_id, idx);
                self.push(fiber_id, value);
            }
            PushNull => self.push(fiber_id, Value::Null),
            PushTrue => self.push(fiber_id, Value::True),
            PushFalse => self.push(fiber_id, Value::False),
            LoadLocalVar => {
                let slot = self.read_u8(fiber_id);
                let base = self.frame_base(fiber_id);
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let value = thread.stack[base + slot as usize];
                self.push(fiber_id, value);
            }
            StoreLocalVar => {
                let slot = self.read_u8(fiber_id);
                let base = self.frame_base(fiber_id);
                let value = self.peek(fiber_id, 0);
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                thread.stack[base + slot as usize] = value;
            }
            LoadUpvalue => {
                let slot = self.read_u8(fiber_id);
                let value = self.read_upvalue(fiber_id, slot);
                self.push(fiber_id, value);
            }
            StoreUpvalue => {
                let slot = self.read_u8(fiber_id);
                let value = self.peek(fiber_id, 0);
                self.write_upvalue(fiber_id, slot, value);
            }
            LoadModuleVar => {
                let idx = self.read_u16(fiber_id);
                let module = self.current_module(fiber_id);
                let HeapObject::Module(m) = self.heap.get(module) else { unreachable!() };
                let value = m.var_values[idx as usize];
                self.push(fiber_id, value);
            }
            StoreModuleVar => {
                let idx = self.read_u16(fiber_id);
                let module = self.current_module(fiber_id);
                let value = self.peek(fiber_id, 0);
                let HeapObject::Module(m) = self.heap.get_mut(module) else { unreachable!() };
                m.var_values[idx as usize] = value;
            }
            LoadSelfField => {
                let slot = self.read_u8(fiber_id);
                let base = self.frame_base(fiber_id);
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let receiver = thread.stack[base];
                let value = self.field(receiver, slot);
                self.push(fiber_id, value);
            }
            StoreSelfField => {
                let slot = self.read_u8(fiber_id);
                let base = self.frame_base(fiber_id);
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let receiver = thread.stack[base];
                let value = self.peek(fiber_id, 0);
                self.set_field(receiver, slot, value);
            }
            LoadField => {
                let slot = self.read_u8(fiber_id);
                let receiver = self.peek(fiber_id, 0);
                let value = self.field(receiver, slot);
                self.push(fiber_id, value);
            }
            StoreField => {
                let slot = self.read_u8(fiber_id);
                let value = self.pop(fiber_id);
                let receiver = self.pop(fiber_id);
                self.set_field(receiver, slot, value);
                self.push(fiber_id, value);
            }
            Pop => {
                self.pop(fiber_id);
            }
            Jump => {
                let offset = self.read_u16(fiber_id);
                self.jump_forward(fiber_id, offset);
            }
            Loop => {
                let offset = self.read_u16(fiber_id);
                self.jump_backward(fiber_id, offset);
            }
            JumpIfFalse => {
                let offset = self.read_u16(fiber_id);
                let v = self.pop(fiber_id);
                if v.is_falsy() {
                    self.jump_forward(fiber_id, offset);
                }
            }
            And => {
                let offset = self.read_u16(fiber_id);
                if self.peek(fiber_id, 0).is_falsy() {
                    self.jump_forward(fiber_id, offset);
                } else {
                    self.pop(fiber_id);
                }
            }
            Or => {
                let offset = self.read_u16(fiber_id);
                if self.peek(fiber_id, 0).is_truthy() {
                    self.jump_forward(fiber_id, offset);
                } else {
                    self.pop(fiber_id);
                }
            }
            CloseUpvalue => {
                let top = self.stack_top_index(fiber_id) - 1;
                self.close_upvalues_from(fiber_id, top);
                self.pop(fiber_id);
            }
            Return => {
                let result = self.pop(fiber_id);
                if let Some(outcome) = self.do_return(fiber_id, result)? {
                    return Ok(Some(outcome));
                }
            }
            CreateClosure => {
                let idx = self.read_u16(fiber_id);
                let fn_value = self.constant(fiber_id, idx);
                let Value::Obj(fn_id) = fn_value else { unreachable!("CreateClosure constant must be a Fn") };
                let HeapObject::Fn(f) = self.heap.get(fn_id) else { unreachable!() };
                let upvalue_count = f.upvalue_count;
                let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                for _ in 0..upvalue_count {
                    let is_local = self.read_u8(fiber_id) != 0;
                    let index = self.read_u8(fiber_id);
                    let uv = if is_local {
                        let base = self.frame_base(fiber_id);
                        self.find_or_open_upvalue(fiber_id, base + index as usize)
                    } else {
                        self.enclosing_upvalue(fiber_id, index)
                    };
                    upvalues.push(uv);
                }
                let closure = self.heap.allocate(
                    Some(self.classes().fn_),
                    HeapObject::Closure(ClosureObj { fn_id, upvalues }),
                );
                self.push(fiber_id, Value::Obj(closure));
            }
            Construct => {
                let base = self.frame_base(fiber_id);
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let Value::Obj(class_id) = thread.stack[base] else {
                    let msg = self.make_string("Construct requires a Class receiver");
                    self.raise(fiber_id, msg);
                    return self.check_error(fiber_id);
                };
                let HeapObject::Class(class) = self.heap.get(class_id) else { unreachable!() };
                let field_count = class.field_count;
                let instance = self.heap.allocate(
                    Some(class_id),
                    HeapObject::Instance(InstanceObj { fields: vec![Value::Null; field_count as usize] }),
                );
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                thread.stack[base] = Value::Obj(instance);
            }
            CreateClass => {
                let field_extra = self.read_u8(fiber_id);
                let name_value = self.pop(fiber_id);
                let super_value = self.pop(fiber_id);
                self.create_class(fiber_id, name_value, super_value, field_extra)?;
            }
            InstanceMethod | StaticMethod => {
                let symbol = self.read_u16(fiber_id) as u32;
                let closure_value = self.pop(fiber_id);
                let class_value = self.peek(fiber_id, 0);
                let Value::Obj(class_id) = class_value else { unreachable!() };
                let Value::Obj(closure_id) = closure_value else { unreachable!() };
                let target_id = if op == StaticMethod { self.metaclass_of(class_id) } else { class_id };
                let HeapObject::Closure(closure) = self.heap.get(closure_id) else { unreachable!() };
                let fn_id = closure.fn_id;
                let HeapObject::Fn(f) = self.heap.get_mut(fn_id) else { unreachable!() };
                f.defining_class = Some(target_id);
                if op == InstanceMethod {
                    // Instance method bodies were compiled against a
                    // class-local, 0-based field numbering (each class
                    // body starts `field_names` fresh); shift every
                    // `LoadSelfField`/`StoreSelfField` operand by however
                    // many fields the superclass already claimed, so they
                    // land past the inherited ones in the shared
                    // `InstanceObj.fields` vec.
                    let HeapObject::Class(class) = self.heap.get(class_id) else { unreachable!() };
                    let offset = match class.superclass {
                        Some(super_id) => {
                            let HeapObject::Class(super_class) = self.heap.get(super_id) else { unreachable!() };
                            super_class.field_count
                        }
                        None => 0,
                    };
                    if offset > 0 {
                        self.patch_self_field_offsets(fn_id, offset as u8);
                    }
                }
                let HeapObject::Class(class) = self.heap.get_mut(target_id) else { unreachable!() };
                class.set_method(symbol, Method::Script(closure_id));
            }
            Placeholder => {
                // Only reachable if a `break` target was never patched
                // (a compiler defect, not a user-triggerable state).
                let _ = self.read_u16(fiber_id);
            }
            End => {}
            op if op.call_arity().is_some() => {
                let argc = op.call_arity().unwrap();
                let symbol = self.read_u16(fiber_id) as u32;
                if let Some(outcome) = self.dispatch_call(fiber_id, symbol, argc, false)? {
                    return Ok(Some(outcome));
                }
            }
            op if op.super_arity().is_some() => {
                let argc = op.super_arity().unwrap();
                let symbol = self.read_u16(fiber_id) as u32;
                let const_idx = self.read_u16(fiber_id);
                if let Some(outcome) = self.dispatch_super(fiber_id, symbol, argc, const_idx)? {
                    return Ok(Some(outcome));
                }
            }
            _ => unreachable!("unhandled opcode {op:?}"),
        }
        self.check_error(fiber_id)
    }

    fn constant(&self, fiber_id: HeapId, idx: u16) -> Value {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let frame = thread.frames.last().unwrap();
        let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
        let HeapObject::Fn(f) = self.heap.get(c.fn_id) else { unreachable!() };
        f.constants[idx as usize]
    }

    fn current_module(&self, fiber_id: HeapId) -> HeapId {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let frame = thread.frames.last().unwrap();
        let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
        let HeapObject::Fn(f) = self.heap.get(c.fn_id) else { unreachable!() };
        f.module
    }

    fn jump_forward(&mut self, fiber_id: HeapId, offset: u16) {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.frames.last_mut().unwrap().ip += offset as usize;
    }

    fn jump_backward(&mut self, fiber_id: HeapId, offset: u16) {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.frames.last_mut().unwrap().ip -= offset as usize;
    }

    fn field(&self, receiver: Value, slot: u8) -> Value {
        let Value::Obj(id) = receiver else { return Value::Null };
        match self.heap.get(id) {
            HeapObject::Instance(inst) => inst.fields.get(slot as usize).copied().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, receiver: Value, slot: u8, value: Value) {
        let Value::Obj(id) = receiver else { return };
        if let HeapObject::Instance(inst) = self.heap.get_mut(id) {
            if (slot as usize) < inst.fields.len() {
                inst.fields[slot as usize] = value;
            }
        }
    }

    /// After an opcode handler runs, checks whether the fiber's error
    /// slot was set (by a primitive, by `Construct`, or by a runtime
    /// dispatch failure) and if so unwinds: an unhandled error at the
    /// top level halts the whole run; any `Thread.abort` instead just
    /// finishes that one fiber, observable via `isDone`/error.
    fn check_error(&mut self, fiber_id: HeapId) -> RunResult<Option<FiberOutcome>> {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        if matches!(thread.error, Value::Null) {
            return Ok(None);
        }
        let error_value = thread.error;
        let caller = thread.caller;
        match caller {
            Some(caller_id) => {
                self.current_fiber = Some(caller_id);
                Ok(None)
            }
            None => Err(RuntimeError { value: error_value, loc: self.current_line(fiber_id) }),
        }
    }

    // --- method dispatch ------------------------------------------------

    pub fn class_of_value(&self, value: Value) -> HeapId {
        let classes = self.classes();
        match value {
            Value::Undefined | Value::Null => classes.null,
            Value::True | Value::False => classes.bool_,
            Value::Num(_) => classes.num,
            Value::Obj(id) => self.heap.class_of(id).unwrap_or(classes.object),
        }
    }

    fn metaclass_of(&self, class_id: HeapId) -> HeapId {
        self.heap.class_of(class_id).unwrap_or(self.classes().class)
    }

    fn dispatch_call(
        &mut self,
        fiber_id: HeapId,
        symbol: u32,
        argc: u8,
        is_super: bool,
    ) -> RunResult<Option<FiberOutcome>> {
        let _ = is_super;
        let receiver_index = self.stack_top_index(fiber_id) - argc as usize - 1;
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let receiver = thread.stack[receiver_index];
        let class_id = self.class_of_value(receiver);
        self.invoke(fiber_id, class_id, receiver_index, symbol, argc)
    }

    fn dispatch_super(
        &mut self,
        fiber_id: HeapId,
        symbol: u32,
        argc: u8,
        const_idx: u16,
    ) -> RunResult<Option<FiberOutcome>> {
        let super_value = self.constant(fiber_id, const_idx);
        let class_id = match super_value {
            Value::Obj(id) if matches!(self.heap.get(id), HeapObject::Class(_)) => id,
            _ => {
                // Lazily resolve: the superclass of the class that owns
                // the currently executing method's Fn.
                let resolved = self.resolve_enclosing_superclass(fiber_id)?;
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let frame = thread.frames.last().unwrap();
                let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
                let HeapObject::Fn(f) = self.heap.get_mut(c.fn_id) else { unreachable!() };
                f.constants[const_idx as usize] = Value::Obj(resolved);
                resolved
            }
        };
        let receiver_index = self.stack_top_index(fiber_id) - argc as usize - 1;
        self.invoke(fiber_id, class_id, receiver_index, symbol, argc)
    }

    /// `super` always resolves against the superclass of the class that
    /// *lexically defines* the currently executing method, never the
    /// receiver's runtime class — those only coincide when the method
    /// isn't itself inherited by a further subclass, which is why a
    /// receiver-based lookup only breaks on 3+-level hierarchies.
    fn resolve_enclosing_superclass(&mut self, fiber_id: HeapId) -> RunResult<HeapId> {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let frame = thread.frames.last().unwrap();
        let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
        let HeapObject::Fn(f) = self.heap.get(c.fn_id) else { unreachable!() };
        let defining_class = f.defining_class.expect("super used outside an installed method");
        let HeapObject::Class(class) = self.heap.get(defining_class) else { unreachable!() };
        Ok(class.superclass.unwrap_or(self.classes().object))
    }

    fn invoke(
        &mut self,
        fiber_id: HeapId,
        class_id: HeapId,
        receiver_index: usize,
        symbol: u32,
        argc: u8,
    ) -> RunResult<Option<FiberOutcome>> {
        let HeapObject::Class(class) = self.heap.get(class_id) else { unreachable!() };
        let method = class.method(symbol).clone();
        match method {
            Method::None => {
                let name = self.symbols.name(symbol).to_string();
                let msg = self.make_string(format!("method '{name}' not found"));
                self.raise(fiber_id, msg);
                self.check_error(fiber_id)
            }
            Method::Primitive(f) => {
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                let slice_end = receiver_index + argc as usize + 1;
                let mut args: Vec<Value> = thread.stack[receiver_index..slice_end].to_vec();
                let outcome = f(self, &mut args);
                match outcome {
                    PrimitiveOutcome::Return(value) => {
                        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                        thread.stack.truncate(receiver_index);
                        thread.stack.push(value);
                        self.check_error(fiber_id)
                    }
                    PrimitiveOutcome::Error(value) => {
                        self.raise(fiber_id, value);
                        self.check_error(fiber_id)
                    }
                    PrimitiveOutcome::FiberSwitch => {
                        // This primitive suspended `fiber_id` itself (it
                        // called into another fiber, yielded, or
                        // suspended) rather than just mutating some other
                        // fiber's state. Stash where the eventual result
                        // belongs so whatever resumes it later truncates
                        // back to these reserved receiver+args slots
                        // instead of leaving them on the stack forever.
                        if self.current_fiber != Some(fiber_id) {
                            let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                            thread.resume_receiver_index = Some(receiver_index);
                        }
                        Ok(None)
                    }
                }
            }
            Method::Script(closure_id) => {
                self.push_frame(fiber_id, closure_id, receiver_index);
                Ok(None)
            }
            Method::FnCall => {
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                let Value::Obj(closure_id) = thread.stack[receiver_index] else {
                    let msg = self.make_string("Fn.call requires a closure receiver");
                    self.raise(fiber_id, msg);
                    return self.check_error(fiber_id);
                };
                self.push_frame(fiber_id, closure_id, receiver_index);
                Ok(None)
            }
            Method::BoundConstructor { user_new_symbol } => {
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                let Value::Obj(class_receiver) = thread.stack[receiver_index] else { unreachable!() };
                let HeapObject::Class(class) = self.heap.get(class_receiver) else { unreachable!() };
                let field_count = class.field_count;
                let instance =
                    self.heap.allocate(Some(class_receiver), HeapObject::Instance(InstanceObj { fields: vec![Value::Null; field_count as usize] }));
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                thread.stack[receiver_index] = Value::Obj(instance);
                match user_new_symbol {
                    Some(user_symbol) => self.invoke(fiber_id, class_receiver, receiver_index, user_symbol, argc),
                    None => {
                        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
                        thread.stack.truncate(receiver_index);
                        thread.stack.push(Value::Obj(instance));
                        self.check_error(fiber_id)
                    }
                }
            }
        }
    }

    fn push_frame(&mut self, fiber_id: HeapId, closure_id: HeapId, stack_base: usize) {
        fiber::ensure_stack_capacity(self, fiber_id, closure_id, stack_base);
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.frames.push(Frame { closure: closure_id, ip: 0, stack_base });
    }

    fn do_return(&mut self, fiber_id: HeapId, result: Value) -> RunResult<Option<FiberOutcome>> {
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        let frame = thread.frames.pop().expect("return with no active frame");
        self.close_upvalues_from(fiber_id, frame.stack_base);
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.stack.truncate(frame.stack_base);
        thread.stack.push(result);
        if thread.frames.is_empty() {
            return self.finish_fiber(fiber_id, result);
        }
        Ok(None)
    }

    fn finish_fiber(&mut self, fiber_id: HeapId, result: Value) -> RunResult<Option<FiberOutcome>> {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let caller = thread.caller;
        match caller {
            Some(caller_id) => {
                self.deliver_resume_value(caller_id, result);
                let HeapObject::Thread(c) = self.heap.get_mut(caller_id) else { unreachable!() };
                c.caller = None;
                self.current_fiber = Some(caller_id);
                Ok(None)
            }
            None => {
                self.current_fiber = None;
                Ok(Some(FiberOutcome::Halted(result)))
            }
        }
    }

    // --- upvalues --------------------------------------------------------

    fn find_or_open_upvalue(&mut self, fiber_id: HeapId, stack_index: usize) -> HeapId {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        for &uv_id in &thread.open_upvalues {
            if let HeapObject::Upvalue(UpvalueObj::Open { stack_index: idx, .. }) = self.heap.get(uv_id) {
                if *idx == stack_index {
                    return uv_id;
                }
            }
        }
        let uv_id = self.heap.allocate(None, HeapObject::Upvalue(UpvalueObj::Open { fiber: fiber_id, stack_index }));
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        let pos = thread
            .open_upvalues
            .iter()
            .position(|&id| match self.heap.get(id) {
                HeapObject::Upvalue(UpvalueObj::Open { stack_index: idx, .. }) => *idx < stack_index,
                _ => false,
            })
            .unwrap_or(thread.open_upvalues.len());
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        thread.open_upvalues.insert(pos, uv_id);
        let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
        let base = thread.frames.last().map(|f| f.stack_base).unwrap_or(0);
        if stack_index >= base {
            // mark the owning local as captured is handled at compile
            // time; nothing further to record at runtime.
        }
        uv_id
    }

    fn enclosing_upvalue(&mut self, fiber_id: HeapId, index: u8) -> HeapId {
        let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
        let frame = thread.frames.last().unwrap();
        let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
        c.upvalues[index as usize]
    }

    fn read_upvalue(&self, fiber_id: HeapId, index: u8) -> Value {
        let uv_id = {
            let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
            let frame = thread.frames.last().unwrap();
            let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
            c.upvalues[index as usize]
        };
        match self.heap.get(uv_id) {
            HeapObject::Upvalue(UpvalueObj::Closed(v)) => *v,
            HeapObject::Upvalue(UpvalueObj::Open { fiber, stack_index }) => {
                let HeapObject::Thread(thread) = self.heap.get(*fiber) else { unreachable!() };
                thread.stack[*stack_index]
            }
            _ => unreachable!(),
        }
    }

    fn write_upvalue(&mut self, fiber_id: HeapId, index: u8, value: Value) {
        let uv_id = {
            let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
            let frame = thread.frames.last().unwrap();
            let HeapObject::Closure(c) = self.heap.get(frame.closure) else { unreachable!() };
            c.upvalues[index as usize]
        };
        let target = match self.heap.get(uv_id) {
            HeapObject::Upvalue(UpvalueObj::Open { fiber, stack_index }) => Some((*fiber, *stack_index)),
            _ => None,
        };
        match target {
            Some((fiber, stack_index)) => {
                let HeapObject::Thread(thread) = self.heap.get_mut(fiber) else { unreachable!() };
                thread.stack[stack_index] = value;
            }
            None => {
                if let HeapObject::Upvalue(slot) = self.heap.get_mut(uv_id) {
                    *slot = UpvalueObj::Closed(value);
                }
            }
        }
    }

    /// Closes every open upvalue on `fiber_id` whose stack index is `>=
    /// from`; the open list is kept sorted by descending stack index so
    /// this can stop at the first one below the cutoff.
    fn close_upvalues_from(&mut self, fiber_id: HeapId, from: usize) {
        loop {
            let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
            let Some(&uv_id) = thread.open_upvalues.first() else { break };
            let HeapObject::Upvalue(UpvalueObj::Open { stack_index, .. }) = self.heap.get(uv_id) else { break };
            if *stack_index < from {
                break;
            }
            let value = {
                let HeapObject::Thread(thread) = self.heap.get(fiber_id) else { unreachable!() };
                thread.stack[*stack_index]
            };
            if let HeapObject::Upvalue(slot) = self.heap.get_mut(uv_id) {
                *slot = UpvalueObj::Closed(value);
            }
            let HeapObject::Thread(thread) = self.heap.get_mut(fiber_id) else { unreachable!() };
            thread.open_upvalues.remove(0);
        }
    }

    // --- classes ----------------------------------------------------------

    /// Shifts every `LoadSelfField`/`StoreSelfField` operand in `fn_id`'s
    /// bytecode by `offset`, recursing into any `CreateClosure`-referenced
    /// nested `Fn` (a block or lambda literal compiled inside the method
    /// body shares the same class-local field numbering). Idempotent via
    /// `self_fields_patched`, since a `class` statement inside a loop can
    /// install the same baked `Fn` constant more than once.
    fn patch_self_field_offsets(&mut self, fn_id: HeapId, offset: u8) {
        let (mut instructions, constants, already) = {
            let HeapObject::Fn(f) = self.heap.get_mut(fn_id) else { unreachable!() };
            if f.self_fields_patched {
                (Vec::new(), Vec::new(), true)
            } else {
                (std::mem::take(&mut f.instructions), f.constants.clone(), false)
            }
        };
        if already {
            return;
        }

        let mut ip = 0usize;
        while ip < instructions.len() {
            let Some(op) = Opcode::from_byte(instructions[ip]) else { break };
            ip += 1;
            match op {
                Opcode::LoadSelfField | Opcode::StoreSelfField => {
                    instructions[ip] = instructions[ip].saturating_add(offset);
                    ip += 1;
                }
                Opcode::CreateClosure => {
                    let idx = u16::from_be_bytes([instructions[ip], instructions[ip + 1]]);
                    ip += 2;
                    if let Value::Obj(nested_id) = constants[idx as usize] {
                        self.patch_self_field_offsets(nested_id, offset);
                        let HeapObject::Fn(nested) = self.heap.get(nested_id) else { unreachable!() };
                        ip += nested.upvalue_count as usize * 2;
                    }
                }
                Opcode::End => break,
                _ => ip += op.operand_len() as usize,
            }
        }

        let HeapObject::Fn(f) = self.heap.get_mut(fn_id) else { unreachable!() };
        f.instructions = instructions;
        f.self_fields_patched = true;
    }

    fn create_class(
        &mut self,
        fiber_id: HeapId,
        name_value: Value,
        super_value: Value,
        extra_field_count: u8,
    ) -> RunResult<()> {
        let Value::Obj(super_id) = super_value else {
            let msg = self.make_string("superclass must be a Class");
            self.raise(fiber_id, msg);
            return Ok(());
        };
        let HeapObject::Class(super_class) = self.heap.get(super_id) else {
            let msg = self.make_string("superclass must be a Class");
            self.raise(fiber_id, msg);
            return Ok(());
        };
        if super_class.is_builtin {
            let msg = self.make_string("cannot subclass a built-in class");
            self.raise(fiber_id, msg);
            return Ok(());
        }
        let inherited_methods = super_class.methods.clone();
        let field_count = super_class.field_count + extra_field_count as u32;

        let Value::Obj(name_id) = name_value else { unreachable!() };
        let class_obj = ClassObj {
            superclass: Some(super_id),
            field_count,
            name: name_id,
            methods: inherited_methods,
            is_builtin: false,
        };
        let class_id = self.heap.allocate(None, HeapObject::Class(class_obj));
        self.heap.set_class_of(class_id, self.classes().class);

        // Synthesize the metaclass's `new(...)` constructor glue: a
        // dedicated metaclass object whose sole job is to dispatch
        // `new(...)` through `Method::BoundConstructor`.
        let new_symbol = self.symbols.find("new()").or_else(|| self.symbols.find("new(_)"));
        let class_class = self.classes().class;
        let class_methods = {
            let HeapObject::Class(c) = self.heap.get(class_class) else { unreachable!() };
            c.methods.clone()
        };
        let meta_class_obj = ClassObj {
            superclass: Some(class_class),
            field_count: 0,
            name: name_id,
            methods: class_methods,
            is_builtin: false,
        };
        let meta_id = self.heap.allocate(Some(self.classes().class), HeapObject::Class(meta_class_obj));
        self.heap.set_class_of(class_id, meta_id);
        if let HeapObject::Class(meta) = self.heap.get_mut(meta_id) {
            // Every arity 0..=16 constructor call goes through the same
            // glue; register the bound constructor at whatever arities
            // the user actually defined `new` at, discovered lazily by
            // `InstanceMethod` installing over this slot when the class
            // body defines its own `new`.
            if let Some(sym) = new_symbol {
                meta.set_method(sym, Method::BoundConstructor { user_new_symbol: Some(sym) });
            }
        }

        self.push(fiber_id, Value::Obj(class_id));
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
