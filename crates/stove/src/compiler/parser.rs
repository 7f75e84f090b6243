//! The compiler proper: a recursive Pratt parser over the lexer's token
//! stream. Each parse position (`nud`/`led`) is a plain `match` over
//! `TokenKind` rather than an indirect function-pointer table, per the
//! design note that recommends a tagged dispatch over function pointers
//! for a systems-language rewrite.

use crate::bytecode::{Opcode, MAX_CALL_ARGS};
use crate::compiler::unit::{ClassBookkeeping, CompileUnit, LoopState, UnitKind};
use crate::compiler::{BindPower, Signature, SignatureKind};
use crate::error::{CompileError, CompileResult, SourceLoc};
use crate::heap::{FnObj, Heap, HeapObject};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::symbol::SymbolTable;
use crate::value::Value;

use crate::MAX_IDENTIFIER_LEN;

fn lbp(kind: TokenKind) -> BindPower {
    use BindPower::*;
    use TokenKind::*;
    match kind {
        Assign => BindPower::Assign,
        Question => Cond,
        PipePipe => LogicOr,
        AmpAmp => LogicAnd,
        EqEq | BangEq => Equal,
        Is => BindPower::Is,
        Less | LessEq | Greater | GreaterEq => Cmp,
        Pipe => BitOr,
        Amp => BitAnd,
        ShiftLeft | ShiftRight => BitShift,
        DotDot => BindPower::Range,
        Plus | Minus => Term,
        Star | Slash | Percent => Factor,
        Dot | LeftParen | LeftBracket => Call,
        _ => None,
    }
}

pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    previous: Token,
    current: Token,
    units: Vec<CompileUnit>,
    class_stack: Vec<ClassBookkeeping>,
    heap: *mut Heap,
    symbols: *mut SymbolTable,
    module: crate::heap::HeapId,
    file: String,
}

/// Compiles `source` as a module body, interning method signatures into
/// `symbols` and module variables into the heap `Module` object at
/// `module`. Returns the heap id of the compiled top-level `Fn`.
pub fn compile_module(
    source: &str,
    file: &str,
    heap: &mut Heap,
    symbols: &mut SymbolTable,
    module: crate::heap::HeapId,
) -> CompileResult<crate::heap::HeapId> {
    let lexer = Lexer::new(source, file);
    let mut compiler = Compiler {
        lexer,
        previous: dummy_token(),
        current: dummy_token(),
        units: vec![CompileUnit::new_module()],
        class_stack: Vec::new(),
        heap: heap as *mut Heap,
        symbols: symbols as *mut SymbolTable,
        module,
        file: file.to_string(),
    };
    compiler.advance()?;
    while !compiler.check(TokenKind::Eof) {
        compiler.statement()?;
    }
    let line = compiler.previous.line;
    compiler.unit_mut().builder.emit(Opcode::PushNull, line);
    compiler.unit_mut().builder.emit(Opcode::Return, line);
    compiler.finish_unwind_forward_refs()?;
    let unit = compiler.units.pop().unwrap();
    Ok(compiler.bake_fn(unit, 0, "<module>"))
}

fn dummy_token() -> Token {
    Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0, value: None }
}

impl<'src> Compiler<'src> {
    /// `heap`/`symbols` are stored as raw pointers rather than borrowed
    /// fields so that methods can hold a `&mut self.units` borrow and a
    /// `&mut Heap`/`&mut SymbolTable` borrow at the same time without
    /// threading both through every call in the parser — the shared-heap
    /// compiler/VM design this language requires (module variable names
    /// and method-name symbols must round-trip through the same heap and
    /// symbol table the VM later executes against). Both pointers are
    /// created once in `compile_module` from borrows that outlive the
    /// `Compiler`, and nothing else aliases them for its lifetime.
    fn heap(&mut self) -> &mut Heap {
        unsafe { &mut *self.heap }
    }

    fn symbols(&mut self) -> &mut SymbolTable {
        unsafe { &mut *self.symbols }
    }

    fn unit_mut(&mut self) -> &mut CompileUnit {
        self.units.last_mut().unwrap()
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.previous.line)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError { loc: self.loc(), message: message.into() }
    }

    fn advance(&mut self) -> CompileResult<()> {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current = self.lexer.next().map_err(|e| CompileError { loc: e.loc, message: e.message })?;
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_tok(&mut self, kind: TokenKind) -> CompileResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> CompileResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(format!("{message} (found {:?})", self.current.kind)))
        }
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn intern(&mut self, signature_text: &str) -> u32 {
        self.symbols().intern(signature_text)
    }

    fn bake_fn(&mut self, unit: CompileUnit, arity: u32, name: &str) -> crate::heap::HeapId {
        let builder = unit.builder;
        let obj = FnObj {
            module: self.module,
            instructions: builder.bytecode,
            constants: builder.constants,
            max_stack_slots: builder.max_stack_depth,
            upvalue_count: unit.upvalues.len() as u32,
            arity,
            debug_lines: Some(builder.lines),
            name: name.to_string(),
            defining_class: None,
            self_fields_patched: false,
        };
        self.heap().allocate(None, HeapObject::Fn(obj))
    }

    // --- module-variable handling ------------------------------------

    fn module_find_or_forward(&mut self, name: &str) -> CompileResult<usize> {
        let line = self.line();
        let module_id = self.module;
        let heap = self.heap();
        let HeapObject::Module(module) = heap.get_mut(module_id) else { unreachable!() };
        if let Some(idx) = module.find_var(name) {
            return Ok(idx);
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(self.error(format!("identifier '{name}' exceeds {MAX_IDENTIFIER_LEN} bytes")));
        }
        module.var_names.push(name.to_string());
        module.var_values.push(Value::Num(line as f64));
        Ok(module.var_names.len() - 1)
    }

    fn module_define(&mut self, name: &str, value_already_on_stack: bool, line: u32) -> CompileResult<()> {
        let module_id = self.module;
        let idx = {
            let heap = self.heap();
            let HeapObject::Module(module) = heap.get_mut(module_id) else { unreachable!() };
            match module.find_var(name) {
                Some(idx) => {
                    let is_forward = matches!(module.var_values[idx], Value::Num(_));
                    if !is_forward {
                        return Err(CompileError {
                            loc: SourceLoc::new(self.file.clone(), line),
                            message: format!("redefinition of module variable '{name}'"),
                        });
                    }
                    idx
                }
                None => {
                    if name.len() > MAX_IDENTIFIER_LEN {
                        return Err(CompileError {
                            loc: SourceLoc::new(self.file.clone(), line),
                            message: format!("identifier '{name}' exceeds {MAX_IDENTIFIER_LEN} bytes"),
                        });
                    }
                    module.var_names.push(name.to_string());
                    module.var_values.push(Value::Undefined);
                    module.var_names.len() - 1
                }
            }
        };
        if !value_already_on_stack {
            self.unit_mut().builder.emit(Opcode::PushNull, line);
        }
        self.unit_mut().builder.emit(Opcode::StoreModuleVar, line);
        self.unit_mut().builder.emit_u16(idx as u16);
        self.unit_mut().builder.emit(Opcode::Pop, line);
        Ok(())
    }

    /// Any module variable whose value is still a `Num` placeholder at
    /// the end of compilation was referenced but never defined.
    fn finish_unwind_forward_refs(&mut self) -> CompileResult<()> {
        let module_id = self.module;
        let heap = self.heap();
        let HeapObject::Module(module) = heap.get(module_id) else { unreachable!() };
        for (name, value) in module.var_names.iter().zip(module.var_values.iter()) {
            if let Value::Num(line) = value {
                return Err(self.error(format!(
                    "'{name}' used at line {line} but never defined"
                )));
            }
        }
        Ok(())
    }

    // --- statements ----------------------------------------------------

    fn statement(&mut self) -> CompileResult<()> {
        if self.match_tok(TokenKind::Var)? {
            self.var_statement()
        } else if self.match_tok(TokenKind::Define)? {
            self.define_statement()
        } else if self.match_tok(TokenKind::If)? {
            self.if_statement()
        } else if self.match_tok(TokenKind::While)? {
            self.while_statement()
        } else if self.match_tok(TokenKind::For)? {
            self.for_statement()
        } else if self.match_tok(TokenKind::Break)? {
            self.break_statement()
        } else if self.match_tok(TokenKind::Continue)? {
            self.continue_statement()
        } else if self.match_tok(TokenKind::Return)? {
            self.return_statement()
        } else if self.match_tok(TokenKind::Class)? {
            self.class_statement()
        } else if self.match_tok(TokenKind::Import)? {
            self.import_statement()
        } else if self.check(TokenKind::LeftBrace) {
            self.advance()?;
            self.begin_scope();
            self.block()?;
            self.end_scope();
            Ok(())
        } else {
            self.expression_statement()
        }
    }

    fn begin_scope(&mut self) {
        self.unit_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let line = self.line();
        let target = self.unit_mut().scope_depth - 1;
        self.unit_mut().discard_locals_above(target, line);
        let target = self.unit_mut().scope_depth - 1;
        self.unit_mut().locals.retain(|l| l.depth <= target);
        self.unit_mut().scope_depth -= 1;
    }

    fn block(&mut self) -> CompileResult<()> {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.statement()?;
        }
        self.consume(TokenKind::RightBrace, "expected '}' to close block")
    }

    fn declare_target(&mut self, name: &str, line: u32) -> CompileResult<DeclTarget> {
        if self.unit_mut().is_module() {
            Ok(DeclTarget::Module)
        } else {
            let idx = self
                .unit_mut()
                .add_local(name)
                .map_err(|msg| CompileError { loc: SourceLoc::new(self.file.clone(), line), message: msg })?;
            Ok(DeclTarget::Local(idx))
        }
    }

    fn var_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        self.consume(TokenKind::Id, "expected variable name")?;
        let name = self.previous.lexeme.clone();
        let target = if self.unit_mut().is_module() { None } else { Some(self.declare_target(&name, line)?) };
        if self.match_tok(TokenKind::Assign)? {
            self.expression(BindPower::Assign)?;
        } else {
            self.unit_mut().builder.emit(Opcode::PushNull, line);
        }
        self.consume_statement_end()?;
        match target {
            Some(DeclTarget::Local(_)) | None if !self.unit_mut().is_module() => {
                // local already holds its value on the stack slot it was
                // pushed into; nothing further to emit.
            }
            _ => {
                self.module_define(&name, true, line)?;
            }
        }
        Ok(())
    }

    fn consume_statement_end(&mut self) -> CompileResult<()> {
        // Newline-insensitive grammar: statements are terminated by
        // falling out of the expression, mirroring the source grammar's
        // lack of a mandatory statement terminator token.
        Ok(())
    }

    fn define_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        self.consume(TokenKind::Id, "expected function name")?;
        let name = self.previous.lexeme.clone();
        let arity = self.compile_function_body(UnitKind::Function)?;
        if arity > MAX_CALL_ARGS as u32 {
            return Err(self.error("too many parameters"));
        }
        if self.unit_mut().is_module() {
            self.module_define(&name, true, line)?;
        } else {
            let idx = self
                .unit_mut()
                .add_local(&name)
                .map_err(|msg| CompileError { loc: SourceLoc::new(self.file.clone(), line), message: msg })?;
            let _ = idx;
        }
        Ok(())
    }

    /// Parses `(params) { body }` and emits `CreateClosure`, leaving the
    /// new closure on the stack. Returns the declared arity.
    fn compile_function_body(&mut self, kind: UnitKind) -> CompileResult<u32> {
        self.consume(TokenKind::LeftParen, "expected '(' before parameter list")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                self.consume(TokenKind::Id, "expected parameter name")?;
                params.push(self.previous.lexeme.clone());
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' after parameter list")?;
        self.consume(TokenKind::LeftBrace, "expected '{' before function body")?;
        self.push_function_unit(kind, &params)?;
        self.block()?;
        self.finish_function_unit()
    }

    /// Parses a trailing block argument: `{ [|params|] body }`.
    fn compile_block_argument(&mut self) -> CompileResult<u32> {
        self.consume(TokenKind::LeftBrace, "expected '{' to start block argument")?;
        let mut params = Vec::new();
        if self.match_tok(TokenKind::Pipe)? {
            if !self.check(TokenKind::Pipe) {
                loop {
                    self.consume(TokenKind::Id, "expected parameter name")?;
                    params.push(self.previous.lexeme.clone());
                    if !self.match_tok(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.consume(TokenKind::Pipe, "expected closing '|' after block parameters")?;
        }
        self.push_function_unit(UnitKind::Function, &params)?;
        self.block()?;
        self.finish_function_unit()
    }

    fn push_function_unit(&mut self, kind: UnitKind, params: &[String]) -> CompileResult<()> {
        let mut unit = CompileUnit::new_function(kind);
        for p in params {
            unit.add_local(p).map_err(|m| self.error(m))?;
        }
        unit.arity = params.len() as u32;
        self.units.push(unit);
        Ok(())
    }

    /// Finishes the innermost function unit: emits an implicit
    /// `PushNull; Return` fallthrough, bakes the `Fn`, and emits
    /// `CreateClosure` plus its upvalue descriptor bytes in the now
    /// again-current (enclosing) unit. Returns the arity.
    fn finish_function_unit(&mut self) -> CompileResult<u32> {
        let line = self.line();
        self.unit_mut().builder.emit(Opcode::PushNull, line);
        self.unit_mut().builder.emit(Opcode::Return, line);
        let unit = self.units.pop().unwrap();
        let arity = unit.arity;
        let upvalues = unit.upvalues.clone();
        let fn_id = self.bake_fn(unit, arity, "<fn>");
        let idx = self.unit_mut().builder.add_constant(Value::Obj(fn_id));
        self.unit_mut().builder.emit(Opcode::CreateClosure, line);
        self.unit_mut().builder.emit_u16(idx);
        for uv in upvalues {
            self.unit_mut().builder.emit_u8(uv.is_enclosing_local as u8);
            self.unit_mut().builder.emit_u8(uv.index);
        }
        Ok(arity)
    }

    fn if_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        self.consume(TokenKind::LeftParen, "expected '(' after 'if'")?;
        self.expression(BindPower::Lowest)?;
        self.consume(TokenKind::RightParen, "expected ')' after condition")?;
        let then_jump = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse, line);
        self.statement()?;
        if self.match_tok(TokenKind::Else)? {
            let else_jump = self.unit_mut().builder.emit_jump(Opcode::Jump, line);
            self.unit_mut().builder.patch_jump(then_jump);
            self.statement()?;
            self.unit_mut().builder.patch_jump(else_jump);
        } else {
            self.unit_mut().builder.patch_jump(then_jump);
        }
        Ok(())
    }

    fn while_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        let condition_start = self.unit_mut().builder.current_offset();
        self.consume(TokenKind::LeftParen, "expected '(' after 'while'")?;
        self.expression(BindPower::Lowest)?;
        self.consume(TokenKind::RightParen, "expected ')' after condition")?;
        let exit_jump = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse, line);
        let scope_depth = self.unit_mut().scope_depth;
        self.unit_mut().loops.push(LoopState { condition_start, body_start: 0, scope_depth });
        self.statement()?;
        self.unit_mut().builder.emit_loop(condition_start, line);
        self.unit_mut().builder.patch_jump(exit_jump);
        let body_end = self.unit_mut().builder.current_offset();
        let loop_state_start = exit_jump + 2;
        self.rewrite_break_placeholders(loop_state_start, body_end, body_end);
        self.unit_mut().loops.pop();
        Ok(())
    }

    /// `break` is compiled as `Placeholder` (not a real `Jump`, since the
    /// post-loop offset isn't known while the body is still being
    /// compiled); once the loop's exit point is known, every
    /// `Placeholder` written in the body range is rewritten to `Jump`
    /// targeting it. Kept distinct from `End` per the documented
    /// decision so disassembly of the stream terminator is unambiguous.
    fn rewrite_break_placeholders(&mut self, start: usize, end: usize, target: usize) {
        let unit = self.unit_mut();
        let mut i = start;
        while i < end {
            let op = Opcode::from_byte(unit.builder.bytecode[i]);
            let len = op.map(|o| o.operand_len()).unwrap_or(0) as usize;
            if op == Some(Opcode::Placeholder) {
                unit.builder.bytecode[i] = Opcode::Jump.as_byte();
                let offset = (target - (i + 1 + 2)) as u16;
                unit.builder.bytecode[i + 1..i + 3].copy_from_slice(&offset.to_be_bytes());
            }
            i += 1 + len;
        }
    }

    fn for_statement(&mut self) -> CompileResult<()> {
        // `for (id in iterable) body` — desugars to a `while` driving an
        // index-based sequence walk via `iterate`/`iteratorValue`, the
        // iteration protocol every sequence core class implements.
        let line = self.line();
        self.consume(TokenKind::LeftParen, "expected '(' after 'for'")?;
        self.consume(TokenKind::Id, "expected loop variable name")?;
        let loop_var = self.previous.lexeme.clone();
        self.consume(TokenKind::Is, "expected 'is' in for-loop header")?;
        self.expression(BindPower::Lowest)?;
        self.consume(TokenKind::RightParen, "expected ')' after for-loop header")?;

        self.begin_scope();
        let seq_idx = self.unit_mut().add_local("seq ").map_err(|m| self.error(m))?;
        self.unit_mut().builder.emit(Opcode::PushNull, line);
        let iter_idx = self.unit_mut().add_local("iter ").map_err(|m| self.error(m))?;
        let _ = (seq_idx, iter_idx);

        let condition_start = self.unit_mut().builder.current_offset();
        self.load_local(seq_idx, line);
        self.load_local(iter_idx, line);
        self.emit_call_by_signature(&Signature::method("iterate", 1), Opcode::Call0, line)?;
        self.store_local(iter_idx, line);
        self.unit_mut().builder.emit(Opcode::Pop, line);
        self.load_local(iter_idx, line);
        let exit_jump = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse, line);

        self.begin_scope();
        let var_idx = self.unit_mut().add_local(&loop_var).map_err(|m| self.error(m))?;
        self.load_local(seq_idx, line);
        self.load_local(iter_idx, line);
        self.emit_call_by_signature(&Signature::method("iteratorValue", 1), Opcode::Call0, line)?;
        self.store_local(var_idx, line);
        self.unit_mut().builder.emit(Opcode::Pop, line);

        let scope_depth = self.unit_mut().scope_depth;
        self.unit_mut().loops.push(LoopState { condition_start, body_start: 0, scope_depth });
        self.statement()?;
        self.unit_mut().loops.pop();
        self.end_scope();

        self.unit_mut().builder.emit_loop(condition_start, line);
        self.unit_mut().builder.patch_jump(exit_jump);
        let body_end = self.unit_mut().builder.current_offset();
        self.rewrite_break_placeholders(exit_jump + 2, body_end, body_end);
        self.end_scope();
        Ok(())
    }

    fn load_local(&mut self, idx: usize, line: u32) {
        self.unit_mut().builder.emit(Opcode::LoadLocalVar, line);
        self.unit_mut().builder.emit_u8(idx as u8);
    }

    fn store_local(&mut self, idx: usize, line: u32) {
        self.unit_mut().builder.emit(Opcode::StoreLocalVar, line);
        self.unit_mut().builder.emit_u8(idx as u8);
    }

    fn break_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        let Some(loop_state) = self.unit_mut().loops.last() else {
            return Err(self.error("'break' outside a loop"));
        };
        let target_depth = loop_state.scope_depth;
        self.unit_mut().discard_locals_above(target_depth, line);
        self.unit_mut().builder.emit(Opcode::Placeholder, line);
        self.unit_mut().builder.emit_u16(0);
        Ok(())
    }

    fn continue_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        let Some(loop_state) = self.unit_mut().loops.last() else {
            return Err(self.error("'continue' outside a loop"));
        };
        let (target_depth, condition_start) = (loop_state.scope_depth, loop_state.condition_start);
        self.unit_mut().discard_locals_above(target_depth, line);
        self.unit_mut().builder.emit_loop(condition_start, line);
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        if self.check(TokenKind::RightBrace) || self.check(TokenKind::Eof) {
            self.unit_mut().builder.emit(Opcode::PushNull, line);
        } else {
            self.expression(BindPower::Lowest)?;
        }
        self.unit_mut().builder.emit(Opcode::Return, line);
        Ok(())
    }

    fn import_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        self.consume(TokenKind::String, "expected module name string after 'import'")?;
        let name = self.previous.lexeme.clone();
        let idx = self.unit_mut().builder.add_constant(Value::Obj(self.heap().allocate(
            None,
            HeapObject::String(crate::heap::StoveString::new(name.into_bytes())),
        )));
        self.unit_mut().builder.emit(Opcode::LoadConstant, line);
        self.unit_mut().builder.emit_u16(idx);
        // The pushed module-name string is itself the receiver: `import_`
        // is a zero-arg method on `String`, not a one-arg call on it.
        let sig = Signature::method("import_", 0);
        self.emit_call_by_signature(&sig, Opcode::Call0, line)?;
        self.unit_mut().builder.emit(Opcode::Pop, line);
        Ok(())
    }

    fn expression_statement(&mut self) -> CompileResult<()> {
        self.expression(BindPower::Lowest)?;
        let line = self.line();
        self.unit_mut().builder.emit(Opcode::Pop, line);
        Ok(())
    }

    // --- classes ---------------------------------------------------

    fn class_statement(&mut self) -> CompileResult<()> {
        let line = self.line();
        self.consume(TokenKind::Id, "expected class name")?;
        let class_name = self.previous.lexeme.clone();

        let super_line = self.line();
        if self.match_tok(TokenKind::Less)? {
            self.consume(TokenKind::Id, "expected superclass name")?;
            let super_name = self.previous.lexeme.clone();
            self.load_variable(&super_name, super_line)?;
        } else {
            self.load_variable("Object", super_line)?;
        }

        self.class_stack.push(ClassBookkeeping {
            name: class_name.clone(),
            field_names: Vec::new(),
            static_field_names: Vec::new(),
            in_static: false,
            current_signature: None,
        });

        let class_name_string_idx = self.unit_mut().builder.add_constant(Value::Obj(self.heap().allocate(
            None,
            HeapObject::String(crate::heap::StoveString::new(class_name.clone().into_bytes())),
        )));
        self.unit_mut().builder.emit(Opcode::LoadConstant, line);
        self.unit_mut().builder.emit_u16(class_name_string_idx);

        self.consume(TokenKind::LeftBrace, "expected '{' to start class body")?;
        let mut methods: Vec<(u32, crate::heap::HeapId, bool)> = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.class_member(&mut methods)?;
        }
        self.consume(TokenKind::RightBrace, "expected '}' to close class body")?;

        let field_count = self.class_stack.last().unwrap().field_names.len();
        if field_count > crate::compiler::unit::MAX_FIELDS {
            return Err(self.error(format!("class has too many fields (max {})", crate::compiler::unit::MAX_FIELDS)));
        }
        self.unit_mut().builder.emit(Opcode::CreateClass, line);
        self.unit_mut().builder.emit_u8(field_count as u8);

        for (symbol, closure_fn, is_static) in methods {
            let idx = self.unit_mut().builder.add_constant(Value::Obj(closure_fn));
            self.unit_mut().builder.emit(Opcode::LoadConstant, line);
            self.unit_mut().builder.emit_u16(idx);
            let op = if is_static { Opcode::StaticMethod } else { Opcode::InstanceMethod };
            self.unit_mut().builder.emit(op, line);
            self.unit_mut().builder.emit_u16(symbol as u16);
        }

        self.class_stack.pop();
        self.module_define(&class_name, true, line)
    }

    fn class_member(
        &mut self,
        methods: &mut Vec<(u32, crate::heap::HeapId, bool)>,
    ) -> CompileResult<()> {
        if self.match_tok(TokenKind::Static)? {
            self.class_stack.last_mut().unwrap().in_static = true;
            if self.match_tok(TokenKind::Var)? {
                self.consume(TokenKind::Id, "expected field name")?;
                let name = self.previous.lexeme.clone();
                self.class_stack.last_mut().unwrap().static_field_names.push(name);
                self.class_stack.last_mut().unwrap().in_static = false;
                return Ok(());
            }
            self.compile_method(methods, true)?;
            self.class_stack.last_mut().unwrap().in_static = false;
            return Ok(());
        }
        if self.match_tok(TokenKind::Var)? {
            self.consume(TokenKind::Id, "expected field name")?;
            let name = self.previous.lexeme.clone();
            if self.class_stack.last().unwrap().field_names.len() >= crate::compiler::unit::MAX_FIELDS {
                return Err(self.error("too many instance fields"));
            }
            self.class_stack.last_mut().unwrap().field_names.push(name);
            return Ok(());
        }
        self.compile_method(methods, false)
    }

    fn compile_method(
        &mut self,
        methods: &mut Vec<(u32, crate::heap::HeapId, bool)>,
        is_static: bool,
    ) -> CompileResult<()> {
        let sig = self.parse_method_signature()?;
        let symbol_text = sig.to_symbol_text();
        let symbol = self.intern(&symbol_text);
        self.class_stack.last_mut().unwrap().current_signature = Some(symbol_text);

        self.consume(TokenKind::LeftBrace, "expected '{' to start method body")?;
        self.push_method_unit(&sig)?;
        self.block()?;
        let line = self.line();
        self.unit_mut().builder.emit(Opcode::PushNull, line);
        self.unit_mut().builder.emit(Opcode::Return, line);
        let unit = self.units.pop().unwrap();
        let upvalues = unit.upvalues.clone();
        let fn_id = self.bake_fn(unit, sig.arity as u32, &symbol_text);
        let closure_id = self.wrap_closure(fn_id, &upvalues);
        methods.push((symbol, closure_id, is_static));
        Ok(())
    }

    /// Bakes a closure object directly (used for methods, where the
    /// `CreateClosure` opcode form doesn't apply — the closure becomes a
    /// constant consumed by `InstanceMethod`/`StaticMethod`, not pushed
    /// by the surrounding bytecode stream).
    fn wrap_closure(&mut self, fn_id: crate::heap::HeapId, upvalues: &[crate::compiler::unit::UpvalueDesc]) -> crate::heap::HeapId {
        let _ = upvalues;
        self.heap().allocate(None, HeapObject::Closure(crate::heap::ClosureObj { fn_id, upvalues: Vec::new() }))
    }

    fn push_method_unit(&mut self, sig: &Signature) -> CompileResult<()> {
        let is_static = self.class_stack.last().unwrap().in_static;
        let mut unit = CompileUnit::new_function(UnitKind::Method { is_static });
        self.consume(TokenKind::LeftParen, "expected '(' before parameter list")?;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.consume(TokenKind::Id, "expected parameter name")?;
                unit.add_local(self.previous.lexeme.clone()).map_err(|m| self.error(m))?;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' after parameter list")?;
        unit.arity = sig.arity as u32;
        self.units.push(unit);
        Ok(())
    }

    /// Parses the trailing shape of a method declaration: identifier
    /// methods follow the `new`/setter/method/getter dispatch rule;
    /// everything else is an operator signature (always arity 1, except
    /// unary `-`/`!`/`~` which are getters unless `(` follows).
    fn parse_method_signature(&mut self) -> CompileResult<Signature> {
        if self.match_tok(TokenKind::LeftBracket)? {
            let mut arity = 0u8;
            if !self.check(TokenKind::RightBracket) {
                loop {
                    self.consume(TokenKind::Id, "expected subscript parameter")?;
                    arity += 1;
                    if !self.match_tok(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RightBracket, "expected ']' after subscript parameters")?;
            if self.match_tok(TokenKind::Assign)? {
                self.consume(TokenKind::LeftParen, "expected '(' in subscript setter")?;
                self.consume(TokenKind::Id, "expected subscript setter value parameter")?;
                self.consume(TokenKind::RightParen, "expected ')' after subscript setter parameter")?;
                return Ok(Signature::subscript_setter(arity + 1));
            }
            return Ok(Signature::subscript(arity));
        }

        if self.check(TokenKind::Id) {
            self.advance()?;
            let name = self.previous.lexeme.clone();
            if name == "new" {
                self.consume(TokenKind::LeftParen, "constructor 'new' must be followed by '('")?;
                let arity = self.parse_param_names()?;
                self.consume(TokenKind::RightParen, "expected ')' after constructor parameters")?;
                return Ok(Signature::constructor(name, arity));
            }
            if self.match_tok(TokenKind::Assign)? {
                self.consume(TokenKind::LeftParen, "expected '(' in setter declaration")?;
                self.consume(TokenKind::Id, "expected setter value parameter")?;
                self.consume(TokenKind::RightParen, "expected ')' after setter parameter")?;
                return Ok(Signature::setter(name));
            }
            if self.check(TokenKind::LeftParen) {
                self.advance()?;
                let arity = self.parse_param_names()?;
                self.consume(TokenKind::RightParen, "expected ')' after method parameters")?;
                return Ok(Signature::method(name, arity));
            }
            return Ok(Signature::getter(name));
        }

        // Operator method: the current token is the operator itself.
        self.advance()?;
        let name = self.previous.lexeme.clone();
        let is_minus = matches!(self.previous.kind, TokenKind::Minus);
        if matches!(self.previous.kind, TokenKind::Bang | TokenKind::Tilde) && !self.check(TokenKind::LeftParen) {
            return Ok(Signature::getter(name));
        }
        if is_minus && !self.check(TokenKind::LeftParen) {
            return Ok(Signature::getter(name));
        }
        self.consume(TokenKind::LeftParen, "expected '(' after operator method name")?;
        self.consume(TokenKind::Id, "expected operand parameter name")?;
        self.consume(TokenKind::RightParen, "expected ')' after operator parameter")?;
        Ok(Signature::method(name, 1))
    }

    fn parse_param_names(&mut self) -> CompileResult<u8> {
        let mut arity = 0u8;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.consume(TokenKind::Id, "expected parameter name")?;
                arity += 1;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        Ok(arity)
    }

    // --- expressions -------------------------------------------------

    fn expression(&mut self, rbp: BindPower) -> CompileResult<()> {
        let can_assign = rbp <= BindPower::Assign;
        self.advance()?;
        self.nud(can_assign)?;
        while lbp(self.current.kind) > rbp {
            self.advance()?;
            self.led(can_assign)?;
        }
        Ok(())
    }

    fn nud(&mut self, can_assign: bool) -> CompileResult<()> {
        let line = self.previous.line;
        match self.previous.kind {
            TokenKind::Num => {
                let value = self.previous.value.unwrap();
                self.unit_mut().builder.emit_constant(value, line);
                Ok(())
            }
            TokenKind::String => {
                let bytes = self.previous.lexeme.clone().into_bytes();
                let id = self.heap().allocate(None, HeapObject::String(crate::heap::StoveString::new(bytes)));
                self.unit_mut().builder.emit_constant(Value::Obj(id), line);
                Ok(())
            }
            TokenKind::Interpolation => self.interpolation_nud(line),
            TokenKind::True => {
                self.unit_mut().builder.emit(Opcode::PushTrue, line);
                Ok(())
            }
            TokenKind::False => {
                self.unit_mut().builder.emit(Opcode::PushFalse, line);
                Ok(())
            }
            TokenKind::Null => {
                self.unit_mut().builder.emit(Opcode::PushNull, line);
                Ok(())
            }
            TokenKind::Id => self.id_nud(can_assign),
            TokenKind::Self_ => {
                self.load_local(0, line);
                Ok(())
            }
            TokenKind::Super => self.super_nud(),
            TokenKind::LeftParen => {
                self.expression(BindPower::Lowest)?;
                self.consume(TokenKind::RightParen, "expected ')' after expression")
            }
            TokenKind::LeftBracket => self.list_literal_nud(line),
            TokenKind::LeftBrace => self.map_literal_nud(line),
            TokenKind::Minus | TokenKind::Bang | TokenKind::Tilde => self.unary_nud(line),
            other => Err(self.error(format!("unexpected token {other:?} in expression position"))),
        }
    }

    fn unary_nud(&mut self, line: u32) -> CompileResult<()> {
        let op_name = self.previous.lexeme_or_symbol();
        self.expression(BindPower::Unary)?;
        let sig = Signature::getter(op_name);
        self.emit_call_by_signature(&sig, Opcode::Call0, line)
    }

    fn interpolation_nud(&mut self, line: u32) -> CompileResult<()> {
        // `List.new()` then repeated `addCore_(segment); addCore_(expr)`
        // finally `join()`, per the Open-Question-2 decision to
        // standardize on the uppercase `List` module variable uniformly.
        self.load_variable("List", line)?;
        self.emit_call_by_signature(&Signature::method("new", 0), Opcode::Call0, line)?;
        loop {
            let segment = self.previous.lexeme.clone().into_bytes();
            let seg_id = self.heap().allocate(None, HeapObject::String(crate::heap::StoveString::new(segment)));
            self.unit_mut().builder.emit_constant(Value::Obj(seg_id), line);
            self.emit_call_by_signature(&Signature::method("addCore_", 1), Opcode::Call0, line)?;
            self.expression(BindPower::Lowest)?;
            self.emit_call_by_signature(&Signature::method("addCore_", 1), Opcode::Call0, line)?;
            if self.lexer.interpolation_depth() == 0 {
                self.consume(TokenKind::RightParen, "expected ')' to close interpolation expression")?;
            }
            let tail = self.lexer.resume_interpolation().map_err(|e| CompileError { loc: e.loc, message: e.message })?;
            let is_more = tail.kind == TokenKind::Interpolation;
            self.previous = tail;
            if !is_more {
                let segment = self.previous.lexeme.clone().into_bytes();
                let seg_id = self.heap().allocate(None, HeapObject::String(crate::heap::StoveString::new(segment)));
                self.unit_mut().builder.emit_constant(Value::Obj(seg_id), line);
                self.emit_call_by_signature(&Signature::method("addCore_", 1), Opcode::Call0, line)?;
                break;
            }
        }
        self.emit_call_by_signature(&Signature::method("join", 0), Opcode::Call0, line)?;
        self.advance()
    }

    fn list_literal_nud(&mut self, line: u32) -> CompileResult<()> {
        self.load_variable("List", line)?;
        self.emit_call_by_signature(&Signature::method("new", 0), Opcode::Call0, line)?;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression(BindPower::Assign)?;
                self.emit_call_by_signature(&Signature::method("addCore_", 1), Opcode::Call0, line)?;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "expected ']' to close list literal")
    }

    fn map_literal_nud(&mut self, line: u32) -> CompileResult<()> {
        self.load_variable("Map", line)?;
        self.emit_call_by_signature(&Signature::method("new", 0), Opcode::Call0, line)?;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.expression(BindPower::Assign)?;
                self.consume(TokenKind::Colon, "expected ':' between map key and value")?;
                self.expression(BindPower::Assign)?;
                self.emit_call_by_signature(&Signature::method("addCore_", 2), Opcode::Call0, line)?;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "expected '}' to close map literal")
    }

    fn super_nud(&mut self) -> CompileResult<()> {
        let line = self.previous.line;
        if self.class_stack.is_empty() {
            return Err(self.error("'super' used outside a class"));
        }
        self.load_local(0, line);
        if self.match_tok(TokenKind::Dot)? {
            self.consume(TokenKind::Id, "expected method name after 'super.'")?;
            let name = self.previous.lexeme.clone();
            let (sig, argc) = self.parse_call_trailer_for_name(name)?;
            self.emit_call_by_signature(&sig, Opcode::super_for_arity(argc), line)?;
            self.reserve_super_constant_slot();
        } else {
            self.consume(TokenKind::LeftParen, "expected '(' or '.' after 'super'")?;
            let current_sig = self.class_stack.last().unwrap().current_signature.clone();
            let argc = self.parse_call_args()?;
            let name = current_sig.unwrap_or_default();
            let sig = Signature { kind: SignatureKind::Method, name, arity: argc };
            let symbol_text = sig.to_symbol_text();
            let symbol = self.intern(&symbol_text);
            self.unit_mut().builder.emit(Opcode::super_for_arity(argc), line);
            self.unit_mut().builder.emit_u16(symbol as u16);
            self.reserve_super_constant_slot();
        }
        Ok(())
    }

    /// `Super0..16`'s extra 2-byte operand reserves a constant-pool slot
    /// (filled `Null`) that the VM's class-finalization pass patches
    /// with the actual resolved superclass once the enclosing `class`
    /// statement's `CreateClass` has run.
    fn reserve_super_constant_slot(&mut self) {
        let idx = self.unit_mut().builder.add_constant(Value::Null);
        self.unit_mut().builder.emit_u16(idx);
    }

    fn id_nud(&mut self, can_assign: bool) -> CompileResult<()> {
        let line = self.previous.line;
        let name = self.previous.lexeme.clone();

        if let Some(local_idx) = self.unit_mut().find_local(&name) {
            return self.finish_variable_access(VarSlot::Local(local_idx), can_assign, line);
        }
        if let Some(uv_idx) = self.resolve_upvalue(self.units.len() - 1, &name)? {
            return self.finish_variable_access(VarSlot::Upvalue(uv_idx), can_assign, line);
        }
        if !self.class_stack.is_empty() {
            if let Some(field_idx) = self.class_stack.last().unwrap().field_names.iter().position(|f| f == &name) {
                return self.finish_variable_access(VarSlot::Field(field_idx), can_assign, line);
            }
            let static_name = format!("Cls{} {}", self.class_stack.last().unwrap().name, name);
            if self.class_stack.last().unwrap().static_field_names.contains(&name) {
                return self.finish_variable_access_module(&static_name, can_assign, line);
            }
            if name.chars().next().is_some_and(|c| c.is_lowercase()) && self.check(TokenKind::LeftParen) {
                self.load_local(0, line);
                self.advance()?;
                let argc = self.parse_call_args()?;
                let sig = Signature::method(name, argc);
                return self.emit_call_by_signature(&sig, Opcode::Call0, line);
            }
        }
        self.finish_variable_access_module(&name, can_assign, line)
    }

    fn finish_variable_access_module(&mut self, name: &str, can_assign: bool, line: u32) -> CompileResult<()> {
        if self.check(TokenKind::LeftParen) {
            // Uniform call-sugar: `name(args)` on a value bound to a
            // module variable dispatches through `call(...)` (the
            // `FnCall` method kind every closure's class installs).
            self.load_variable(name, line)?;
            self.advance()?;
            let argc = self.parse_call_args()?;
            let sig = Signature::method("call", argc);
            return self.emit_call_by_signature(&sig, Opcode::Call0, line);
        }
        let idx = self.module_find_or_forward(name)?;
        if can_assign && self.check(TokenKind::Assign) {
            self.advance()?;
            self.expression(BindPower::Assign)?;
            self.unit_mut().builder.emit(Opcode::StoreModuleVar, line);
            self.unit_mut().builder.emit_u16(idx as u16);
        } else {
            self.unit_mut().builder.emit(Opcode::LoadModuleVar, line);
            self.unit_mut().builder.emit_u16(idx as u16);
        }
        Ok(())
    }

    fn load_variable(&mut self, name: &str, line: u32) -> CompileResult<()> {
        if let Some(local_idx) = self.unit_mut().find_local(name) {
            self.load_local(local_idx, line);
            return Ok(());
        }
        if let Some(uv_idx) = self.resolve_upvalue(self.units.len() - 1, name)? {
            self.unit_mut().builder.emit(Opcode::LoadUpvalue, line);
            self.unit_mut().builder.emit_u8(uv_idx);
            return Ok(());
        }
        let idx = self.module_find_or_forward(name)?;
        self.unit_mut().builder.emit(Opcode::LoadModuleVar, line);
        self.unit_mut().builder.emit_u16(idx as u16);
        Ok(())
    }

    fn finish_variable_access(&mut self, slot: VarSlot, can_assign: bool, line: u32) -> CompileResult<()> {
        let wants_assign = can_assign && self.check(TokenKind::Assign);
        if wants_assign {
            self.advance()?;
            self.expression(BindPower::Assign)?;
        }
        match slot {
            VarSlot::Local(idx) => {
                if wants_assign {
                    self.store_local(idx, line);
                } else {
                    self.load_local(idx, line);
                }
            }
            VarSlot::Upvalue(idx) => {
                let op = if wants_assign { Opcode::StoreUpvalue } else { Opcode::LoadUpvalue };
                self.unit_mut().builder.emit(op, line);
                self.unit_mut().builder.emit_u8(idx);
            }
            VarSlot::Field(idx) => {
                let op = if wants_assign { Opcode::StoreSelfField } else { Opcode::LoadSelfField };
                self.unit_mut().builder.emit(op, line);
                self.unit_mut().builder.emit_u8(idx as u8);
            }
        }
        Ok(())
    }

    /// Upvalue resolution recursion. Method boundaries block capture for
    /// identifiers without an internal space — static-field synthetic
    /// names (`Cls<Name> <Field>`) contain a space and are therefore the
    /// one case allowed through, matching the source's deliberate
    /// capture restriction.
    fn resolve_upvalue(&mut self, unit_index: usize, name: &str) -> CompileResult<Option<u8>> {
        if unit_index == 0 {
            return Ok(None);
        }
        let parent_index = unit_index - 1;
        let crosses_method_boundary = matches!(self.units[unit_index].kind, UnitKind::Method { .. });
        if crosses_method_boundary && !name.contains(' ') {
            return Ok(None);
        }
        if let Some(local_idx) = self.units[parent_index].find_local(name) {
            self.units[parent_index].locals[local_idx].is_captured = true;
            let uv_idx = self.units[unit_index].add_upvalue(true, local_idx as u8);
            return Ok(Some(uv_idx));
        }
        if let Some(outer_uv) = self.resolve_upvalue(parent_index, name)? {
            let uv_idx = self.units[unit_index].add_upvalue(false, outer_uv);
            return Ok(Some(uv_idx));
        }
        Ok(None)
    }

    fn led(&mut self, can_assign: bool) -> CompileResult<()> {
        let line = self.previous.line;
        match self.previous.kind {
            TokenKind::Dot => self.dot_led(can_assign, line),
            TokenKind::LeftBracket => self.subscript_led(can_assign, line),
            TokenKind::LeftParen => {
                // Grouping already consumed in `nud`; a `(` in `led`
                // position only arises from the call-sugar path, which
                // is handled inline within `id_nud`/module access.
                Err(self.error("unexpected '(' "))
            }
            TokenKind::Question => self.ternary_led(line),
            TokenKind::AmpAmp => self.logical_led(Opcode::And, BindPower::LogicAnd, line),
            TokenKind::PipePipe => self.logical_led(Opcode::Or, BindPower::LogicOr, line),
            TokenKind::DotDot => self.infix_operator_led(BindPower::Range, line),
            TokenKind::Is => self.infix_operator_led(BindPower::Is, line),
            _ => self.infix_operator_led(lbp(self.previous.kind), line),
        }
    }

    fn infix_operator_led(&mut self, bp: BindPower, line: u32) -> CompileResult<()> {
        let op_name = self.previous.lexeme_or_symbol();
        self.expression(bp)?;
        let sig = Signature::method(op_name, 1);
        self.emit_call_by_signature(&sig, Opcode::Call0, line)
    }

    fn logical_led(&mut self, op: Opcode, bp: BindPower, line: u32) -> CompileResult<()> {
        let jump = self.unit_mut().builder.emit_jump(op, line);
        self.unit_mut().builder.emit(Opcode::Pop, line);
        self.expression(bp)?;
        self.unit_mut().builder.patch_jump(jump);
        Ok(())
    }

    fn ternary_led(&mut self, line: u32) -> CompileResult<()> {
        let else_jump = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse, line);
        self.expression(BindPower::Assign)?;
        self.consume(TokenKind::Colon, "expected ':' in ternary expression")?;
        let end_jump = self.unit_mut().builder.emit_jump(Opcode::Jump, line);
        self.unit_mut().builder.patch_jump(else_jump);
        self.expression(BindPower::Cond)?;
        self.unit_mut().builder.patch_jump(end_jump);
        Ok(())
    }

    fn dot_led(&mut self, can_assign: bool, line: u32) -> CompileResult<()> {
        self.consume(TokenKind::Id, "expected member name after '.'")?;
        let name = self.previous.lexeme.clone();
        if can_assign && self.check(TokenKind::Assign) {
            self.advance()?;
            self.expression(BindPower::Assign)?;
            let sig = Signature::setter(name);
            return self.emit_call_by_signature(&sig, Opcode::Call0, line);
        }
        if self.check(TokenKind::LeftParen) {
            self.advance()?;
            let argc = self.parse_call_args()?;
            let sig = Signature::method(name, argc);
            return self.emit_call_by_signature(&sig, Opcode::Call0, line);
        }
        let sig = Signature::getter(name);
        self.emit_call_by_signature(&sig, Opcode::Call0, line)
    }

    fn subscript_led(&mut self, can_assign: bool, line: u32) -> CompileResult<()> {
        let mut argc = 0u8;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression(BindPower::Assign)?;
                argc += 1;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "expected ']' after subscript")?;
        if can_assign && self.check(TokenKind::Assign) {
            self.advance()?;
            self.expression(BindPower::Assign)?;
            let sig = Signature::subscript_setter(argc + 1);
            return self.emit_call_by_signature(&sig, Opcode::Call0, line);
        }
        let sig = Signature::subscript(argc);
        self.emit_call_by_signature(&sig, Opcode::Call0, line)
    }

    fn parse_call_trailer_for_name(&mut self, name: String) -> CompileResult<(Signature, u8)> {
        if self.check(TokenKind::LeftParen) {
            self.advance()?;
            let argc = self.parse_call_args()?;
            Ok((Signature::method(name, argc), argc))
        } else {
            Ok((Signature::getter(name), 0))
        }
    }

    fn parse_call_args(&mut self) -> CompileResult<u8> {
        let mut argc = 0u8;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(BindPower::Assign)?;
                argc += 1;
                if !self.match_tok(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' after call arguments")?;
        if self.check(TokenKind::LeftBrace) {
            self.compile_block_argument()?;
            argc += 1;
        }
        if argc as u32 > MAX_CALL_ARGS as u32 {
            return Err(self.error(format!("too many call arguments (max {MAX_CALL_ARGS})")));
        }
        Ok(argc)
    }

    /// Ensures the signature's symbol is interned, then emits
    /// `baseOpcode + argc` plus the 2-byte method symbol id (and, for
    /// `Super*`, the already-reserved constant slot handled by the
    /// caller).
    fn emit_call_by_signature(&mut self, sig: &Signature, base: Opcode, line: u32) -> CompileResult<()> {
        let symbol_text = sig.to_symbol_text();
        let symbol = self.intern(&symbol_text);
        let op = if base == Opcode::Call0 {
            Opcode::call_for_arity(sig.arity)
        } else {
            base
        };
        self.unit_mut().builder.emit(op, line);
        self.unit_mut().builder.emit_u16(symbol as u16);
        Ok(())
    }
}

enum VarSlot {
    Local(usize),
    Upvalue(u8),
    Field(usize),
}

enum DeclTarget {
    Module,
    Local(usize),
}

impl Token {
    /// For operator tokens, the textual operator used both as a method
    /// name and, for unary forms, the getter symbol.
    fn lexeme_or_symbol(&self) -> String {
        use TokenKind::*;
        match self.kind {
            Plus => "+".to_string(),
            Minus => "-".to_string(),
            Star => "*".to_string(),
            Slash => "/".to_string(),
            Percent => "%".to_string(),
            Amp => "&".to_string(),
            Pipe => "|".to_string(),
            Tilde => "~".to_string(),
            ShiftLeft => "<<".to_string(),
            ShiftRight => ">>".to_string(),
            EqEq => "==".to_string(),
            BangEq => "!=".to_string(),
            Less => "<".to_string(),
            LessEq => "<=".to_string(),
            Greater => ">".to_string(),
            GreaterEq => ">=".to_string(),
            DotDot => "..".to_string(),
            Is => "is".to_string(),
            Bang => "!".to_string(),
            _ => self.lexeme.clone(),
        }
    }
}

