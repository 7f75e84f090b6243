//! The compile-unit stack: one record per module/function/method/block,
//! mirroring lexical nesting, exactly as the original `CompileUnit`
//! chain does (`enclosingUnit` there is `parent` here).

use crate::bytecode::Opcode;
use crate::compiler::builder::CodeBuilder;

pub const MAX_LOCALS: usize = 128;
pub const MAX_FIELDS: usize = 128;

#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub depth: i32,
    pub is_captured: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub is_enclosing_local: bool,
    pub index: u8,
}

/// Bookkeeping for a `while`/`for` loop body, used to patch `break`
/// placeholders and to know how many locals `continue`/`break` must pop.
pub struct LoopState {
    pub condition_start: usize,
    pub body_start: usize,
    pub scope_depth: i32,
}

/// Transient per-class bookkeeping, live only while compiling a class
/// body.
pub struct ClassBookkeeping {
    pub name: String,
    pub field_names: Vec<String>,
    pub static_field_names: Vec<String>,
    pub in_static: bool,
    /// Signature text of the method currently being compiled, used by
    /// bare `super(args)` to re-dispatch the same signature.
    pub current_signature: Option<String>,
}

pub enum UnitKind {
    Module,
    Function,
    Method { is_static: bool },
}

pub struct CompileUnit {
    pub kind: UnitKind,
    pub builder: CodeBuilder,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDesc>,
    /// -1 for the module unit; 0 at a function/method's own top level.
    pub scope_depth: i32,
    pub loops: Vec<LoopState>,
    pub arity: u32,
}

impl CompileUnit {
    pub fn new_module() -> Self {
        CompileUnit {
            kind: UnitKind::Module,
            builder: CodeBuilder::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: -1,
            loops: Vec::new(),
            arity: 0,
        }
    }

    pub fn new_function(kind: UnitKind) -> Self {
        let mut unit = CompileUnit {
            kind,
            builder: CodeBuilder::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            arity: 0,
        };
        // Slot 0 is reserved: `self` for methods, anonymous for plain fns.
        let name = if matches!(unit.kind, UnitKind::Method { .. }) { "self" } else { "" };
        unit.locals.push(Local { name: name.to_string(), depth: 0, is_captured: false });
        unit
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, UnitKind::Module)
    }

    pub fn find_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|l| l.name == name)
    }

    pub fn add_local(&mut self, name: impl Into<String>) -> Result<usize, String> {
        if self.locals.len() >= MAX_LOCALS {
            return Err(format!("too many local variables in scope (max {MAX_LOCALS})"));
        }
        let name = name.into();
        if self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == self.scope_depth)
            .any(|l| l.name == name)
        {
            return Err(format!("variable '{name}' already declared in this scope"));
        }
        self.locals.push(Local { name, depth: self.scope_depth, is_captured: false });
        Ok(self.locals.len() - 1)
    }

    pub fn add_upvalue(&mut self, is_enclosing_local: bool, index: u8) -> u8 {
        if let Some(pos) = self
            .upvalues
            .iter()
            .position(|u| u.is_enclosing_local == is_enclosing_local && u.index == index)
        {
            return pos as u8;
        }
        self.upvalues.push(UpvalueDesc { is_enclosing_local, index });
        (self.upvalues.len() - 1) as u8
    }

    /// Emits `Pop`/`CloseUpvalue` for every local deeper than
    /// `target_depth`, without actually removing them from `self.locals`
    /// (the caller does that once scope bookkeeping is otherwise done).
    pub fn discard_locals_above(&mut self, target_depth: i32, line: u32) {
        for local in self.locals.iter().rev() {
            if local.depth <= target_depth {
                break;
            }
            if local.is_captured {
                self.builder.emit(Opcode::CloseUpvalue, line);
            } else {
                self.builder.emit(Opcode::Pop, line);
            }
        }
    }
}
