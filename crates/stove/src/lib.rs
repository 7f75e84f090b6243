//! Stove: a small dynamically-typed, class-based scripting language.
//!
//! This crate is the language execution core — lexer, Pratt-parsing
//! compiler, stack-based bytecode VM with closures and cooperative
//! fibers, and a mark-and-sweep tracing garbage collector — plus the
//! built-in class bindings (`Object`, `Class`, `Bool`, `Num`, `String`,
//! `List`, `Map`, `Range`, `Null`, `Fn`, `Thread`, `System`). The
//! command-line runner and REPL live in the sibling `stove-cli` crate.

pub mod bytecode;
pub mod compiler;
pub mod core_bindings;
pub mod embed;
pub mod error;
pub mod gc;
pub mod heap;
pub mod lexer;
pub mod symbol;
pub mod value;
pub mod vm;

pub use embed::{ExecOutcome, ModuleLoader, Vm};
pub use error::StoveError;
pub use value::Value;

/// Identifiers (variable names, field names, method base names) longer
/// than this are rejected at compile time.
pub const MAX_IDENTIFIER_LEN: usize = 128;
