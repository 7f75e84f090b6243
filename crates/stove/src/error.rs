//! The four error taxa of the language: I/O, lex, compile, runtime.
//!
//! Modeled as a hand-rolled enum with manual `Display`/`Error` impls rather
//! than `thiserror`, matching the error-handling style used throughout this
//! crate's closest architectural relative (no derive-macro error crate
//! anywhere in that workspace either).

use std::fmt;

use crate::value::Value;

/// A source location used by lex and compile errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self { file: file.into(), line }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug)]
pub struct LexError {
    pub loc: SourceLoc,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] lex error: {}", self.loc, self.message)
    }
}
impl std::error::Error for LexError {}

#[derive(Debug)]
pub struct CompileError {
    pub loc: SourceLoc,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] compile error: {}", self.loc, self.message)
    }
}
impl std::error::Error for CompileError {}

/// A runtime error is whatever `Value` the aborting fiber left in its
/// `error` slot (almost always a `String`, by convention of primitive
/// methods that raise), plus the innermost frame's location if known.
#[derive(Debug)]
pub struct RuntimeError {
    pub value: Value,
    pub loc: Option<SourceLoc>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "[{loc}] runtime error: {}", self.value.debug_repr()),
            None => write!(f, "runtime error: {}", self.value.debug_repr()),
        }
    }
}
impl std::error::Error for RuntimeError {}

#[derive(Debug)]
pub enum StoveError {
    Io(std::io::Error),
    Lex(LexError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl fmt::Display for StoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoveError::Io(e) => write!(f, "I/O error: {e}"),
            StoveError::Lex(e) => write!(f, "{e}"),
            StoveError::Compile(e) => write!(f, "{e}"),
            StoveError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoveError::Io(e) => Some(e),
            StoveError::Lex(e) => Some(e),
            StoveError::Compile(e) => Some(e),
            StoveError::Runtime(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoveError {
    fn from(e: std::io::Error) -> Self {
        StoveError::Io(e)
    }
}
impl From<LexError> for StoveError {
    fn from(e: LexError) -> Self {
        StoveError::Lex(e)
    }
}
impl From<CompileError> for StoveError {
    fn from(e: CompileError) -> Self {
        StoveError::Compile(e)
    }
}
impl From<RuntimeError> for StoveError {
    fn from(e: RuntimeError) -> Self {
        StoveError::Runtime(e)
    }
}

pub type LexResult<T> = Result<T, LexError>;
pub type CompileResult<T> = Result<T, CompileError>;
pub type RunResult<T> = Result<T, RuntimeError>;
