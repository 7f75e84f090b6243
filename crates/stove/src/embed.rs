//! The embedder-facing surface: a `Vm` you construct with a
//! `ModuleLoader` and drive one `executeModule` call at a time, getting
//! back a result instead of a `Result` you're expected to unwrap.
//! `stove-cli` is itself just the first embedder of this API.

use crate::value::Value;
use crate::StoveError;

pub use crate::vm::ModuleLoader;

/// What running a module produced: either its top-level return value,
/// or an error a fiber never recovered from.
pub enum ExecOutcome {
    Success(Value),
    Error(StoveError),
}

/// Wraps `vm::Vm`, trading its `Result`-returning `execute_module` for
/// an `ExecOutcome` an embedder can match on without importing this
/// crate's internal error types.
pub struct Vm(crate::vm::Vm);

impl Vm {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        let mut inner = crate::vm::Vm::new();
        inner.loader = Some(loader);
        Vm(inner)
    }

    pub fn execute_module(&mut self, name: &str, source: &str) -> ExecOutcome {
        match self.0.execute_module(name, source) {
            Ok(value) => ExecOutcome::Success(value),
            Err(e) => ExecOutcome::Error(StoveError::from(e)),
        }
    }

    /// Escape hatch for callers that want the lower-level VM directly
    /// (the REPL, which needs `run_closure_to_completion` on a closure
    /// it compiled itself).
    pub fn inner(&mut self) -> &mut crate::vm::Vm {
        &mut self.0
    }
}
