//! Process-wide method-name interning.
//!
//! Every class's method table is indexed by the same symbol id space —
//! `object.foo()` and `otherClass.foo()` both resolve `foo` to the same
//! slot number — exactly the `allMethodNames` table the original
//! implementation keeps as a single global symbol table. We scope it to
//! the `Vm` instead of a process global so multiple VMs can coexist.

use ahash::AHashMap;

#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    lookup: AHashMap<String, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { names: Vec::new(), lookup: AHashMap::new() }
    }

    /// Returns the existing id for `signature`, interning it if new.
    pub fn intern(&mut self, signature: &str) -> u32 {
        if let Some(&id) = self.lookup.get(signature) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(signature.to_string());
        self.lookup.insert(signature.to_string(), id);
        id
    }

    /// Looks up an already-interned signature without creating one.
    pub fn find(&self, signature: &str) -> Option<u32> {
        self.lookup.get(signature).copied()
    }

    pub fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
