//! Method signatures: the canonical textual form used as the process-wide
//! symbol-table key for dispatch, and the rules for deriving a
//! signature's `SignatureKind` from how an identifier/operator token is
//! followed in a class body.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Getter,
    Setter,
    Method,
    Constructor,
    Subscript,
    SubscriptSetter,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub arity: u8,
}

impl Signature {
    pub fn getter(name: impl Into<String>) -> Self {
        Signature { kind: SignatureKind::Getter, name: name.into(), arity: 0 }
    }

    pub fn setter(name: impl Into<String>) -> Self {
        Signature { kind: SignatureKind::Setter, name: name.into(), arity: 1 }
    }

    pub fn method(name: impl Into<String>, arity: u8) -> Self {
        Signature { kind: SignatureKind::Method, name: name.into(), arity }
    }

    pub fn constructor(name: impl Into<String>, arity: u8) -> Self {
        Signature { kind: SignatureKind::Constructor, name: name.into(), arity }
    }

    pub fn subscript(arity: u8) -> Self {
        Signature { kind: SignatureKind::Subscript, name: String::new(), arity }
    }

    pub fn subscript_setter(arity: u8) -> Self {
        Signature { kind: SignatureKind::SubscriptSetter, name: String::new(), arity }
    }

    /// The textual form used as the method-name symbol: `name`,
    /// `name=(_)`, `name(_,_,...)`, `name[_,...]`, `name[_,...]=(_)`.
    pub fn to_symbol_text(&self) -> String {
        let placeholders = |n: u8| (0..n).map(|_| "_").collect::<Vec<_>>().join(",");
        match self.kind {
            SignatureKind::Getter => self.name.clone(),
            SignatureKind::Setter => format!("{}=(_)", self.name),
            SignatureKind::Method | SignatureKind::Constructor => {
                format!("{}({})", self.name, placeholders(self.arity))
            }
            SignatureKind::Subscript => format!("[{}]", placeholders(self.arity)),
            SignatureKind::SubscriptSetter => {
                // arity includes the trailing value parameter; the index
                // parameters are arity - 1.
                let index_arity = self.arity.saturating_sub(1);
                format!("[{}]=(_)", placeholders(index_arity))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getter_symbol_is_bare_name() {
        assert_eq!(Signature::getter("count").to_symbol_text(), "count");
    }

    #[test]
    fn setter_symbol_has_assign_placeholder() {
        assert_eq!(Signature::setter("value").to_symbol_text(), "value=(_)");
    }

    #[test]
    fn method_symbol_lists_placeholders() {
        assert_eq!(Signature::method("add", 2).to_symbol_text(), "add(_,_)");
    }

    #[test]
    fn constructor_symbol_matches_method_shape() {
        assert_eq!(Signature::constructor("new", 1).to_symbol_text(), "new(_)");
    }

    #[test]
    fn subscript_symbols() {
        assert_eq!(Signature::subscript(1).to_symbol_text(), "[_]");
        assert_eq!(Signature::subscript_setter(2).to_symbol_text(), "[_]=(_)");
    }
}
