//! Lexical environments: a chain of name → value scopes.
//!
//! Lookup walks outward to the root. Assignment mutates the binding in the
//! scope that defined it; assignment to an unknown name creates a binding
//! in the current scope (the language has no declaration keyword). A
//! function call creates a child of the function's *captured* environment,
//! so scoping is lexical rather than dynamic.

use crate::values::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

#[derive(Debug, Clone, Default)]
pub struct Env(Rc<RefCell<Scope>>);

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Env {
        Env(Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(v) = scope.vars.get(name) {
            return Some(v.clone());
        }
        scope.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Bind in the current scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    /// Mutate the nearest scope already defining `name`. Returns false
    /// when no scope defines it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut scope = self.0.borrow_mut();
        if let Some(slot) = scope.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        match &scope.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    /// The language's assignment: update the defining scope if one exists,
    /// otherwise bind in the current scope.
    pub fn set(&self, name: &str, value: Value) {
        if !self.assign(name, value.clone()) {
            self.define(name, value);
        }
    }

    /// Identity comparison, used by tests asserting capture sharing.
    pub fn same_scope(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_walks_to_defining_scope() {
        let root = Env::new();
        root.define("x", Value::Int(1));
        let inner = root.child();
        inner.set("x", Value::Int(2));
        assert!(matches!(root.get("x"), Some(Value::Int(2))));
    }

    #[test]
    fn set_of_unknown_name_binds_locally() {
        let root = Env::new();
        let inner = root.child();
        inner.set("y", Value::Int(5));
        assert!(inner.get("y").is_some());
        assert!(root.get("y").is_none());
    }

    #[test]
    fn define_shadows_outer_binding() {
        let root = Env::new();
        root.define("x", Value::Int(1));
        let inner = root.child();
        inner.define("x", Value::Int(9));
        assert!(matches!(inner.get("x"), Some(Value::Int(9))));
        assert!(matches!(root.get("x"), Some(Value::Int(1))));
    }
}
