//! Lexically scoped symbol table for the bytecode compiler.
//!
//! One table per function scope; blocks share their function's scope, so
//! a name assigned inside an `if` body stays visible afterwards (matching
//! the evaluator, where only calls create environments). Resolving a name
//! defined in an enclosing function records it as a free variable of
//! every scope between the definition and the use.

use brio_core::values::Builtin;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
    /// The name a function literal is being assigned to, resolved inside
    /// its own body for recursion (`CurrentClosure`).
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Rc<RefCell<SymbolTable>>>,
    store: HashMap<String, Symbol>,
    pub num_definitions: usize,
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new_global() -> Rc<RefCell<SymbolTable>> {
        let table = Rc::new(RefCell::new(SymbolTable::default()));
        for (index, (name, _)) in Builtin::ALL.iter().enumerate() {
            table.borrow_mut().store.insert(
                name.to_string(),
                Symbol {
                    name: name.to_string(),
                    scope: SymbolScope::Builtin,
                    index,
                },
            );
        }
        table
    }

    pub fn enclosed(outer: Rc<RefCell<SymbolTable>>) -> Rc<RefCell<SymbolTable>> {
        Rc::new(RefCell::new(SymbolTable {
            outer: Some(outer),
            ..SymbolTable::default()
        }))
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn outer(&self) -> Option<Rc<RefCell<SymbolTable>>> {
        self.outer.clone()
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(original.name, symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.outer.clone()?;
        let symbol = outer.borrow_mut().resolve(name)?;
        match symbol.scope {
            // Globals and builtins are reachable from any depth without
            // capture; anything else must ride in as a free variable.
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_globals_then_locals() {
        let global = SymbolTable::new_global();
        let a = global.borrow_mut().define("a");
        assert_eq!(a.scope, SymbolScope::Global);
        assert_eq!(a.index, 0);

        let local = SymbolTable::enclosed(global);
        let b = local.borrow_mut().define("b");
        assert_eq!(b.scope, SymbolScope::Local);
        assert_eq!(b.index, 0);
    }

    #[test]
    fn resolves_builtins_without_capture() {
        let global = SymbolTable::new_global();
        let nested = SymbolTable::enclosed(SymbolTable::enclosed(global));
        let symbol = nested.borrow_mut().resolve("print").unwrap();
        assert_eq!(symbol.scope, SymbolScope::Builtin);
        assert!(nested.borrow().free_symbols.is_empty());
    }

    #[test]
    fn captures_enclosing_locals_as_free() {
        let global = SymbolTable::new_global();
        let outer = SymbolTable::enclosed(global);
        outer.borrow_mut().define("x");
        let inner = SymbolTable::enclosed(Rc::clone(&outer));
        let symbol = inner.borrow_mut().resolve("x").unwrap();
        assert_eq!(symbol.scope, SymbolScope::Free);
        assert_eq!(symbol.index, 0);
        assert_eq!(inner.borrow().free_symbols[0].scope, SymbolScope::Local);
    }

    #[test]
    fn transitive_capture_marks_every_level() {
        let global = SymbolTable::new_global();
        let level1 = SymbolTable::enclosed(global);
        level1.borrow_mut().define("x");
        let level2 = SymbolTable::enclosed(Rc::clone(&level1));
        let level3 = SymbolTable::enclosed(Rc::clone(&level2));
        let symbol = level3.borrow_mut().resolve("x").unwrap();
        assert_eq!(symbol.scope, SymbolScope::Free);
        // The middle scope captured it on the way through.
        assert_eq!(level2.borrow().free_symbols.len(), 1);
    }

    #[test]
    fn function_name_resolves_inside_own_body() {
        let global = SymbolTable::new_global();
        let body = SymbolTable::enclosed(global);
        body.borrow_mut().define_function_name("factorial");
        let symbol = body.borrow_mut().resolve("factorial").unwrap();
        assert_eq!(symbol.scope, SymbolScope::Function);
    }
}
