//! Runtime value model shared by the evaluator and the VM.
//!
//! Values are a tagged sum. Small primitives are by-value; the mutable
//! aggregates (arrays, hashes, instances, closure capture slots) are
//! shared-ownership cells, so mutations through one reference are visible
//! through every alias. Strings are immutable value-objects behind an
//! `Rc<str>`.

use crate::ast::Block;
use crate::bytecode::Instructions;
use crate::env::Env;
use crate::errors::{ErrorKind, RuntimeError};
use crate::tokens::Span;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Names reachable as globals without a definition: native functions and
/// the dot-access namespaces. `GetBuiltin` indexes into [`Builtin::ALL`],
/// so the order here is part of the bytecode contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Keys,
    Values,
    TypeOf,
    Regexp,
    Json,
    Time,
}

impl Builtin {
    pub const ALL: &'static [(&'static str, Builtin)] = &[
        ("print", Builtin::Print),
        ("len", Builtin::Len),
        ("keys", Builtin::Keys),
        ("values", Builtin::Values),
        ("type", Builtin::TypeOf),
        ("Regexp", Builtin::Regexp),
        ("JSON", Builtin::Json),
        ("Time", Builtin::Time),
    ];

    pub fn lookup(name: &str) -> Option<Builtin> {
        Builtin::ALL
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| *b)
    }

    pub fn name(&self) -> &'static str {
        Builtin::ALL
            .iter()
            .find(|(_, b)| b == self)
            .map(|(n, _)| *n)
            .expect("builtin registered in ALL")
    }

    /// The value this entry binds to: namespaces surface as namespace
    /// values, everything else as a callable builtin.
    pub fn value(&self) -> Value {
        match self {
            Builtin::Json => Value::Namespace(Namespace::Json),
            Builtin::Time => Value::Namespace(Namespace::Time),
            other => Value::Builtin(*other),
        }
    }
}

/// Namespace constants reachable by dot access (`JSON.parse`, `Time.now`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Json,
    Time,
}

impl Namespace {
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Json => "JSON",
            Namespace::Time => "Time",
        }
    }
}

/// A tree-walking function: parameter names, body, captured environment.
#[derive(Debug)]
pub struct FunctionObj {
    pub params: Vec<String>,
    pub body: Block,
    pub env: Env,
}

/// Bytecode function: instruction stream plus frame layout counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_params: usize,
    pub num_locals: usize,
    /// Name the function was bound to, when known. Used for diagnostics
    /// and profiling output only.
    pub name: Option<String>,
}

/// A compiled function paired with its captured free-variable slots.
/// `SetFree` writes through the slots, so captured bindings updated from
/// inside the closure are seen by later calls of the same closure.
#[derive(Debug)]
pub struct ClosureObj {
    pub func: Rc<CompiledFunction>,
    pub free: RefCell<Vec<Value>>,
}

/// A class: method table plus optional superclass. The table and parent
/// link are interior-mutable because the VM populates them with `Method`
/// and `Inherit` after the class value is created.
#[derive(Debug)]
pub struct ClassObj {
    pub name: String,
    pub methods: RefCell<HashMap<String, Value>>,
    pub superclass: RefCell<Option<Rc<ClassObj>>>,
}

impl ClassObj {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: RefCell::new(HashMap::new()),
            superclass: RefCell::new(None),
        }
    }

    /// Look up a method, walking the superclass chain. Returns the method
    /// together with the class that defines it (needed for `super`).
    pub fn resolve_method(self: &Rc<Self>, name: &str) -> Option<(Value, Rc<ClassObj>)> {
        let mut current = Rc::clone(self);
        loop {
            if let Some(m) = current.methods.borrow().get(name) {
                return Some((m.clone(), Rc::clone(&current)));
            }
            let parent = current.superclass.borrow().clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }
}

/// An object: its class and its instance-variable map.
#[derive(Debug)]
pub struct InstanceObj {
    pub class: Rc<ClassObj>,
    pub ivars: RefCell<HashMap<String, Value>>,
}

impl InstanceObj {
    pub fn new(class: Rc<ClassObj>) -> Self {
        Self {
            class,
            ivars: RefCell::new(HashMap::new()),
        }
    }
}

/// A method paired with its receiver and the class that defines it. The
/// name rides along so `super` inside the method can resolve the
/// same-named method one class up.
#[derive(Debug)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
    pub owner: Rc<ClassObj>,
    pub name: String,
}

/// A built-in method extracted by dot access and consumed by a later call
/// (`"abc".upper`, `[1].push`, `JSON.parse`).
#[derive(Debug)]
pub struct BuiltinMethodObj {
    pub receiver: Value,
    pub name: Rc<str>,
}

/// A structured exception value.
#[derive(Debug, Clone)]
pub struct ErrorObj {
    /// Kind tag: one of the built-in kinds (`type`, `index`, …) or a
    /// user identifier (`ValidationError`).
    pub kind: String,
    pub message: String,
    pub payload: Option<Value>,
    pub span: Option<Span>,
}

impl ErrorObj {
    pub fn from_runtime(err: RuntimeError) -> Self {
        Self {
            kind: err.kind.to_string(),
            message: err.message,
            payload: None,
            span: err.span,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashObj>>),
    Function(Rc<FunctionObj>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<ClosureObj>),
    Builtin(Builtin),
    BuiltinMethod(Rc<BuiltinMethodObj>),
    Class(Rc<ClassObj>),
    Instance(Rc<InstanceObj>),
    BoundMethod(Rc<BoundMethodObj>),
    Error(Rc<ErrorObj>),
    /// Constructor for user-kinded exceptions: an unresolved capitalized
    /// identifier in call position (`ValidationError("bad")`).
    ErrorCtor(Rc<str>),
    Namespace(Namespace),
    Regexp(Rc<Regex>),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hash(obj: HashObj) -> Self {
        Value::Hash(Rc::new(RefCell::new(obj)))
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorObj {
            kind: kind.into(),
            message: message.into(),
            payload: None,
            span: None,
        }))
    }

    /// `null` and `false` are falsy; every other value is truthy,
    /// including `0`, `""`, and `[]`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Function(_) | Value::CompiledFunction(_) | Value::Closure(_) => "Function",
            Value::Builtin(_) | Value::BuiltinMethod(_) => "Builtin",
            Value::Class(c) => &c.name,
            Value::Instance(i) => &i.class.name,
            Value::BoundMethod(_) => "Method",
            Value::Error(_) | Value::ErrorCtor(_) => "Error",
            Value::Namespace(ns) => ns.name(),
            Value::Regexp(_) => "Regexp",
        }
    }

    /// Canonical string form used by `print` and string coercion in `+`.
    /// Strings appear bare; inside containers they are quoted.
    pub fn display_string(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            _ => self.inspect(),
        }
    }

    /// Developer-facing rendering: strings quoted, containers recursive.
    pub fn inspect(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => format_float(*x),
            Value::Str(s) => format!("\"{}\"", s),
            Value::Array(items) => {
                let inner: Vec<String> = items.borrow().iter().map(|v| v.inspect()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Hash(h) => {
                let h = h.borrow();
                let inner: Vec<String> = h
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().inspect(), v.inspect()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Function(f) => format!("<fn/{}>", f.params.len()),
            Value::CompiledFunction(f) => format!("<compiled fn/{}>", f.num_params),
            Value::Closure(c) => match &c.func.name {
                Some(name) => format!("<fn {}/{}>", name, c.func.num_params),
                None => format!("<fn/{}>", c.func.num_params),
            },
            Value::Builtin(b) => format!("<builtin {}>", b.name()),
            Value::BuiltinMethod(m) => {
                format!("<method {}.{}>", m.receiver.type_name(), m.name)
            }
            Value::Class(c) => format!("<class {}>", c.name),
            Value::Instance(i) => {
                let ivars = i.ivars.borrow();
                let mut fields: Vec<String> = ivars
                    .iter()
                    .map(|(k, v)| format!("@{}: {}", k, v.inspect()))
                    .collect();
                fields.sort();
                format!("<{} {}>", i.class.name, fields.join(", "))
            }
            Value::BoundMethod(b) => format!("<bound method of {}>", b.owner.name),
            Value::Error(e) => format!("{}: {}", e.kind, e.message),
            Value::ErrorCtor(kind) => format!("<error {}>", kind),
            Value::Namespace(ns) => format!("<namespace {}>", ns.name()),
            Value::Regexp(r) => format!("/{}/", r.as_str()),
        }
    }
}

/// Float rendering that survives a round-trip through the lexer.
pub fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// Equality per the language: numbers by numeric value with Int/Float
/// promotion, strings and booleans structurally, aggregates by reference
/// identity, `null` equal only to `null`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Hash(x), Value::Hash(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Error(x), Value::Error(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

// ── Hash keys ──

/// A hashable key: Integer, Float, String, or Boolean. Floats key by bit
/// pattern. Anything else fails with a `type` error at the use site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Bool(bool),
    Str(Rc<str>),
    Float(u64),
}

impl HashKey {
    pub fn from_value(value: &Value) -> Result<HashKey, RuntimeError> {
        match value {
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            Value::Str(s) => Ok(HashKey::Str(Rc::clone(s))),
            Value::Float(x) => Ok(HashKey::Float(x.to_bits())),
            other => Err(RuntimeError::new(
                ErrorKind::Type,
                format!("{} is not hashable", other.type_name()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Int(n) => Value::Int(*n),
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Str(s) => Value::Str(Rc::clone(s)),
            HashKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
        }
    }
}

/// Hash value storage: a map plus the keys in first-insertion order.
/// Iteration, `keys`, and `values` all follow that order; overwriting an
/// existing key keeps its original position.
#[derive(Debug, Default)]
pub struct HashObj {
    map: HashMap<HashKey, Value>,
    order: Vec<HashKey>,
}

impl HashObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains_key(&self, key: &HashKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn insert(&mut self, key: HashKey, value: Value) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        let removed = self.map.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.order.iter().map(|k| (k, &self.map[k]))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.order.iter().map(|k| &self.map[k])
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_null_and_false_only() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::str("").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn numeric_equality_promotes() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Int(2), &Value::Float(2.5)));
    }

    #[test]
    fn aggregate_equality_is_identity() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = Value::array(vec![Value::Int(1)]);
        assert!(!values_equal(&a, &b));
        assert!(values_equal(&a, &a.clone()));
    }

    #[test]
    fn hash_preserves_insertion_order() {
        let mut h = HashObj::new();
        h.insert(HashKey::Str("b".into()), Value::Int(1));
        h.insert(HashKey::Str("a".into()), Value::Int(2));
        h.insert(HashKey::Str("b".into()), Value::Int(3));
        let keys: Vec<Value> = h.keys().map(|k| k.to_value()).collect();
        assert_eq!(keys.len(), 2);
        assert!(values_equal(&keys[0], &Value::str("b")));
        assert!(values_equal(&keys[1], &Value::str("a")));
        assert!(values_equal(
            h.get(&HashKey::Str("b".into())).unwrap(),
            &Value::Int(3)
        ));
    }

    #[test]
    fn hash_remove_then_insert_moves_to_end() {
        let mut h = HashObj::new();
        h.insert(HashKey::Int(1), Value::Int(10));
        h.insert(HashKey::Int(2), Value::Int(20));
        h.remove(&HashKey::Int(1));
        h.insert(HashKey::Int(1), Value::Int(30));
        let keys: Vec<Value> = h.keys().map(|k| k.to_value()).collect();
        assert!(values_equal(&keys[0], &Value::Int(2)));
        assert!(values_equal(&keys[1], &Value::Int(1)));
    }

    #[test]
    fn function_values_are_not_hashable() {
        let err = HashKey::from_value(&Value::array(vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn float_display_round_trips_whole_numbers() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
    }
}
