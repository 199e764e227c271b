//! Error taxonomy shared by the front end, the evaluator, and the VM.

use crate::tokens::Span;
use std::fmt;

/// Kind tags for runtime failures. User-thrown exceptions carry the
/// identifier they were constructed with (`ValidationError`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surface syntax errors.
    Parse,
    /// Unresolved identifier, unknown property or method, unknown export.
    Name,
    /// Mismatched operand types, non-callable callee, non-hashable key,
    /// wrong argument count.
    Type,
    /// Division or modulo by zero.
    Arith,
    /// Array or string index out of range.
    Index,
    /// Unresolved module path, cyclic import, parse error in a module.
    Import,
    /// `break`/`continue` outside a loop, `super` outside a method,
    /// instance access outside a `self` context, stack overflow.
    Runtime,
    /// User-kinded exception (`throw ValidationError("…")`).
    User(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::Name => write!(f, "name"),
            ErrorKind::Type => write!(f, "type"),
            ErrorKind::Arith => write!(f, "arith"),
            ErrorKind::Index => write!(f, "index"),
            ErrorKind::Import => write!(f, "import"),
            ErrorKind::Runtime => write!(f, "runtime"),
            ErrorKind::User(kind) => write!(f, "{}", kind),
        }
    }
}

/// A runtime failure with its kind, message, and source position when one
/// is known. Renders as one line beginning with the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn arith(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arith, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{} error at line {}, col {}: {}",
                self.kind, span.line, span.col, self.message
            ),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}
