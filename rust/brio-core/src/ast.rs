//! AST node definitions for the Brio language.
//!
//! A [`Program`] is an ordered sequence of statements. Every node records
//! the span of the token that introduced it so diagnostics can point back
//! into the source. The `Display` impls produce a canonical source form:
//! parsing the printed form of a program yields a structurally identical
//! AST (fully parenthesized expressions make this unambiguous).

use crate::tokens::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A complete Brio program (one `.brio` file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// A brace-delimited statement list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// Assignment target: `x = …` or `@x = …`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(String),
    InstanceVar(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `x = expr` / `@x = expr`
    Assign {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    /// `obj[idx] = expr`
    IndexAssign {
        object: Expr,
        index: Expr,
        value: Expr,
        span: Span,
    },
    Expr(Expr),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    If {
        condition: Expr,
        consequence: Block,
        alternative: Option<Block>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Block,
        span: Span,
    },
    /// C-style `for (init; cond; update) { body }`
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Block,
        span: Span,
    },
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
        span: Span,
    },
    /// At least one catch clause or a finally block is always present.
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
        span: Span,
    },
    Throw {
        value: Expr,
        span: Span,
    },
    Class {
        name: String,
        superclass: Option<String>,
        methods: Vec<MethodDef>,
        span: Span,
    },
    Import {
        /// `(name, optional alias)` pairs in source order
        items: Vec<ImportItem>,
        path: String,
        span: Span,
    },
    Export {
        name: String,
        value: Option<Expr>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Exception kind to match; `None` matches any exception.
    pub kind: Option<String>,
    /// Name the caught exception is bound to.
    pub name: String,
    pub body: Block,
    pub span: Span,
}

/// `fn name(params) { … }` inside a class body. The constructor is the
/// reserved method name `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportItem {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefixOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String, Span),
    InstanceVar(String, Span),
    IntLit(i64, Span),
    FloatLit(f64, Span),
    StringLit(String, Span),
    BoolLit(bool, Span),
    NullLit(Span),
    Prefix(PrefixOp, Box<Expr>, Span),
    Infix(Box<Expr>, InfixOp, Box<Expr>, Span),
    Array(Vec<Expr>, Span),
    /// Key/value pairs preserve source order.
    Hash(Vec<(Expr, Expr)>, Span),
    Index(Box<Expr>, Box<Expr>, Span),
    Property(Box<Expr>, String, Span),
    Call(Box<Expr>, Vec<Expr>, Span),
    FnLit(Vec<String>, Block, Span),
    /// `Cls.new(args)`
    New(Box<Expr>, Vec<Expr>, Span),
    /// `super(args)` inside a method
    Super(Vec<Expr>, Span),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(_, s)
            | Expr::InstanceVar(_, s)
            | Expr::IntLit(_, s)
            | Expr::FloatLit(_, s)
            | Expr::StringLit(_, s)
            | Expr::BoolLit(_, s)
            | Expr::NullLit(s)
            | Expr::Prefix(_, _, s)
            | Expr::Infix(_, _, _, s)
            | Expr::Array(_, s)
            | Expr::Hash(_, s)
            | Expr::Index(_, _, s)
            | Expr::Property(_, _, s)
            | Expr::Call(_, _, s)
            | Expr::FnLit(_, _, s)
            | Expr::New(_, _, s)
            | Expr::Super(_, s) => *s,
        }
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::IndexAssign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Throw { span, .. }
            | Stmt::Class { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::Export { span, .. } => *span,
            Stmt::Break(s) | Stmt::Continue(s) => *s,
            Stmt::Expr(e) => e.span(),
        }
    }
}

// ── Canonical printing ──

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOp::Neg => write!(f, "-"),
            PrefixOp::Not => write!(f, "!"),
        }
    }
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Mod => "%",
            InfixOp::Eq => "==",
            InfixOp::NotEq => "!=",
            InfixOp::Lt => "<",
            InfixOp::Gt => ">",
            InfixOp::LtEq => "<=",
            InfixOp::GtEq => ">=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name, _) => write!(f, "{}", name),
            Expr::InstanceVar(name, _) => write!(f, "@{}", name),
            Expr::IntLit(n, _) => write!(f, "{}", n),
            Expr::FloatLit(x, _) => write!(f, "{:?}", x),
            Expr::StringLit(s, _) => write!(f, "\"{}\"", escape_string(s)),
            Expr::BoolLit(b, _) => write!(f, "{}", b),
            Expr::NullLit(_) => write!(f, "null"),
            Expr::Prefix(op, operand, _) => write!(f, "({}{})", op, operand),
            Expr::Infix(left, op, right, _) => write!(f, "({} {} {})", left, op, right),
            Expr::Array(items, _) => write!(f, "[{}]", join_exprs(items)),
            Expr::Hash(pairs, _) => {
                let entries: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Expr::Index(obj, idx, _) => write!(f, "({}[{}])", obj, idx),
            Expr::Property(obj, name, _) => write!(f, "{}.{}", obj, name),
            Expr::Call(callee, args, _) => write!(f, "{}({})", callee, join_exprs(args)),
            Expr::FnLit(params, body, _) => {
                write!(f, "fn({}) {}", params.join(", "), body)
            }
            Expr::New(class, args, _) => write!(f, "{}.new({})", class, join_exprs(args)),
            Expr::Super(args, _) => write!(f, "super({})", join_exprs(args)),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for stmt in &self.statements {
            writeln!(f, "{}", stmt)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { target, value, .. } => match target {
                AssignTarget::Name(name) => write!(f, "{} = {}", name, value),
                AssignTarget::InstanceVar(name) => write!(f, "@{} = {}", name, value),
            },
            Stmt::IndexAssign {
                object,
                index,
                value,
                ..
            } => write!(f, "{}[{}] = {}", object, index, value),
            Stmt::Expr(e) => write!(f, "{}", e),
            Stmt::Return { value, .. } => match value {
                Some(v) => write!(f, "return {}", v),
                None => write!(f, "return"),
            },
            Stmt::Break(_) => write!(f, "break"),
            Stmt::Continue(_) => write!(f, "continue"),
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                write!(f, "if ({}) {}", condition, consequence)?;
                if let Some(alt) = alternative {
                    write!(f, " else {}", alt)?;
                }
                Ok(())
            }
            Stmt::While {
                condition, body, ..
            } => write!(f, "while ({}) {}", condition, body),
            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                write!(f, "for (")?;
                if let Some(i) = init {
                    write!(f, "{}", i)?;
                }
                write!(f, "; ")?;
                if let Some(c) = condition {
                    write!(f, "{}", c)?;
                }
                write!(f, "; ")?;
                if let Some(u) = update {
                    write!(f, "{}", u)?;
                }
                write!(f, ") {}", body)
            }
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                writeln!(f, "switch ({}) {{", subject)?;
                for case in cases {
                    writeln!(f, "case {}: {}", join_exprs(&case.values), case.body)?;
                }
                if let Some(d) = default {
                    writeln!(f, "default: {}", d)?;
                }
                write!(f, "}}")
            }
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => {
                write!(f, "try {}", body)?;
                for clause in catches {
                    match &clause.kind {
                        Some(kind) => {
                            write!(f, " catch ({} {}) {}", kind, clause.name, clause.body)?
                        }
                        None => write!(f, " catch ({}) {}", clause.name, clause.body)?,
                    }
                }
                if let Some(fin) = finally {
                    write!(f, " finally {}", fin)?;
                }
                Ok(())
            }
            Stmt::Throw { value, .. } => write!(f, "throw {}", value),
            Stmt::Class {
                name,
                superclass,
                methods,
                ..
            } => {
                write!(f, "class {}", name)?;
                if let Some(sup) = superclass {
                    write!(f, " < {}", sup)?;
                }
                writeln!(f, " {{")?;
                for m in methods {
                    writeln!(f, "fn {}({}) {}", m.name, m.params.join(", "), m.body)?;
                }
                write!(f, "}}")
            }
            Stmt::Import { items, path, .. } => {
                let names: Vec<String> = items
                    .iter()
                    .map(|i| match &i.alias {
                        Some(a) => format!("{} as {}", i.name, a),
                        None => i.name.clone(),
                    })
                    .collect();
                write!(
                    f,
                    "import {{ {} }} from \"{}\"",
                    names.join(", "),
                    escape_string(path)
                )
            }
            Stmt::Export { name, value, .. } => match value {
                Some(v) => write!(f, "export {} = {}", name, v),
                None => write!(f, "export {}", name),
            },
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            writeln!(f, "{}", stmt)?;
        }
        Ok(())
    }
}
