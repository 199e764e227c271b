//! Tree-walking evaluator.
//!
//! Recursively interprets AST nodes against a lexical environment.
//! Non-local control flow (return, break, continue, exceptions) travels
//! as the `Err` side of every evaluation step and is absorbed by the
//! construct that introduced the enclosing scope: function application
//! for `Return`, loops for `Break`/`Continue`, `try` for `Throw`.

use crate::builtins;
use crate::modules::Resolver;
use crate::ops::{self, BinOp};
use crate::output::Output;
use brio_core::ast::*;
use brio_core::env::Env;
use brio_core::errors::RuntimeError;
use brio_core::values::{Builtin, ClassObj, ErrorObj, FunctionObj, InstanceObj, Value};
use std::path::PathBuf;
use std::rc::Rc;

/// Distinguished non-value outcomes of an evaluation step.
#[derive(Debug)]
pub enum Interrupt {
    Return(Value),
    Break,
    Continue,
    Throw(Rc<ErrorObj>),
}

impl From<RuntimeError> for Interrupt {
    fn from(err: RuntimeError) -> Self {
        Interrupt::Throw(Rc::new(ErrorObj::from_runtime(err)))
    }
}

pub type EvalResult = Result<Value, Interrupt>;

/// Per-call context: the receiver for `@ivar` access and, for methods,
/// the defining class and method name that `super` dispatches through.
#[derive(Debug, Clone)]
struct FrameCtx {
    receiver: Option<Value>,
    method: Option<(Rc<ClassObj>, String)>,
}

impl FrameCtx {
    fn plain() -> Self {
        Self {
            receiver: None,
            method: None,
        }
    }
}

pub struct Evaluator {
    pub out: Output,
    resolver: Option<Rc<Resolver>>,
    /// Directory of the file being evaluated; relative imports resolve
    /// against it.
    dir: PathBuf,
    frames: Vec<FrameCtx>,
    exports: Vec<(String, Value)>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            out: Output::Stdout,
            resolver: None,
            dir: PathBuf::from("."),
            frames: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn with_output(out: Output) -> Self {
        Self {
            out,
            ..Self::new()
        }
    }

    pub fn with_resolver(resolver: Rc<Resolver>, dir: PathBuf, out: Output) -> Self {
        Self {
            out,
            resolver: Some(resolver),
            dir,
            frames: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// A fresh root environment with the builtin globals bound.
    pub fn global_env() -> Env {
        let env = Env::new();
        for (name, builtin) in Builtin::ALL {
            env.define(*name, builtin.value());
        }
        env
    }

    /// Exports recorded by `export` statements, in declaration order.
    pub fn take_exports(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.exports)
    }

    /// Run a whole program, returning its final value or the uncaught
    /// exception.
    pub fn eval_program(&mut self, program: &Program, env: &Env) -> Result<Value, Rc<ErrorObj>> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            match self.eval_stmt(stmt, env) {
                Ok(value) => last = value,
                Err(Interrupt::Return(value)) => return Ok(value),
                Err(Interrupt::Break) => {
                    return Err(loose_control_error("break"));
                }
                Err(Interrupt::Continue) => {
                    return Err(loose_control_error("continue"));
                }
                Err(Interrupt::Throw(err)) => return Err(err),
            }
        }
        Ok(last)
    }

    /// Call a callable value from outside the evaluator (the VM delegates
    /// calls of tree-walk functions here).
    pub fn call_external(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Rc<ErrorObj>> {
        match self.call_value(callee, args) {
            Ok(value) | Err(Interrupt::Return(value)) => Ok(value),
            Err(Interrupt::Break) => Err(loose_control_error("break")),
            Err(Interrupt::Continue) => Err(loose_control_error("continue")),
            Err(Interrupt::Throw(err)) => Err(err),
        }
    }

    // ── Statements ──

    /// Evaluate one statement, yielding its value: expression statements
    /// (and `if`/`try`/`switch` in tail position) produce their result,
    /// everything else produces null.
    fn eval_stmt(&mut self, stmt: &Stmt, env: &Env) -> EvalResult {
        match stmt {
            Stmt::Expr(expr) => self.eval_expr(expr, env),
            Stmt::Assign { target, value, .. } => {
                let value = self.eval_expr(value, env)?;
                match target {
                    AssignTarget::Name(name) => env.set(name, value),
                    AssignTarget::InstanceVar(name) => {
                        let receiver = self.receiver(stmt.span())?;
                        receiver.ivars.borrow_mut().insert(name.clone(), value);
                    }
                }
                Ok(Value::Null)
            }
            Stmt::IndexAssign {
                object,
                index,
                value,
                span,
            } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                let value = self.eval_expr(value, env)?;
                ops::index_write(&object, &index, value)
                    .map_err(|e| Interrupt::from(e.with_span(*span)))?;
                Ok(Value::Null)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Err(Interrupt::Return(value))
            }
            Stmt::Break(_) => Err(Interrupt::Break),
            Stmt::Continue(_) => Err(Interrupt::Continue),
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                if self.eval_expr(condition, env)?.is_truthy() {
                    self.eval_block(consequence, env)
                } else if let Some(alt) = alternative {
                    self.eval_block(alt, env)
                } else {
                    Ok(Value::Null)
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                while self.eval_expr(condition, env)?.is_truthy() {
                    match self.eval_block(body, env) {
                        Ok(_) => {}
                        Err(Interrupt::Break) => break,
                        Err(Interrupt::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.eval_stmt(init, env)?;
                }
                loop {
                    if let Some(cond) = condition {
                        if !self.eval_expr(cond, env)?.is_truthy() {
                            break;
                        }
                    }
                    match self.eval_block(body, env) {
                        Ok(_) => {}
                        Err(Interrupt::Break) => break,
                        Err(Interrupt::Continue) => {}
                        Err(other) => return Err(other),
                    }
                    if let Some(update) = update {
                        self.eval_stmt(update, env)?;
                    }
                }
                Ok(Value::Null)
            }
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                let subject = self.eval_expr(subject, env)?;
                for case in cases {
                    for value in &case.values {
                        let candidate = self.eval_expr(value, env)?;
                        if brio_core::values::values_equal(&subject, &candidate) {
                            return self.eval_block(&case.body, env);
                        }
                    }
                }
                match default {
                    Some(block) => self.eval_block(block, env),
                    None => Ok(Value::Null),
                }
            }
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => self.eval_try(body, catches, finally.as_ref(), env),
            Stmt::Throw { value, span } => {
                let value = self.eval_expr(value, env)?;
                let mut err = ops::to_error_obj(value);
                if err.span.is_none() {
                    let mut inner = (*err).clone();
                    inner.span = Some(*span);
                    err = Rc::new(inner);
                }
                Err(Interrupt::Throw(err))
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                span,
            } => {
                let class = ClassObj::new(name.clone());
                if let Some(sup_name) = superclass {
                    let sup = self.lookup(sup_name, env, *span)?;
                    let Value::Class(sup) = sup else {
                        return Err(Interrupt::from(
                            RuntimeError::type_error(format!(
                                "superclass of {} must be a class, got {}",
                                name,
                                sup.type_name()
                            ))
                            .with_span(*span),
                        ));
                    };
                    *class.superclass.borrow_mut() = Some(sup);
                }
                for method in methods {
                    let func = Value::Function(Rc::new(FunctionObj {
                        params: method.params.clone(),
                        body: method.body.clone(),
                        env: env.clone(),
                    }));
                    class
                        .methods
                        .borrow_mut()
                        .insert(method.name.clone(), func);
                }
                env.set(name, Value::Class(Rc::new(class)));
                Ok(Value::Null)
            }
            Stmt::Import { items, path, span } => {
                let Some(resolver) = self.resolver.clone() else {
                    return Err(Interrupt::from(
                        RuntimeError::import("imports are not available in this context")
                            .with_span(*span),
                    ));
                };
                let module = resolver
                    .load(path, &self.dir)
                    .map_err(|e| Interrupt::from(e.with_span(*span)))?;
                for item in items {
                    let value = module
                        .exports
                        .iter()
                        .find(|(name, _)| name == &item.name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            Interrupt::from(
                                RuntimeError::name_error(format!(
                                    "module \"{}\" has no export named '{}'",
                                    path, item.name
                                ))
                                .with_span(*span),
                            )
                        })?;
                    env.set(item.alias.as_ref().unwrap_or(&item.name), value);
                }
                Ok(Value::Null)
            }
            Stmt::Export { name, value, span } => {
                let value = match value {
                    Some(expr) => {
                        let value = self.eval_expr(expr, env)?;
                        env.set(name, value.clone());
                        value
                    }
                    None => self.lookup(name, env, *span)?,
                };
                self.exports.push((name.clone(), value));
                Ok(Value::Null)
            }
        }
    }

    /// A block's value is its last statement's value.
    fn eval_block(&mut self, block: &Block, env: &Env) -> EvalResult {
        let mut last = Value::Null;
        for stmt in &block.statements {
            last = self.eval_stmt(stmt, env)?;
        }
        Ok(last)
    }

    fn eval_try(
        &mut self,
        body: &Block,
        catches: &[CatchClause],
        finally: Option<&Block>,
        env: &Env,
    ) -> EvalResult {
        let outcome = match self.eval_block(body, env) {
            Err(Interrupt::Throw(err)) => {
                let mut handled = None;
                for clause in catches {
                    let matches = match &clause.kind {
                        Some(kind) => *kind == err.kind,
                        None => true,
                    };
                    if matches {
                        env.set(&clause.name, Value::Error(Rc::clone(&err)));
                        handled = Some(self.eval_block(&clause.body, env));
                        break;
                    }
                }
                handled.unwrap_or(Err(Interrupt::Throw(err)))
            }
            other => other,
        };
        // The finally block runs on every exit path; its own non-local
        // outcome, if any, replaces the pending one.
        if let Some(finally) = finally {
            self.eval_block(finally, env)?;
        }
        outcome
    }

    // ── Expressions ──

    fn eval_expr(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        let span = expr.span();
        self.eval_expr_inner(expr, env).map_err(|interrupt| {
            // Stamp the innermost expression's position onto fresh errors.
            match interrupt {
                Interrupt::Throw(err) if err.span.is_none() => {
                    let mut inner = (*err).clone();
                    inner.span = Some(span);
                    Interrupt::Throw(Rc::new(inner))
                }
                other => other,
            }
        })
    }

    fn eval_expr_inner(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        match expr {
            Expr::Ident(name, span) => self.lookup(name, env, *span),
            Expr::InstanceVar(name, span) => {
                let receiver = self.receiver(*span)?;
                let value = receiver.ivars.borrow().get(name).cloned();
                Ok(value.unwrap_or(Value::Null))
            }
            Expr::IntLit(n, _) => Ok(Value::Int(*n)),
            Expr::FloatLit(x, _) => Ok(Value::Float(*x)),
            Expr::StringLit(s, _) => Ok(Value::str(s.clone())),
            Expr::BoolLit(b, _) => Ok(Value::Bool(*b)),
            Expr::NullLit(_) => Ok(Value::Null),
            Expr::Prefix(op, operand, _) => {
                let value = self.eval_expr(operand, env)?;
                match op {
                    PrefixOp::Neg => Ok(ops::negate(&value)?),
                    PrefixOp::Not => Ok(ops::not(&value)),
                }
            }
            Expr::Infix(left, op, right, _) => match op {
                InfixOp::And => {
                    let left = self.eval_expr(left, env)?;
                    if !left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval_expr(right, env)
                    }
                }
                InfixOp::Or => {
                    let left = self.eval_expr(left, env)?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval_expr(right, env)
                    }
                }
                _ => {
                    let left = self.eval_expr(left, env)?;
                    let right = self.eval_expr(right, env)?;
                    let op = BinOp::from_infix(*op).expect("eager operator");
                    Ok(ops::binary(op, &left, &right)?)
                }
            },
            Expr::Array(items, _) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::array(values))
            }
            Expr::Hash(pairs, _) => {
                let mut hash = brio_core::values::HashObj::new();
                for (key, value) in pairs {
                    let key_value = self.eval_expr(key, env)?;
                    let key = brio_core::values::HashKey::from_value(&key_value)?;
                    let value = self.eval_expr(value, env)?;
                    hash.insert(key, value);
                }
                Ok(Value::hash(hash))
            }
            Expr::Index(object, index, _) => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                Ok(ops::index_read(&object, &index)?)
            }
            Expr::Property(object, name, _) => {
                let object = self.eval_expr(object, env)?;
                Ok(builtins::get_property(&object, name)?)
            }
            Expr::Call(callee, args, _) => {
                let callee = self.eval_expr(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.call_value(callee, args)
            }
            Expr::FnLit(params, body, _) => Ok(Value::Function(Rc::new(FunctionObj {
                params: params.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Expr::New(class, args, _) => {
                let class = self.eval_expr(class, env)?;
                let args = self.eval_args(args, env)?;
                match class {
                    Value::Class(class) => self.construct(class, args),
                    other => Err(Interrupt::from(RuntimeError::type_error(format!(
                        "{} is not a class",
                        other.type_name()
                    )))),
                }
            }
            Expr::Super(args, span) => {
                let Some((owner, method_name)) = self
                    .frames
                    .last()
                    .and_then(|f| f.method.clone())
                else {
                    return Err(Interrupt::from(
                        RuntimeError::runtime("'super' outside a method").with_span(*span),
                    ));
                };
                let receiver = Value::Instance(self.receiver(*span)?);
                let parent = owner.superclass.borrow().clone().ok_or_else(|| {
                    Interrupt::from(
                        RuntimeError::runtime(format!("{} has no superclass", owner.name))
                            .with_span(*span),
                    )
                })?;
                let (method, found_in) =
                    parent.resolve_method(&method_name).ok_or_else(|| {
                        Interrupt::from(
                            RuntimeError::name_error(format!(
                                "undefined method '{}' for {}",
                                method_name, parent.name
                            ))
                            .with_span(*span),
                        )
                    })?;
                let args = self.eval_args(args, env)?;
                self.apply_method(method, receiver, found_in, method_name, args)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> Result<Vec<Value>, Interrupt> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg, env)?);
        }
        Ok(values)
    }

    fn lookup(&mut self, name: &str, env: &Env, span: brio_core::tokens::Span) -> EvalResult {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        // A capitalized unknown name in a program is an exception
        // constructor (`throw ValidationError("…")`).
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            return Ok(Value::ErrorCtor(Rc::from(name)));
        }
        Err(Interrupt::from(
            RuntimeError::name_error(format!("undefined variable '{}'", name)).with_span(span),
        ))
    }

    fn receiver(&self, span: brio_core::tokens::Span) -> Result<Rc<InstanceObj>, Interrupt> {
        let receiver = self.frames.last().and_then(|f| f.receiver.clone());
        match receiver {
            Some(Value::Instance(instance)) => Ok(instance),
            _ => Err(Interrupt::from(
                RuntimeError::runtime("instance variable access outside a method")
                    .with_span(span),
            )),
        }
    }

    // ── Application ──

    pub(crate) fn call_value(&mut self, callee: Value, args: Vec<Value>) -> EvalResult {
        match callee {
            Value::Function(func) => self.apply_function(&func, args, FrameCtx::plain()),
            Value::Builtin(builtin) => {
                Ok(builtins::apply_builtin(builtin, &args, &self.out)?)
            }
            Value::BuiltinMethod(method) => {
                Ok(builtins::call_method(&method.receiver, &method.name, &args)?)
            }
            Value::BoundMethod(bound) => self.apply_method(
                bound.method.clone(),
                bound.receiver.clone(),
                Rc::clone(&bound.owner),
                bound.name.clone(),
                args,
            ),
            Value::Class(class) => self.construct(class, args),
            Value::ErrorCtor(kind) => Ok(builtins::call_error_ctor(&kind, &args)?),
            other => Err(Interrupt::from(RuntimeError::type_error(format!(
                "{} is not callable",
                other.type_name()
            )))),
        }
    }

    fn apply_function(
        &mut self,
        func: &Rc<FunctionObj>,
        args: Vec<Value>,
        ctx: FrameCtx,
    ) -> EvalResult {
        if args.len() != func.params.len() {
            return Err(Interrupt::from(RuntimeError::type_error(format!(
                "function expects {} argument{}, got {}",
                func.params.len(),
                if func.params.len() == 1 { "" } else { "s" },
                args.len()
            ))));
        }
        let env = func.env.child();
        for (param, arg) in func.params.iter().zip(args) {
            env.define(param, arg);
        }
        self.frames.push(ctx);
        let result = self.eval_block(&func.body, &env);
        self.frames.pop();
        match result {
            Ok(value) => Ok(value),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(Interrupt::Break) => Err(Interrupt::Throw(loose_control_error("break"))),
            Err(Interrupt::Continue) => Err(Interrupt::Throw(loose_control_error("continue"))),
            Err(other) => Err(other),
        }
    }

    fn apply_method(
        &mut self,
        method: Value,
        receiver: Value,
        owner: Rc<ClassObj>,
        name: String,
        args: Vec<Value>,
    ) -> EvalResult {
        match method {
            Value::Function(func) => self.apply_function(
                &func,
                args,
                FrameCtx {
                    receiver: Some(receiver),
                    method: Some((owner, name)),
                },
            ),
            other => Err(Interrupt::from(RuntimeError::type_error(format!(
                "method '{}' is not callable here ({})",
                name,
                other.type_name()
            )))),
        }
    }

    fn construct(&mut self, class: Rc<ClassObj>, args: Vec<Value>) -> EvalResult {
        let instance = Value::Instance(Rc::new(InstanceObj::new(Rc::clone(&class))));
        match class.resolve_method("initialize") {
            Some((method, owner)) => {
                self.apply_method(
                    method,
                    instance.clone(),
                    owner,
                    "initialize".to_string(),
                    args,
                )?;
            }
            None => {
                if !args.is_empty() {
                    return Err(Interrupt::from(RuntimeError::type_error(format!(
                        "{}.new expects 0 arguments, got {}",
                        class.name,
                        args.len()
                    ))));
                }
            }
        }
        Ok(instance)
    }
}

fn loose_control_error(keyword: &str) -> Rc<ErrorObj> {
    Rc::new(ErrorObj::from_runtime(RuntimeError::runtime(format!(
        "'{}' outside a loop",
        keyword
    ))))
}

/// Convenience: the bound-method path for `instance.method(...)` calls is
/// exercised through `builtins::get_property`, which returns the bound
/// method consumed by `call_value`.
#[cfg(test)]
mod tests {
    use super::*;
    use brio_compiler::parse_source;
    use brio_core::values::values_equal;

    fn run(source: &str) -> Value {
        let program = parse_source(source).expect("parse");
        let mut evaluator = Evaluator::with_output(Output::capture());
        let env = Evaluator::global_env();
        evaluator
            .eval_program(&program, &env)
            .unwrap_or_else(|e| panic!("runtime error for {:?}: {}: {}", source, e.kind, e.message))
    }

    fn run_err(source: &str) -> Rc<ErrorObj> {
        let program = parse_source(source).expect("parse");
        let mut evaluator = Evaluator::with_output(Output::capture());
        let env = Evaluator::global_env();
        evaluator
            .eval_program(&program, &env)
            .expect_err("expected a runtime error")
    }

    fn run_with_output(source: &str) -> (Value, Vec<String>) {
        let program = parse_source(source).expect("parse");
        let out = Output::capture();
        let mut evaluator = Evaluator::with_output(out.clone());
        let env = Evaluator::global_env();
        let value = evaluator.eval_program(&program, &env).expect("no error");
        (value, out.lines())
    }

    fn assert_int(source: &str, expected: i64) {
        let value = run(source);
        assert!(
            values_equal(&value, &Value::Int(expected)),
            "{:?} evaluated to {} (expected {})",
            source,
            value.inspect(),
            expected
        );
    }

    fn assert_str(source: &str, expected: &str) {
        let value = run(source);
        assert!(
            values_equal(&value, &Value::str(expected)),
            "{:?} evaluated to {} (expected {:?})",
            source,
            value.inspect(),
            expected
        );
    }

    #[test]
    fn arithmetic_precedence() {
        assert_int("(1 + 2) * 3 - 4 / 2", 7);
        assert_int("10 % 3", 1);
    }

    #[test]
    fn truthiness_in_conditionals() {
        assert_int("if (0) { 1 } else { 2 }", 1);
        assert_int("if (\"\") { 1 } else { 2 }", 1);
        assert_int("if (null) { 1 } else { 2 }", 2);
        assert_int("if (false) { 1 } else { 2 }", 2);
    }

    #[test]
    fn logical_operators_return_deciding_operand() {
        assert_int("false || 3", 3);
        assert_int("1 && 2", 2);
        let value = run("null && boom()");
        assert!(matches!(value, Value::Null));
    }

    #[test]
    fn assignment_walks_to_defining_scope() {
        assert_int(
            "count = 0\nbump = fn() { count = count + 1 }\nbump()\nbump()\ncount",
            2,
        );
    }

    #[test]
    fn closures_and_recursion() {
        assert_int(
            "factorial = fn(n) { if (n <= 1) { 1 } else { n * factorial(n - 1) } }\nfactorial(5)",
            120,
        );
        assert_int(
            "newAdder = fn(x) { fn(y) { x + y } }\naddTwo = newAdder(2)\naddTwo(3)",
            5,
        );
    }

    #[test]
    fn closure_counter_shares_the_binding() {
        assert_int(
            "makeCounter = fn() { count = 0\nfn() { count = count + 1\ncount } }\nc = makeCounter()\nc()\nc()\nc()",
            3,
        );
    }

    #[test]
    fn while_and_for_loops() {
        assert_int("i = 0\nwhile (i < 5) { i = i + 1 }\ni", 5);
        assert_int(
            "total = 0\nfor (i = 0; i < 5; i = i + 1) { total = total + i }\ntotal",
            10,
        );
        assert_int(
            "total = 0\nfor (i = 0; i < 10; i = i + 1) { if (i == 3) { continue }\nif (i == 6) { break }\ntotal = total + i }\ntotal",
            12,
        );
    }

    #[test]
    fn switch_matches_without_fallthrough() {
        assert_str(
            "switch (2) { case 1: \"one\"\ncase 2, 3: \"few\"\ndefault: \"many\" }",
            "few",
        );
        assert_str("switch (9) { case 1: \"one\"\ndefault: \"many\" }", "many");
        let value = run("switch (9) { case 1: \"one\" }");
        assert!(matches!(value, Value::Null));
    }

    #[test]
    fn arrays_share_storage_through_aliases() {
        assert_int("a = [1, 2, 3]\nb = a\nb[0] = 9\na[0]", 9);
        assert_int("a = [1, 2]\na.push(3)\na.length", 3);
        let value = run("a = [1]\na[5]");
        assert!(matches!(value, Value::Null));
    }

    #[test]
    fn hash_insertion_order_and_methods() {
        let value = run("h = {\"a\": 1, \"b\": 2}\nh[\"c\"] = 3\nkeys(h).join(\",\")");
        assert!(values_equal(&value, &Value::str("a,b,c")));
        assert_int("h = {\"a\": 1}\nh.get(\"b\", 7)", 7);
        assert_int("h = {\"a\": 1, \"b\": 2}\nh.delete(\"a\")\nh.size", 1);
    }

    #[test]
    fn string_methods() {
        assert_str("\"Hello\".upper()", "HELLO");
        assert_int("\"hello\".length", 5);
        assert_str("\"a,b\".split(\",\")[1]", "b");
        assert_str("\"hello\".replace(\"l\", \"L\")", "heLLo");
        let value = run("\"a1b2\".matches?(Regexp(\"[0-9]\"))");
        assert!(matches!(value, Value::Bool(true)));
    }

    #[test]
    fn exceptions_match_by_kind() {
        assert_str(
            "try { throw ValidationError(\"bad\") } catch (TypeError e) { \"t\" } catch (ValidationError e) { e.message }",
            "bad",
        );
        let err = run_err("throw ValidationError(\"bad\")");
        assert_eq!(err.kind, "ValidationError");
        assert_eq!(err.message, "bad");
    }

    #[test]
    fn typed_catch_does_not_match_other_kinds() {
        let err = run_err("try { throw A(\"x\") } catch (B e) { \"caught\" }");
        assert_eq!(err.kind, "A");
    }

    #[test]
    fn runtime_errors_are_catchable_by_kind() {
        assert_str("try { 1 / 0 } catch (arith e) { \"div\" }", "div");
        assert_str("try { missing_var } catch (name e) { \"nm\" }", "nm");
        assert_str("try { 1 + [] } catch (type e) { \"ty\" }", "ty");
    }

    #[test]
    fn finally_runs_on_every_path() {
        let (value, lines) = run_with_output(
            "steps = []\ntry { steps.push(\"body\")\nthrow E(\"x\") } catch (e) { steps.push(\"catch\") } finally { steps.push(\"finally\") }\nprint(steps.join(\",\"))",
        );
        assert!(matches!(value, Value::Null));
        assert_eq!(lines, vec!["body,catch,finally"]);

        // On return paths the finally still runs.
        let (_, lines) = run_with_output(
            "f = fn() { try { return 1 } finally { print(\"fin\") } }\nprint(f())",
        );
        assert_eq!(lines, vec!["fin", "1"]);
    }

    #[test]
    fn uncaught_exception_keeps_propagating_after_finally() {
        let (_, lines) = run_with_output(
            "try { try { throw E(\"deep\") } finally { print(\"inner\") } } catch (e) { print(e.kind) }",
        );
        assert_eq!(lines, vec!["inner", "E"]);
    }

    #[test]
    fn classes_instances_and_inheritance() {
        assert_str(
            "class A { fn greet() { \"A\" } }\nclass B < A { fn greet() { super() + \"B\" } }\nB.new().greet()",
            "AB",
        );
        assert_int(
            "class Point { fn initialize(x, y) { @x = x\n@y = y }\nfn sum() { @x + @y } }\nPoint.new(3, 4).sum()",
            7,
        );
        // A subclass without `initialize` uses the superclass's.
        assert_int(
            "class A { fn initialize(n) { @n = n }\nfn n() { @n } }\nclass B < A { }\nB.new(5).n()",
            5,
        );
    }

    #[test]
    fn method_lookup_walks_the_chain() {
        assert_str(
            "class A { fn hi() { \"hi\" } }\nclass B < A { }\nB.new().hi()",
            "hi",
        );
        let err = run_err("class A { }\nA.new().nope()");
        assert_eq!(err.kind, "name");
    }

    #[test]
    fn arity_is_strict() {
        let err = run_err("f = fn(a, b) { a }\nf(1)");
        assert_eq!(err.kind, "type");
        let err = run_err("f = fn() { 0 }\nf(1, 2)");
        assert_eq!(err.kind, "type");
    }

    #[test]
    fn instance_access_outside_method_is_runtime_error() {
        let err = run_err("@x");
        assert_eq!(err.kind, "runtime");
        let err = run_err("f = fn() { @x }\nf()");
        assert_eq!(err.kind, "runtime");
    }

    #[test]
    fn break_outside_loop_is_runtime_error() {
        let err = run_err("f = fn() { break }\nf()");
        assert_eq!(err.kind, "runtime");
    }

    #[test]
    fn print_writes_display_forms() {
        let (_, lines) = run_with_output("print((1 + 2) * 3 - 4 / 2)");
        assert_eq!(lines, vec!["7"]);
        let (_, lines) = run_with_output("print(\"a\", [1, \"x\"], {\"k\": null})");
        assert_eq!(lines, vec!["a [1, \"x\"] {\"k\": null}"]);
    }

    #[test]
    fn json_namespace_round_trips() {
        assert_int("JSON.parse(\"{\\\"n\\\": 41}\")[\"n\"] + 1", 42);
        assert_str("JSON.stringify([1, true, null])", "[1,true,null]");
    }

    #[test]
    fn string_coercion_in_concatenation() {
        assert_str("\"n=\" + 42", "n=42");
        assert_str("1.5 + \"!\"", "1.5!");
        assert_str("\"v:\" + null", "v:null");
    }

    #[test]
    fn statement_continuation_across_newlines() {
        assert_int("x = 1\n+ 2\nx", 3);
        assert_str("\"ab\"\n.upper()", "AB");
    }
}
