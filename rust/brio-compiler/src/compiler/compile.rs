//! AST → bytecode compiler.
//!
//! Lowers the AST to the stack-machine instruction set: a scoped symbol
//! table drives variable access, jump operands are patched once targets
//! are known, and function literals compile in their own scope with free
//! variables captured through `Closure`.
//!
//! Blocks compile to leave exactly one value on the stack (the value of
//! their last statement, or null), which is how `if`/`try`/`switch` used
//! in tail position and implicit function returns fall out of the stack
//! discipline. `finally` bodies are inlined on every exit path from their
//! `try`, including `return`/`break`/`continue` escaping it.

use crate::compiler::symbol_table::{Symbol, SymbolScope, SymbolTable};
use brio_core::ast::*;
use brio_core::bytecode::{make, read_u16, Bytecode, Instructions, Opcode};
use brio_core::values::{CompiledFunction, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("'break' outside a loop at line {line}")]
    BreakOutsideLoop { line: usize },
    #[error("'continue' outside a loop at line {line}")]
    ContinueOutsideLoop { line: usize },
    #[error("'super' outside a method at line {line}")]
    SuperOutsideMethod { line: usize },
    #[error("cannot import \"{path}\": {message}")]
    ImportFailed { path: String, message: String },
    #[error("module \"{path}\" has no export named '{name}'")]
    UnknownExport { path: String, name: String },
    #[error("imports are not available without a module loader")]
    ImportsUnavailable,
}

/// Resolves and loads modules for `import` statements at compile time.
/// Returns the module's exports in declaration order.
pub trait ImportLoader {
    fn load(&self, path: &str) -> Result<Vec<(String, Value)>, String>;
}

/// Placeholder jump operand, patched once the target address is known.
const PENDING: usize = 0xFFFF;

#[derive(Debug, Clone)]
struct LoopContext {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
    /// How many switch subjects were live when the loop began; a
    /// `break`/`continue` pops anything above this before jumping.
    temp_depth_at_entry: usize,
    /// How many try handlers were active when the loop began; a
    /// `break`/`continue` closes anything above this (running finallys).
    try_depth_at_entry: usize,
}

#[derive(Debug, Clone)]
struct TryContext {
    finally: Option<Block>,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    loops: Vec<LoopContext>,
    trys: Vec<TryContext>,
    /// Count of switch subjects currently held on the stack.
    temp_depth: usize,
}

/// Whether a statement leaves a value on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StmtEffect {
    /// Pushes exactly one value (`Expr`, `If`, `Try`, `Switch`).
    Value,
    /// Pushes nothing (assignments, loops, declarations).
    None,
    /// Transfers control away (`return`, `break`, `continue`, `throw`).
    Diverges,
}

fn stmt_effect(stmt: &Stmt) -> StmtEffect {
    match stmt {
        Stmt::Expr(_) | Stmt::If { .. } | Stmt::Try { .. } | Stmt::Switch { .. } => {
            StmtEffect::Value
        }
        Stmt::Return { .. } | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Throw { .. } => {
            StmtEffect::Diverges
        }
        _ => StmtEffect::None,
    }
}

pub struct Compiler<'l> {
    constants: Vec<Value>,
    string_constants: HashMap<String, usize>,
    symbols: Rc<RefCell<SymbolTable>>,
    global_names: Vec<String>,
    scopes: Vec<CompilationScope>,
    /// Names of enclosing methods, innermost last; `super` resolves
    /// against the top entry.
    method_names: Vec<String>,
    loader: Option<&'l dyn ImportLoader>,
}

impl Default for Compiler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'l> Compiler<'l> {
    pub fn new() -> Self {
        Compiler {
            // Pool index 0 is reserved (null) so `Catch 0` can mean an
            // untyped clause.
            constants: vec![Value::Null],
            string_constants: HashMap::new(),
            symbols: SymbolTable::new_global(),
            global_names: Vec::new(),
            scopes: vec![CompilationScope::default()],
            method_names: Vec::new(),
            loader: None,
        }
    }

    pub fn with_loader(loader: &'l dyn ImportLoader) -> Self {
        Compiler {
            loader: Some(loader),
            ..Self::new()
        }
    }

    /// Compile a whole program. The emitted stream leaves the program's
    /// final value on the stack.
    pub fn compile(mut self, program: &Program) -> Result<Bytecode, CompileError> {
        self.compile_statements(&program.statements)?;
        let scope = self.scopes.pop().expect("program scope");
        Ok(Bytecode {
            instructions: scope.instructions,
            constants: self.constants,
            global_names: self.global_names,
        })
    }

    // ── Emission helpers ──

    fn scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("at least one scope")
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let ins = make(op, operands);
        let scope = self.scope();
        let pos = scope.instructions.len();
        scope.instructions.extend(ins);
        pos
    }

    fn here(&mut self) -> usize {
        self.scope().instructions.len()
    }

    /// Rewrite the (16-bit, first) operand of the instruction at `pos`.
    fn change_operand(&mut self, pos: usize, operand: usize) {
        let bytes = (operand as u16).to_be_bytes();
        let ins = &mut self.scope().instructions;
        debug_assert!(read_u16(ins, pos + 1) as usize == PENDING);
        ins[pos + 1] = bytes[0];
        ins[pos + 2] = bytes[1];
    }

    fn patch_jump_here(&mut self, pos: usize) {
        let target = self.here();
        self.change_operand(pos, target);
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Interned string constant, used for names in `GetProperty`,
    /// `Invoke`, `Catch`, and friends.
    fn string_constant(&mut self, s: &str) -> usize {
        if let Some(&idx) = self.string_constants.get(s) {
            return idx;
        }
        let idx = self.add_constant(Value::str(s));
        self.string_constants.insert(s.to_string(), idx);
        idx
    }

    fn record_global(&mut self, symbol: &Symbol) {
        if symbol.scope == SymbolScope::Global {
            if self.global_names.len() <= symbol.index {
                self.global_names.resize(symbol.index + 1, String::new());
            }
            self.global_names[symbol.index] = symbol.name.clone();
        }
    }

    fn root_table(&self) -> Rc<RefCell<SymbolTable>> {
        let mut table = Rc::clone(&self.symbols);
        loop {
            let outer = table.borrow().outer();
            match outer {
                Some(o) => table = o,
                None => return table,
            }
        }
    }

    // ── Statements ──

    fn compile_statements(&mut self, statements: &[Stmt]) -> Result<(), CompileError> {
        if statements.is_empty() {
            self.emit(Opcode::Null, &[]);
            return Ok(());
        }
        let last = statements.len() - 1;
        for (i, stmt) in statements.iter().enumerate() {
            self.compile_statement(stmt)?;
            match stmt_effect(stmt) {
                StmtEffect::Value => {
                    if i != last {
                        self.emit(Opcode::Pop, &[]);
                    }
                }
                StmtEffect::None => {
                    if i == last {
                        self.emit(Opcode::Null, &[]);
                    }
                }
                StmtEffect::Diverges => {
                    if i == last {
                        // Unreachable pad keeping merge points at a
                        // consistent stack height.
                        self.emit(Opcode::Null, &[]);
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.compile_statements(&block.statements)
    }

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(expr) => self.compile_expression(expr),
            Stmt::Assign {
                target,
                value,
                span: _,
            } => self.compile_assign(target, value),
            Stmt::IndexAssign {
                object,
                index,
                value,
                ..
            } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.compile_expression(value)?;
                self.emit(Opcode::SetIndex, &[]);
                Ok(())
            }
            Stmt::Return { value, .. } => self.compile_return(value.as_ref()),
            Stmt::Break(span) => self.compile_break(span.line),
            Stmt::Continue(span) => self.compile_continue(span.line),
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => self.compile_if(condition, consequence, alternative.as_ref()),
            Stmt::While {
                condition, body, ..
            } => self.compile_while(condition, body),
            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => self.compile_for(init.as_deref(), condition.as_ref(), update.as_deref(), body),
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => self.compile_switch(subject, cases, default.as_ref()),
            Stmt::Try {
                body,
                catches,
                finally,
                ..
            } => self.compile_try(body, catches, finally.as_ref()),
            Stmt::Throw { value, .. } => {
                self.compile_expression(value)?;
                self.emit(Opcode::Throw, &[]);
                Ok(())
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                ..
            } => self.compile_class(name, superclass.as_deref(), methods),
            Stmt::Import { items, path, .. } => self.compile_import(items, path),
            Stmt::Export { name, value, .. } => {
                if let Some(value) = value {
                    self.compile_assign(&AssignTarget::Name(name.clone()), value)?;
                }
                Ok(())
            }
        }
    }

    fn compile_assign(&mut self, target: &AssignTarget, value: &Expr) -> Result<(), CompileError> {
        match target {
            AssignTarget::InstanceVar(name) => {
                self.compile_expression(value)?;
                let idx = self.string_constant(name);
                self.emit(Opcode::SetInstance, &[idx]);
                Ok(())
            }
            AssignTarget::Name(name) => {
                // Register a new name before compiling the value, so the
                // value expression already sees the binding.
                let symbol = self.store_symbol(name);
                match value {
                    Expr::FnLit(params, body, _) => {
                        self.compile_function(params, body, Some(name), Some(name.to_string()))?;
                    }
                    _ => self.compile_expression(value)?,
                }
                self.emit_store(&symbol);
                Ok(())
            }
        }
    }

    /// Resolve an assignment target: the nearest scope already defining
    /// the name, else a fresh binding in the current scope.
    fn store_symbol(&mut self, name: &str) -> Symbol {
        let resolved = self.symbols.borrow_mut().resolve(name);
        let symbol = match resolved {
            Some(s) if matches!(s.scope, SymbolScope::Global | SymbolScope::Local | SymbolScope::Free) => s,
            // Builtins and function self-names are shadowed by a fresh
            // binding rather than assigned through.
            _ => self.symbols.borrow_mut().define(name),
        };
        self.record_global(&symbol);
        symbol
    }

    fn emit_store(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::SetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::SetFree, &[symbol.index]),
            SymbolScope::Builtin | SymbolScope::Function => unreachable!("not a storage scope"),
        };
    }

    fn emit_load(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        };
    }

    fn compile_identifier(&mut self, name: &str) -> Result<(), CompileError> {
        let resolved = self.symbols.borrow_mut().resolve(name);
        let symbol = match resolved {
            Some(s) => s,
            None => {
                // Unknown names become late-bound globals: reading the
                // slot before any assignment raises a `name` error at
                // runtime (or builds an exception constructor for
                // capitalized names), matching the evaluator.
                let root = self.root_table();
                let symbol = root.borrow_mut().define(name);
                self.record_global(&symbol);
                symbol
            }
        };
        self.record_global(&symbol);
        self.emit_load(&symbol);
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>) -> Result<(), CompileError> {
        match value {
            Some(expr) => self.compile_expression(expr)?,
            None => {
                // Close active trys (running finallys) before leaving.
                self.unwind_trys(0)?;
                self.emit(Opcode::ReturnVoid, &[]);
                return Ok(());
            }
        }
        self.unwind_trys(0)?;
        self.emit(Opcode::Return, &[]);
        Ok(())
    }

    /// Emit `TryEnd` + inlined finally for every try context above
    /// `down_to`, innermost first. Leaves the compile-time context stack
    /// as it was, since code after the branch is still inside the trys.
    fn unwind_trys(&mut self, down_to: usize) -> Result<(), CompileError> {
        let saved: Vec<TryContext> = self.scope().trys.clone();
        while self.scope().trys.len() > down_to {
            let ctx = self.scope().trys.pop().expect("try context");
            self.emit(Opcode::TryEnd, &[]);
            if let Some(finally) = &ctx.finally {
                self.compile_finally_inline(finally)?;
            }
        }
        self.scope().trys = saved;
        Ok(())
    }

    /// A finally body runs for effect only; its value is discarded.
    fn compile_finally_inline(&mut self, finally: &Block) -> Result<(), CompileError> {
        self.compile_block(finally)?;
        self.emit(Opcode::Pop, &[]);
        self.emit(Opcode::Finally, &[]);
        Ok(())
    }

    fn compile_break(&mut self, line: usize) -> Result<(), CompileError> {
        let Some(ctx) = self.scope().loops.last().cloned() else {
            return Err(CompileError::BreakOutsideLoop { line });
        };
        self.unwind_trys(ctx.try_depth_at_entry)?;
        let extra_temps = self.scope().temp_depth - ctx.temp_depth_at_entry;
        for _ in 0..extra_temps {
            self.emit(Opcode::Pop, &[]);
        }
        let pos = self.emit(Opcode::Jump, &[PENDING]);
        self.scope()
            .loops
            .last_mut()
            .expect("loop context")
            .break_jumps
            .push(pos);
        Ok(())
    }

    fn compile_continue(&mut self, line: usize) -> Result<(), CompileError> {
        let Some(ctx) = self.scope().loops.last().cloned() else {
            return Err(CompileError::ContinueOutsideLoop { line });
        };
        self.unwind_trys(ctx.try_depth_at_entry)?;
        let extra_temps = self.scope().temp_depth - ctx.temp_depth_at_entry;
        for _ in 0..extra_temps {
            self.emit(Opcode::Pop, &[]);
        }
        let pos = self.emit(Opcode::Jump, &[PENDING]);
        self.scope()
            .loops
            .last_mut()
            .expect("loop context")
            .continue_jumps
            .push(pos);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<(), CompileError> {
        self.compile_expression(condition)?;
        let jump_else = self.emit(Opcode::JumpNotTruthy, &[PENDING]);
        self.compile_block(consequence)?;
        let jump_end = self.emit(Opcode::Jump, &[PENDING]);
        self.patch_jump_here(jump_else);
        match alternative {
            Some(block) => self.compile_block(block)?,
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }
        self.patch_jump_here(jump_end);
        Ok(())
    }

    fn enter_loop(&mut self) {
        let temp_depth = self.scope().temp_depth;
        let try_depth = self.scope().trys.len();
        self.scope().loops.push(LoopContext {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            temp_depth_at_entry: temp_depth,
            try_depth_at_entry: try_depth,
        });
    }

    /// Patch the loop's pending jumps: breaks to the current position,
    /// continues to `continue_target`.
    fn leave_loop(&mut self, continue_target: usize) {
        let ctx = self.scope().loops.pop().expect("loop context");
        for pos in ctx.break_jumps {
            self.patch_jump_here(pos);
        }
        for pos in ctx.continue_jumps {
            self.change_operand(pos, continue_target);
        }
    }

    fn compile_while(&mut self, condition: &Expr, body: &Block) -> Result<(), CompileError> {
        let start = self.here();
        self.compile_expression(condition)?;
        let jump_out = self.emit(Opcode::JumpNotTruthy, &[PENDING]);
        self.enter_loop();
        self.compile_block(body)?;
        self.emit(Opcode::Pop, &[]);
        self.emit(Opcode::Jump, &[start]);
        self.patch_jump_here(jump_out);
        self.leave_loop(start);
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        update: Option<&Stmt>,
        body: &Block,
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.compile_statement(init)?;
            if stmt_effect(init) == StmtEffect::Value {
                self.emit(Opcode::Pop, &[]);
            }
        }
        let start = self.here();
        let jump_out = match condition {
            Some(cond) => {
                self.compile_expression(cond)?;
                Some(self.emit(Opcode::JumpNotTruthy, &[PENDING]))
            }
            None => None,
        };
        self.enter_loop();
        self.compile_block(body)?;
        self.emit(Opcode::Pop, &[]);
        // `continue` lands on the update expression, not the condition.
        let update_start = self.here();
        if let Some(update) = update {
            self.compile_statement(update)?;
            if stmt_effect(update) == StmtEffect::Value {
                self.emit(Opcode::Pop, &[]);
            }
        }
        self.emit(Opcode::Jump, &[start]);
        if let Some(pos) = jump_out {
            self.patch_jump_here(pos);
        }
        self.leave_loop(update_start);
        Ok(())
    }

    fn compile_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&Block>,
    ) -> Result<(), CompileError> {
        self.compile_expression(subject)?;
        self.scope().temp_depth += 1;
        let mut case_jumps: Vec<Vec<usize>> = Vec::with_capacity(cases.len());
        for case in cases {
            let mut jumps = Vec::with_capacity(case.values.len());
            for value in &case.values {
                self.emit(Opcode::Dup, &[]);
                self.compile_expression(value)?;
                self.emit(Opcode::Eq, &[]);
                jumps.push(self.emit(Opcode::JumpTruthy, &[PENDING]));
            }
            case_jumps.push(jumps);
        }
        // No case matched: drop the subject and run the default.
        self.emit(Opcode::Pop, &[]);
        self.scope().temp_depth -= 1;
        match default {
            Some(block) => self.compile_block(block)?,
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }
        let mut end_jumps = vec![self.emit(Opcode::Jump, &[PENDING])];
        for (case, jumps) in cases.iter().zip(case_jumps) {
            for pos in jumps {
                self.patch_jump_here(pos);
            }
            self.emit(Opcode::Pop, &[]);
            self.compile_block(&case.body)?;
            end_jumps.push(self.emit(Opcode::Jump, &[PENDING]));
        }
        for pos in end_jumps {
            self.patch_jump_here(pos);
        }
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &Block,
        catches: &[CatchClause],
        finally: Option<&Block>,
    ) -> Result<(), CompileError> {
        let try_begin = self.emit(Opcode::TryBegin, &[PENDING]);
        self.scope().trys.push(TryContext {
            finally: finally.cloned(),
        });
        self.compile_block(body)?;
        self.scope().trys.pop();
        self.emit(Opcode::TryEnd, &[]);
        if let Some(fin) = finally {
            self.compile_finally_inline(fin)?;
        }
        let mut end_jumps = vec![self.emit(Opcode::Jump, &[PENDING])];

        // Catch dispatch. The VM lands here with the exception pushed.
        self.patch_jump_here(try_begin);
        // A guard handler makes the finally run even when a catch body
        // (or the rethrow below) raises.
        let guard = match finally {
            Some(fin) => {
                let pos = self.emit(Opcode::TryBegin, &[PENDING]);
                self.scope().trys.push(TryContext {
                    finally: Some(fin.clone()),
                });
                Some(pos)
            }
            None => None,
        };
        for clause in catches {
            let type_idx = match &clause.kind {
                Some(kind) => self.string_constant(kind),
                None => 0,
            };
            self.emit(Opcode::Catch, &[type_idx]);
            let next_clause = self.emit(Opcode::JumpNotTruthy, &[PENDING]);
            let symbol = self.store_symbol(&clause.name);
            self.emit_store(&symbol);
            self.compile_block(&clause.body)?;
            // The epilogue runs with the guard handler already popped, so
            // compile it outside the guard context.
            let guard_ctx = guard.as_ref().map(|_| {
                self.emit(Opcode::TryEnd, &[]);
                self.scope().trys.pop().expect("guard context")
            });
            if let Some(fin) = finally {
                self.compile_finally_inline(fin)?;
            }
            end_jumps.push(self.emit(Opcode::Jump, &[PENDING]));
            if let Some(ctx) = guard_ctx {
                self.scope().trys.push(ctx);
            }
            self.patch_jump_here(next_clause);
        }
        // No clause matched: rethrow (after closing the guard and running
        // the finally ourselves, so it does not run twice).
        if guard.is_some() {
            self.emit(Opcode::TryEnd, &[]);
            self.scope().trys.pop();
        }
        if let Some(fin) = finally {
            self.compile_finally_inline(fin)?;
        }
        self.emit(Opcode::Throw, &[]);
        if let Some(guard_pos) = guard {
            // Exception escaped a catch body: finally, then propagate.
            self.patch_jump_here(guard_pos);
            if let Some(fin) = finally {
                self.compile_finally_inline(fin)?;
            }
            self.emit(Opcode::Throw, &[]);
        }
        for pos in end_jumps {
            self.patch_jump_here(pos);
        }
        Ok(())
    }

    fn compile_class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        methods: &[MethodDef],
    ) -> Result<(), CompileError> {
        let name_idx = self.string_constant(name);
        self.emit(Opcode::Class, &[name_idx, methods.len()]);
        if let Some(sup) = superclass {
            self.compile_identifier(sup)?;
            self.emit(Opcode::Inherit, &[]);
        }
        for method in methods {
            self.method_names.push(method.name.clone());
            let result = self.compile_function(
                &method.params,
                &method.body,
                None,
                Some(format!("{}.{}", name, method.name)),
            );
            self.method_names.pop();
            result?;
            let method_idx = self.string_constant(&method.name);
            self.emit(Opcode::Method, &[method_idx]);
        }
        let symbol = self.store_symbol(name);
        self.emit_store(&symbol);
        Ok(())
    }

    fn compile_import(&mut self, items: &[ImportItem], path: &str) -> Result<(), CompileError> {
        let Some(loader) = self.loader else {
            return Err(CompileError::ImportsUnavailable);
        };
        let exports = loader
            .load(path)
            .map_err(|message| CompileError::ImportFailed {
                path: path.to_string(),
                message,
            })?;
        for item in items {
            let value = exports
                .iter()
                .find(|(name, _)| name == &item.name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| CompileError::UnknownExport {
                    path: path.to_string(),
                    name: item.name.clone(),
                })?;
            let binding = item.alias.as_ref().unwrap_or(&item.name);
            let symbol = self.store_symbol(binding);
            let const_idx = self.add_constant(value);
            self.emit(Opcode::Constant, &[const_idx]);
            self.emit_store(&symbol);
        }
        Ok(())
    }

    // ── Expressions ──

    fn compile_expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Ident(name, _) => self.compile_identifier(name),
            Expr::InstanceVar(name, _) => {
                let idx = self.string_constant(name);
                self.emit(Opcode::GetInstance, &[idx]);
                Ok(())
            }
            Expr::IntLit(n, _) => {
                let idx = self.add_constant(Value::Int(*n));
                self.emit(Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::FloatLit(x, _) => {
                let idx = self.add_constant(Value::Float(*x));
                self.emit(Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::StringLit(s, _) => {
                let idx = self.string_constant(s);
                self.emit(Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::BoolLit(b, _) => {
                self.emit(if *b { Opcode::True } else { Opcode::False }, &[]);
                Ok(())
            }
            Expr::NullLit(_) => {
                self.emit(Opcode::Null, &[]);
                Ok(())
            }
            Expr::Prefix(op, operand, _) => {
                self.compile_expression(operand)?;
                match op {
                    PrefixOp::Neg => self.emit(Opcode::Minus, &[]),
                    PrefixOp::Not => self.emit(Opcode::Not, &[]),
                };
                Ok(())
            }
            Expr::Infix(left, op, right, _) => self.compile_infix(left, *op, right),
            Expr::Array(items, _) => {
                for item in items {
                    self.compile_expression(item)?;
                }
                self.emit(Opcode::Array, &[items.len()]);
                Ok(())
            }
            Expr::Hash(pairs, _) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len()]);
                Ok(())
            }
            Expr::Index(object, index, _) => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
                Ok(())
            }
            Expr::Property(object, name, _) => {
                self.compile_expression(object)?;
                let idx = self.string_constant(name);
                self.emit(Opcode::GetProperty, &[idx]);
                Ok(())
            }
            Expr::Call(callee, args, _) => self.compile_call(callee, args),
            Expr::FnLit(params, body, _) => self.compile_function(params, body, None, None),
            Expr::New(class, args, _) => {
                self.compile_expression(class)?;
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Opcode::Call, &[args.len()]);
                Ok(())
            }
            Expr::Super(args, span) => {
                let Some(method) = self.method_names.last().cloned() else {
                    return Err(CompileError::SuperOutsideMethod { line: span.line });
                };
                let idx = self.string_constant(&method);
                self.emit(Opcode::GetSuper, &[idx]);
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Opcode::Call, &[args.len()]);
                Ok(())
            }
        }
    }

    fn compile_infix(&mut self, left: &Expr, op: InfixOp, right: &Expr) -> Result<(), CompileError> {
        // Short-circuit forms keep the deciding operand as the result.
        match op {
            InfixOp::And => {
                self.compile_expression(left)?;
                self.emit(Opcode::Dup, &[]);
                let short = self.emit(Opcode::JumpNotTruthy, &[PENDING]);
                self.emit(Opcode::Pop, &[]);
                self.compile_expression(right)?;
                self.patch_jump_here(short);
                return Ok(());
            }
            InfixOp::Or => {
                self.compile_expression(left)?;
                self.emit(Opcode::Dup, &[]);
                let short = self.emit(Opcode::JumpTruthy, &[PENDING]);
                self.emit(Opcode::Pop, &[]);
                self.compile_expression(right)?;
                self.patch_jump_here(short);
                return Ok(());
            }
            _ => {}
        }
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        match op {
            InfixOp::Add => self.emit(Opcode::Add, &[]),
            InfixOp::Sub => self.emit(Opcode::Sub, &[]),
            InfixOp::Mul => self.emit(Opcode::Mul, &[]),
            InfixOp::Div => self.emit(Opcode::Div, &[]),
            InfixOp::Mod => self.emit(Opcode::Mod, &[]),
            InfixOp::Eq => self.emit(Opcode::Eq, &[]),
            InfixOp::NotEq => self.emit(Opcode::Ne, &[]),
            InfixOp::Gt => self.emit(Opcode::Gt, &[]),
            InfixOp::Lt => self.emit(Opcode::Lt, &[]),
            InfixOp::GtEq => self.emit(Opcode::Ge, &[]),
            InfixOp::LtEq => self.emit(Opcode::Le, &[]),
            InfixOp::And | InfixOp::Or => unreachable!("handled above"),
        };
        Ok(())
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        // `recv.m(args)` fuses lookup and call into `Invoke`.
        if let Expr::Property(object, name, _) = callee {
            self.compile_expression(object)?;
            let name_idx = self.string_constant(name);
            for arg in args {
                self.compile_expression(arg)?;
            }
            self.emit(Opcode::Invoke, &[name_idx, args.len()]);
            return Ok(());
        }
        self.compile_expression(callee)?;
        for arg in args {
            self.compile_expression(arg)?;
        }
        self.emit(Opcode::Call, &[args.len()]);
        Ok(())
    }

    /// Compile a function literal in its own scope. `self_name` lets the
    /// body refer to the binding it is being assigned to (recursion via
    /// `CurrentClosure`); `display_name` is carried for diagnostics.
    fn compile_function(
        &mut self,
        params: &[String],
        body: &Block,
        self_name: Option<&str>,
        display_name: Option<String>,
    ) -> Result<(), CompileError> {
        self.symbols = SymbolTable::enclosed(Rc::clone(&self.symbols));
        self.scopes.push(CompilationScope::default());
        if let Some(name) = self_name {
            self.symbols.borrow_mut().define_function_name(name);
        }
        for param in params {
            self.symbols.borrow_mut().define(param);
        }
        let result = self.compile_block(body);
        // Leave the scope even when the body failed, keeping the
        // compiler reusable after an error.
        let scope = self.scopes.pop().expect("function scope");
        let table = Rc::clone(&self.symbols);
        let outer = table.borrow().outer().expect("function table has an outer");
        self.symbols = outer;
        result?;

        let mut instructions = scope.instructions;
        instructions.extend(make(Opcode::Return, &[]));
        let (num_locals, free_symbols) = {
            let t = table.borrow();
            (t.num_definitions, t.free_symbols.clone())
        };
        let func = CompiledFunction {
            instructions,
            num_params: params.len(),
            num_locals,
            name: display_name,
        };
        let const_idx = self.add_constant(Value::CompiledFunction(Rc::new(func)));
        for free in &free_symbols {
            self.emit_load(free);
        }
        self.emit(Opcode::Closure, &[const_idx, free_symbols.len()]);
        Ok(())
    }
}
