//! Stack virtual machine.
//!
//! Executes bytecode with a fixed-capacity value stack, a globals array,
//! and a call-frame stack. Exceptions ride a stack of try-handler
//! records: `TryBegin` snapshots the stack pointer and frame index,
//! `Throw` unwinds to the innermost record and jumps to its catch
//! dispatch with the exception pushed. Calls of tree-walk `Function`
//! values (reaching the pool through compile-time imports) are delegated
//! to the evaluator, which shares the value model.

use crate::builtins;
use crate::eval::Evaluator;
use crate::logger::{LogLevel, VmLogger};
use crate::ops::{self, BinOp};
use crate::output::Output;
use crate::profile::Profiler;
use brio_core::bytecode::{read_u16, read_u8, Bytecode, Opcode};
use brio_core::errors::{ErrorKind, RuntimeError};
use brio_core::values::{
    BoundMethodObj, Builtin, ClassObj, ClosureObj, CompiledFunction, ErrorObj, HashKey, HashObj,
    InstanceObj, Value,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

/// One call record: the closure being executed, its instruction pointer,
/// the stack slot below which the caller's state lives, and the method
/// context (`self`, defining class) when the call is a method.
struct Frame {
    closure: Rc<ClosureObj>,
    ip: usize,
    base_pointer: usize,
    receiver: Option<Value>,
    defining_class: Option<Rc<ClassObj>>,
    /// Constructor frames push the receiver, not the return value.
    is_ctor: bool,
    started: Instant,
}

struct TryHandler {
    catch_ip: usize,
    sp: usize,
    frame_index: usize,
}

/// An in-flight exception unwinding through the dispatch loop.
struct VmException(Rc<ErrorObj>);

impl From<RuntimeError> for VmException {
    fn from(err: RuntimeError) -> Self {
        VmException(Rc::new(ErrorObj::from_runtime(err)))
    }
}

impl From<Rc<ErrorObj>> for VmException {
    fn from(err: Rc<ErrorObj>) -> Self {
        VmException(err)
    }
}

type Step = Result<(), VmException>;

pub struct Vm {
    constants: Vec<Value>,
    global_names: Vec<String>,
    globals: Vec<Option<Value>>,
    stack: Vec<Value>,
    sp: usize,
    frames: Vec<Frame>,
    handlers: Vec<TryHandler>,
    out: Output,
    logger: VmLogger,
    profiler: Profiler,
    /// Evaluator used for tree-walk function values that reach the VM
    /// through imported modules.
    delegate: Evaluator,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        let main = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            num_params: 0,
            num_locals: 0,
            name: Some("<main>".to_string()),
        });
        let main_closure = Rc::new(ClosureObj {
            func: main,
            free: RefCell::new(Vec::new()),
        });
        Self {
            constants: bytecode.constants,
            global_names: bytecode.global_names,
            globals: vec![None; GLOBALS_SIZE],
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            frames: vec![Frame {
                closure: main_closure,
                ip: 0,
                base_pointer: 0,
                receiver: None,
                defining_class: None,
                is_ctor: false,
                started: Instant::now(),
            }],
            handlers: Vec::new(),
            out: Output::Stdout,
            logger: VmLogger::default(),
            profiler: Profiler::new(),
            delegate: Evaluator::new(),
        }
    }

    pub fn with_output(mut self, out: Output) -> Self {
        self.out = out.clone();
        self.delegate = Evaluator::with_output(out);
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.logger = VmLogger::new(level);
        self
    }

    /// Replace the delegate evaluator (e.g. one wired to a module
    /// resolver) for tree-walk function calls.
    pub fn with_delegate(mut self, delegate: Evaluator) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Execute to completion, returning the program's final value.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        self.logger.info(|| "dispatch loop starting".to_string());
        while let Some(frame) = self.frames.last() {
            let func = Rc::clone(&frame.closure.func);
            let ip = frame.ip;
            if ip >= func.instructions.len() {
                if self.frames.len() == 1 {
                    break;
                }
                // Functions always end in an explicit return.
                return Err(RuntimeError::runtime(format!(
                    "instruction pointer ran off the end of {}",
                    func.name.as_deref().unwrap_or("<fn>")
                )));
            }
            let op = Opcode::from_u8(func.instructions[ip]).ok_or_else(|| {
                RuntimeError::runtime(format!(
                    "invalid opcode {} at instruction {}",
                    func.instructions[ip], ip
                ))
            })?;
            self.logger
                .trace(|| format!("{:04} {} (sp={})", ip, op.name(), self.sp));
            if let Err(VmException(err)) = self.execute(op, &func, ip) {
                self.unwind(err, ip)?;
            }
        }
        self.logger.info(|| {
            format!(
                "halted; {} call{} profiled",
                self.profiler.total_calls,
                if self.profiler.total_calls == 1 { "" } else { "s" }
            )
        });
        Ok(if self.sp > 0 {
            self.stack[self.sp - 1].clone()
        } else {
            Value::Null
        })
    }

    /// Route an exception to the innermost try handler, or surface it as
    /// the VM's fatal result with the faulting instruction offset.
    fn unwind(&mut self, err: Rc<ErrorObj>, ip: usize) -> Result<(), RuntimeError> {
        match self.handlers.pop() {
            Some(handler) => {
                while self.frames.len() > handler.frame_index + 1 {
                    self.pop_frame_for_unwind();
                }
                self.sp = handler.sp;
                self.stack[self.sp] = Value::Error(err);
                self.sp += 1;
                self.frames[handler.frame_index].ip = handler.catch_ip;
                Ok(())
            }
            None => {
                let kind = builtin_kind(&err.kind);
                let mut fatal = RuntimeError::new(
                    kind,
                    format!("{} (at instruction {})", err.message, ip),
                );
                if let Some(span) = err.span {
                    fatal = fatal.with_span(span);
                }
                Err(fatal)
            }
        }
    }

    fn pop_frame_for_unwind(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.profiler
                .record_elapsed(&frame.closure.func, frame.started.elapsed());
        }
    }

    // ── Stack primitives ──

    fn push(&mut self, value: Value) -> Step {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::runtime("stack overflow").into());
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        // Underflow here is a compiler bug, not a user-program error.
        assert!(self.sp > 0, "value stack underflow");
        self.sp -= 1;
        std::mem::replace(&mut self.stack[self.sp], Value::Null)
    }

    fn peek(&self) -> &Value {
        assert!(self.sp > 0, "value stack underflow");
        &self.stack[self.sp - 1]
    }

    fn drain_args(&mut self, argc: usize) -> Vec<Value> {
        let args = self.stack[self.sp - argc..self.sp].to_vec();
        self.sp -= argc;
        args
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least one frame")
    }

    fn constant_str(&self, idx: usize) -> Result<Rc<str>, VmException> {
        match self.constants.get(idx) {
            Some(Value::Str(s)) => Ok(Rc::clone(s)),
            _ => Err(RuntimeError::runtime(format!(
                "constant {} is not a name",
                idx
            ))
            .into()),
        }
    }

    // ── Dispatch ──

    fn execute(&mut self, op: Opcode, func: &Rc<CompiledFunction>, ip: usize) -> Step {
        let ins = &func.instructions;
        // Advance past the opcode and its operands before executing, so
        // jumps can overwrite the instruction pointer absolutely.
        let widths = op.operand_widths();
        let operand_bytes: usize = widths.iter().sum();
        self.frame_mut().ip = ip + 1 + operand_bytes;
        let operand = |index: usize| -> usize {
            let mut offset = ip + 1;
            for width in &widths[..index] {
                offset += width;
            }
            match widths[index] {
                2 => read_u16(ins, offset) as usize,
                _ => read_u8(ins, offset) as usize,
            }
        };

        match op {
            Opcode::Constant => {
                let value = self.constants[operand(0)].clone();
                self.push(value)?;
            }
            Opcode::Pop => {
                self.pop();
            }
            Opcode::Dup => {
                let top = self.peek().clone();
                self.push(top)?;
            }
            Opcode::Swap => {
                assert!(self.sp >= 2, "value stack underflow");
                self.stack.swap(self.sp - 1, self.sp - 2);
            }
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Null => self.push(Value::Null)?,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Ge
            | Opcode::Le => {
                let right = self.pop();
                let left = self.pop();
                let binop = BinOp::from_opcode(op).expect("binary opcode");
                let result = ops::binary(binop, &left, &right)?;
                self.push(result)?;
            }
            Opcode::And => {
                let right = self.pop();
                let left = self.pop();
                self.push(if left.is_truthy() { right } else { left })?;
            }
            Opcode::Or => {
                let right = self.pop();
                let left = self.pop();
                self.push(if left.is_truthy() { left } else { right })?;
            }
            Opcode::Not => {
                let value = self.pop();
                self.push(ops::not(&value))?;
            }
            Opcode::Minus => {
                let value = self.pop();
                let result = ops::negate(&value)?;
                self.push(result)?;
            }
            Opcode::Jump => {
                self.frame_mut().ip = operand(0);
            }
            Opcode::JumpNotTruthy => {
                let target = operand(0);
                if !self.pop().is_truthy() {
                    self.frame_mut().ip = target;
                }
            }
            Opcode::JumpTruthy => {
                let target = operand(0);
                if self.pop().is_truthy() {
                    self.frame_mut().ip = target;
                }
            }
            Opcode::GetGlobal => {
                let idx = operand(0);
                match self.globals[idx].clone() {
                    Some(value) => {
                        self.push(value)?;
                    }
                    None => {
                        let name = self
                            .global_names
                            .get(idx)
                            .cloned()
                            .unwrap_or_else(|| format!("<global {}>", idx));
                        // Capitalized unknown names are exception
                        // constructors, matching the evaluator.
                        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                            self.push(Value::ErrorCtor(Rc::from(name.as_str())))?;
                        } else {
                            return Err(RuntimeError::name_error(format!(
                                "undefined variable '{}'",
                                name
                            ))
                            .into());
                        }
                    }
                }
            }
            Opcode::SetGlobal => {
                let idx = operand(0);
                self.globals[idx] = Some(self.pop());
            }
            Opcode::GetLocal => {
                let bp = self.frames.last().expect("frame").base_pointer;
                let value = self.stack[bp + operand(0)].clone();
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let bp = self.frames.last().expect("frame").base_pointer;
                let slot = bp + operand(0);
                self.stack[slot] = self.pop();
            }
            Opcode::GetFree => {
                let closure = Rc::clone(&self.frames.last().expect("frame").closure);
                let value = closure.free.borrow()[operand(0)].clone();
                self.push(value)?;
            }
            Opcode::SetFree => {
                let closure = Rc::clone(&self.frames.last().expect("frame").closure);
                let value = self.pop();
                closure.free.borrow_mut()[operand(0)] = value;
            }
            Opcode::GetBuiltin => {
                let (_, builtin) = Builtin::ALL[operand(0)];
                self.push(builtin.value())?;
            }
            Opcode::CurrentClosure => {
                let closure = Rc::clone(&self.frames.last().expect("frame").closure);
                self.push(Value::Closure(closure))?;
            }
            Opcode::Array => {
                let count = operand(0);
                let items = self.drain_args(count);
                self.push(Value::array(items))?;
            }
            Opcode::Hash => {
                let count = operand(0);
                let pairs = self.drain_args(count * 2);
                let mut hash = HashObj::new();
                for pair in pairs.chunks(2) {
                    let key = HashKey::from_value(&pair[0])?;
                    hash.insert(key, pair[1].clone());
                }
                self.push(Value::hash(hash))?;
            }
            Opcode::Index => {
                let index = self.pop();
                let object = self.pop();
                let value = ops::index_read(&object, &index)?;
                self.push(value)?;
            }
            Opcode::SetIndex => {
                let value = self.pop();
                let index = self.pop();
                let object = self.pop();
                ops::index_write(&object, &index, value)?;
            }
            Opcode::GetProperty => {
                let name = self.constant_str(operand(0))?;
                let object = self.pop();
                let value = builtins::get_property(&object, &name)?;
                self.push(value)?;
            }
            Opcode::Call => {
                let argc = operand(0);
                let callee = self.stack[self.sp - 1 - argc].clone();
                self.call_value(callee, argc)?;
            }
            Opcode::Return => {
                let value = self.pop();
                self.return_from_frame(value)?;
            }
            Opcode::ReturnVoid => {
                self.return_from_frame(Value::Null)?;
            }
            Opcode::Closure => {
                let func_idx = operand(0);
                let free_count = operand(1);
                let Some(Value::CompiledFunction(compiled)) = self.constants.get(func_idx) else {
                    return Err(RuntimeError::runtime(format!(
                        "constant {} is not a function",
                        func_idx
                    ))
                    .into());
                };
                let compiled = Rc::clone(compiled);
                let free = self.drain_args(free_count);
                self.push(Value::Closure(Rc::new(ClosureObj {
                    func: compiled,
                    free: RefCell::new(free),
                })))?;
            }
            Opcode::Throw => {
                let value = self.pop();
                return Err(ops::to_error_obj(value).into());
            }
            Opcode::TryBegin => {
                let catch_ip = operand(0);
                self.handlers.push(TryHandler {
                    catch_ip,
                    sp: self.sp,
                    frame_index: self.frames.len() - 1,
                });
            }
            Opcode::TryEnd => {
                self.handlers.pop().expect("try handler underflow");
            }
            Opcode::Catch => {
                let type_idx = operand(0);
                let Value::Error(err) = self.peek() else {
                    return Err(RuntimeError::runtime(
                        "catch dispatch without an exception on the stack",
                    )
                    .into());
                };
                let matched = if type_idx == 0 {
                    true
                } else {
                    let kind = self.constant_str(type_idx)?;
                    *kind == err.kind
                };
                self.push(Value::Bool(matched))?;
            }
            Opcode::Finally => {
                // Marker closing an inlined finally body.
            }
            Opcode::Class => {
                let name = self.constant_str(operand(0))?;
                let _method_count = operand(1);
                self.push(Value::Class(Rc::new(ClassObj::new(name.to_string()))))?;
            }
            Opcode::Inherit => {
                let superclass = self.pop();
                let Value::Class(sup) = superclass else {
                    return Err(RuntimeError::type_error(format!(
                        "superclass must be a class, got {}",
                        superclass.type_name()
                    ))
                    .into());
                };
                let Value::Class(class) = self.peek() else {
                    return Err(RuntimeError::runtime("'inherit' without a class").into());
                };
                *class.superclass.borrow_mut() = Some(sup);
            }
            Opcode::Method => {
                let name = self.constant_str(operand(0))?;
                let method = self.pop();
                let Value::Class(class) = self.peek() else {
                    return Err(RuntimeError::runtime("method outside a class body").into());
                };
                class.methods.borrow_mut().insert(name.to_string(), method);
            }
            Opcode::Invoke => {
                let name = self.constant_str(operand(0))?;
                let argc = operand(1);
                let receiver = self.stack[self.sp - 1 - argc].clone();
                let callee = builtins::get_property(&receiver, &name)?;
                self.stack[self.sp - 1 - argc] = callee.clone();
                self.call_value(callee, argc)?;
            }
            Opcode::GetInstance => {
                let name = self.constant_str(operand(0))?;
                let instance = self.current_receiver()?;
                let value = instance.ivars.borrow().get(&*name).cloned();
                self.push(value.unwrap_or(Value::Null))?;
            }
            Opcode::SetInstance => {
                let name = self.constant_str(operand(0))?;
                let instance = self.current_receiver()?;
                let value = self.pop();
                instance.ivars.borrow_mut().insert(name.to_string(), value);
            }
            Opcode::GetSuper => {
                let name = self.constant_str(operand(0))?;
                let frame = self.frames.last().expect("frame");
                let (Some(receiver), Some(class)) =
                    (frame.receiver.clone(), frame.defining_class.clone())
                else {
                    return Err(RuntimeError::runtime("'super' outside a method").into());
                };
                let parent = class.superclass.borrow().clone().ok_or_else(|| {
                    VmException::from(RuntimeError::runtime(format!(
                        "{} has no superclass",
                        class.name
                    )))
                })?;
                let (method, owner) = parent.resolve_method(&name).ok_or_else(|| {
                    VmException::from(RuntimeError::name_error(format!(
                        "undefined method '{}' for {}",
                        name, parent.name
                    )))
                })?;
                self.push(Value::BoundMethod(Rc::new(BoundMethodObj {
                    receiver,
                    method,
                    owner,
                    name: name.to_string(),
                })))?;
            }
        }
        Ok(())
    }

    fn current_receiver(&self) -> Result<Rc<InstanceObj>, VmException> {
        match &self.frames.last().expect("frame").receiver {
            Some(Value::Instance(instance)) => Ok(Rc::clone(instance)),
            _ => Err(RuntimeError::runtime("instance variable access outside a method").into()),
        }
    }

    fn return_from_frame(&mut self, value: Value) -> Step {
        let frame = self.frames.pop().expect("frame");
        self.profiler
            .record_elapsed(&frame.closure.func, frame.started.elapsed());
        // Defensive: drop handlers opened in the finished frame.
        self.handlers
            .retain(|h| h.frame_index < self.frames.len());
        let result = if frame.is_ctor {
            frame.receiver.clone().expect("constructor receiver")
        } else {
            value
        };
        if self.frames.is_empty() {
            self.sp = 0;
        } else {
            self.sp = frame.base_pointer - 1;
        }
        self.push(result)
    }

    // ── Calls ──

    fn call_value(&mut self, callee: Value, argc: usize) -> Step {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc, None, None, false),
            Value::CompiledFunction(func) => self.call_closure(
                Rc::new(ClosureObj {
                    func,
                    free: RefCell::new(Vec::new()),
                }),
                argc,
                None,
                None,
                false,
            ),
            Value::Builtin(builtin) => {
                let args = self.drain_args(argc);
                self.sp -= 1;
                let result = builtins::apply_builtin(builtin, &args, &self.out)?;
                self.push(result)
            }
            Value::BuiltinMethod(method) => {
                let args = self.drain_args(argc);
                self.sp -= 1;
                let result = builtins::call_method(&method.receiver, &method.name, &args)?;
                self.push(result)
            }
            Value::ErrorCtor(kind) => {
                let args = self.drain_args(argc);
                self.sp -= 1;
                let result = builtins::call_error_ctor(&kind, &args)?;
                self.push(result)
            }
            Value::Class(class) => self.construct(class, argc),
            Value::BoundMethod(bound) => match &bound.method {
                Value::Closure(closure) => {
                    let closure = Rc::clone(closure);
                    self.call_closure(
                        closure,
                        argc,
                        Some(bound.receiver.clone()),
                        Some(Rc::clone(&bound.owner)),
                        false,
                    )
                }
                Value::Function(_) => self.delegate_call(Value::BoundMethod(bound), argc),
                other => Err(RuntimeError::type_error(format!(
                    "method '{}' is not callable here ({})",
                    bound.name,
                    other.type_name()
                ))
                .into()),
            },
            callee @ Value::Function(_) => self.delegate_call(callee, argc),
            other => Err(RuntimeError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<ClosureObj>,
        argc: usize,
        receiver: Option<Value>,
        defining_class: Option<Rc<ClassObj>>,
        is_ctor: bool,
    ) -> Step {
        let func = Rc::clone(&closure.func);
        if argc != func.num_params {
            return Err(RuntimeError::type_error(format!(
                "{} expects {} argument{}, got {}",
                func.name.as_deref().unwrap_or("function"),
                func.num_params,
                if func.num_params == 1 { "" } else { "s" },
                argc
            ))
            .into());
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::runtime("stack overflow: call depth exceeded").into());
        }
        let base_pointer = self.sp - argc;
        let frame_top = base_pointer + func.num_locals;
        if frame_top > STACK_SIZE {
            return Err(RuntimeError::runtime("stack overflow").into());
        }
        for slot in self.sp..frame_top {
            self.stack[slot] = Value::Null;
        }
        self.sp = frame_top;
        self.profiler.record_call(&func);
        self.logger.debug(|| {
            format!(
                "call {} (argc={}, locals={})",
                func.name.as_deref().unwrap_or("<fn>"),
                argc,
                func.num_locals
            )
        });
        self.frames.push(Frame {
            closure,
            ip: 0,
            base_pointer,
            receiver,
            defining_class,
            is_ctor,
            started: Instant::now(),
        });
        Ok(())
    }

    fn construct(&mut self, class: Rc<ClassObj>, argc: usize) -> Step {
        match class.resolve_method("initialize") {
            Some((Value::Closure(init), owner)) => {
                let instance = Value::Instance(Rc::new(InstanceObj::new(Rc::clone(&class))));
                self.call_closure(init, argc, Some(instance), Some(owner), true)
            }
            // Classes loaded from evaluated modules carry tree-walk
            // methods; the evaluator constructs those.
            Some((Value::Function(_), _)) => self.delegate_call(Value::Class(class), argc),
            Some((other, _)) => Err(RuntimeError::type_error(format!(
                "initialize of {} is not callable ({})",
                class.name,
                other.type_name()
            ))
            .into()),
            None => {
                if argc != 0 {
                    return Err(RuntimeError::type_error(format!(
                        "{}.new expects 0 arguments, got {}",
                        class.name, argc
                    ))
                    .into());
                }
                self.sp -= 1;
                self.push(Value::Instance(Rc::new(InstanceObj::new(class))))
            }
        }
    }

    fn delegate_call(&mut self, callee: Value, argc: usize) -> Step {
        let args = self.drain_args(argc);
        self.sp -= 1;
        let result = self.delegate.call_external(callee, args)?;
        self.push(result)
    }
}

fn builtin_kind(kind: &str) -> ErrorKind {
    match kind {
        "parse" => ErrorKind::Parse,
        "name" => ErrorKind::Name,
        "type" => ErrorKind::Type,
        "arith" => ErrorKind::Arith,
        "index" => ErrorKind::Index,
        "import" => ErrorKind::Import,
        "runtime" => ErrorKind::Runtime,
        user => ErrorKind::User(user.to_string()),
    }
}
