//! Built-in functions and dot-method dispatch.
//!
//! `obj.name` resolves structurally on the receiver's shape: some lookups
//! produce a final value immediately (`"abc".length`), the rest produce a
//! method wrapper that a later call consumes. One dispatch table serves
//! both the evaluator and the VM.

pub mod arrays;
pub mod hashes;
pub mod json;
pub mod numbers;
pub mod strings;
pub mod time;

use crate::output::Output;
use brio_core::errors::RuntimeError;
use brio_core::values::{
    Builtin, BuiltinMethodObj, BoundMethodObj, ErrorObj, Namespace, Value,
};
use std::rc::Rc;

pub type BuiltinResult = Result<Value, RuntimeError>;

fn wrapper(receiver: &Value, name: &str) -> Value {
    Value::BuiltinMethod(Rc::new(BuiltinMethodObj {
        receiver: receiver.clone(),
        name: Rc::from(name),
    }))
}

fn unknown_property(receiver: &Value, name: &str) -> BuiltinResult {
    Err(RuntimeError::name_error(format!(
        "unknown property '{}' for {}",
        name,
        receiver.type_name()
    )))
}

/// Resolve `receiver.name` to a final value or a callable wrapper.
pub fn get_property(receiver: &Value, name: &str) -> BuiltinResult {
    match receiver {
        Value::Str(s) => match name {
            "length" => Ok(Value::Int(s.chars().count() as i64)),
            _ if strings::is_method(name) => Ok(wrapper(receiver, name)),
            _ => unknown_property(receiver, name),
        },
        Value::Array(items) => match name {
            "length" => Ok(Value::Int(items.borrow().len() as i64)),
            "first" => Ok(items.borrow().first().cloned().unwrap_or(Value::Null)),
            "last" => Ok(items.borrow().last().cloned().unwrap_or(Value::Null)),
            _ if arrays::is_method(name) => Ok(wrapper(receiver, name)),
            _ => unknown_property(receiver, name),
        },
        Value::Hash(hash) => match name {
            "length" | "size" => Ok(Value::Int(hash.borrow().len() as i64)),
            "empty" => Ok(Value::Bool(hash.borrow().is_empty())),
            "keys" => Ok(hashes::keys(hash)),
            "values" => Ok(hashes::values(hash)),
            _ if hashes::is_method(name) => Ok(wrapper(receiver, name)),
            _ => unknown_property(receiver, name),
        },
        Value::Int(_) | Value::Float(_) => {
            if numbers::is_method(name) {
                Ok(wrapper(receiver, name))
            } else {
                unknown_property(receiver, name)
            }
        }
        Value::Instance(instance) => match instance.class.resolve_method(name) {
            Some((method, owner)) => Ok(Value::BoundMethod(Rc::new(BoundMethodObj {
                receiver: receiver.clone(),
                method,
                owner,
                name: name.to_string(),
            }))),
            None => Err(RuntimeError::name_error(format!(
                "undefined method '{}' for {}",
                name, instance.class.name
            ))),
        },
        Value::Error(err) => match name {
            "kind" => Ok(Value::str(err.kind.clone())),
            "message" => Ok(Value::str(err.message.clone())),
            "payload" => Ok(err.payload.clone().unwrap_or(Value::Null)),
            _ => unknown_property(receiver, name),
        },
        Value::Namespace(Namespace::Json) => {
            if json::is_method(name) {
                Ok(wrapper(receiver, name))
            } else {
                unknown_property(receiver, name)
            }
        }
        Value::Namespace(Namespace::Time) => {
            if time::is_method(name) {
                Ok(wrapper(receiver, name))
            } else {
                unknown_property(receiver, name)
            }
        }
        other => unknown_property(other, name),
    }
}

/// Invoke a method wrapper produced by [`get_property`].
pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> BuiltinResult {
    match receiver {
        Value::Str(s) => strings::call(s, name, args),
        Value::Array(items) => arrays::call(receiver, items, name, args),
        Value::Hash(hash) => hashes::call(receiver, hash, name, args),
        Value::Int(_) | Value::Float(_) => numbers::call(receiver, name, args),
        Value::Namespace(Namespace::Json) => json::call(name, args),
        Value::Namespace(Namespace::Time) => time::call(name, args),
        other => Err(RuntimeError::type_error(format!(
            "{} has no callable methods",
            other.type_name()
        ))),
    }
}

/// Apply one of the global builtin functions.
pub fn apply_builtin(builtin: Builtin, args: &[Value], out: &Output) -> BuiltinResult {
    match builtin {
        Builtin::Print => {
            let line = args
                .iter()
                .map(|v| v.display_string())
                .collect::<Vec<_>>()
                .join(" ");
            out.write(line);
            Ok(Value::Null)
        }
        Builtin::Len => {
            expect_arity("len", args, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Array(items) => Ok(Value::Int(items.borrow().len() as i64)),
                Value::Hash(hash) => Ok(Value::Int(hash.borrow().len() as i64)),
                other => Err(RuntimeError::type_error(format!(
                    "len expects a String, Array, or Hash, got {}",
                    other.type_name()
                ))),
            }
        }
        Builtin::Keys => {
            expect_arity("keys", args, 1)?;
            match &args[0] {
                Value::Hash(hash) => Ok(hashes::keys(hash)),
                other => Err(RuntimeError::type_error(format!(
                    "keys expects a Hash, got {}",
                    other.type_name()
                ))),
            }
        }
        Builtin::Values => {
            expect_arity("values", args, 1)?;
            match &args[0] {
                Value::Hash(hash) => Ok(hashes::values(hash)),
                other => Err(RuntimeError::type_error(format!(
                    "values expects a Hash, got {}",
                    other.type_name()
                ))),
            }
        }
        Builtin::TypeOf => {
            expect_arity("type", args, 1)?;
            Ok(Value::str(args[0].type_name().to_string()))
        }
        Builtin::Regexp => {
            expect_arity("Regexp", args, 1)?;
            let Value::Str(pattern) = &args[0] else {
                return Err(RuntimeError::type_error(format!(
                    "Regexp expects a String pattern, got {}",
                    args[0].type_name()
                )));
            };
            let regex = regex::Regex::new(pattern).map_err(|e| {
                RuntimeError::type_error(format!("invalid regular expression: {}", e))
            })?;
            Ok(Value::Regexp(Rc::new(regex)))
        }
        // Namespace entries bind as namespace values and are never
        // callable builtins.
        Builtin::Json | Builtin::Time => Err(RuntimeError::type_error(format!(
            "{} is a namespace, not a function",
            builtin.name()
        ))),
    }
}

/// `X("message", payload?)` for an unresolved capitalized identifier
/// builds a user-kinded exception value.
pub fn call_error_ctor(kind: &str, args: &[Value]) -> BuiltinResult {
    if args.len() > 2 {
        return Err(RuntimeError::type_error(format!(
            "{} expects at most 2 arguments, got {}",
            kind,
            args.len()
        )));
    }
    let message = args
        .first()
        .map(|v| v.display_string())
        .unwrap_or_default();
    Ok(Value::Error(Rc::new(ErrorObj {
        kind: kind.to_string(),
        message,
        payload: args.get(1).cloned(),
        span: None,
    })))
}

pub(crate) fn expect_arity(name: &str, args: &[Value], count: usize) -> Result<(), RuntimeError> {
    if args.len() != count {
        return Err(RuntimeError::type_error(format!(
            "{} expects {} argument{}, got {}",
            name,
            count,
            if count == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn expect_arity_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::type_error(format!(
            "{} expects {} to {} arguments, got {}",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str, RuntimeError> {
    match &args[idx] {
        Value::Str(s) => Ok(s),
        other => Err(RuntimeError::type_error(format!(
            "{} expects a String argument, got {}",
            name,
            other.type_name()
        ))),
    }
}

pub(crate) fn int_arg(name: &str, args: &[Value], idx: usize) -> Result<i64, RuntimeError> {
    match &args[idx] {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::type_error(format!(
            "{} expects an Integer argument, got {}",
            name,
            other.type_name()
        ))),
    }
}
