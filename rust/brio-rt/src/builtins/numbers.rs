//! Numeric methods. `abs` preserves the receiver's kind; `pow` stays an
//! Integer for non-negative integer exponents; the rest return Float.

use super::{expect_arity, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::Value;

const METHODS: &[&str] = &["abs", "floor", "ceil", "round", "sqrt", "pow"];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(x) => *x,
        _ => unreachable!("numeric receiver"),
    }
}

pub fn call(receiver: &Value, name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "abs" => {
            expect_arity("abs", args, 0)?;
            match receiver {
                Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
                Value::Float(x) => Ok(Value::Float(x.abs())),
                _ => unreachable!("numeric receiver"),
            }
        }
        "floor" => {
            expect_arity("floor", args, 0)?;
            match receiver {
                Value::Int(n) => Ok(Value::Int(*n)),
                other => Ok(Value::Float(as_f64(other).floor())),
            }
        }
        "ceil" => {
            expect_arity("ceil", args, 0)?;
            match receiver {
                Value::Int(n) => Ok(Value::Int(*n)),
                other => Ok(Value::Float(as_f64(other).ceil())),
            }
        }
        "round" => {
            expect_arity("round", args, 0)?;
            match receiver {
                Value::Int(n) => Ok(Value::Int(*n)),
                other => Ok(Value::Float(as_f64(other).round())),
            }
        }
        "sqrt" => {
            expect_arity("sqrt", args, 0)?;
            Ok(Value::Float(as_f64(receiver).sqrt()))
        }
        "pow" => {
            expect_arity("pow", args, 1)?;
            match (receiver, &args[0]) {
                (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
                    match base.checked_pow((*exp).min(u32::MAX as i64) as u32) {
                        Some(n) => Ok(Value::Int(n)),
                        None => Ok(Value::Float((*base as f64).powf(*exp as f64))),
                    }
                }
                (base, Value::Int(exp)) => Ok(Value::Float(as_f64(base).powf(*exp as f64))),
                (base, Value::Float(exp)) => Ok(Value::Float(as_f64(base).powf(*exp))),
                (_, other) => Err(RuntimeError::type_error(format!(
                    "pow expects a numeric exponent, got {}",
                    other.type_name()
                ))),
            }
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for {}",
            name,
            receiver.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_preserves_kind() {
        assert!(matches!(
            call(&Value::Int(-3), "abs", &[]).unwrap(),
            Value::Int(3)
        ));
        assert!(matches!(
            call(&Value::Float(-2.5), "abs", &[]).unwrap(),
            Value::Float(x) if x == 2.5
        ));
    }

    #[test]
    fn floor_of_float_rounds_down() {
        assert!(matches!(
            call(&Value::Float(2.9), "floor", &[]).unwrap(),
            Value::Float(x) if x == 2.0
        ));
    }

    #[test]
    fn integer_pow_stays_integer() {
        assert!(matches!(
            call(&Value::Int(2), "pow", &[Value::Int(10)]).unwrap(),
            Value::Int(1024)
        ));
        assert!(matches!(
            call(&Value::Int(2), "pow", &[Value::Int(-1)]).unwrap(),
            Value::Float(x) if x == 0.5
        ));
    }

    #[test]
    fn sqrt_always_floats() {
        assert!(matches!(
            call(&Value::Int(9), "sqrt", &[]).unwrap(),
            Value::Float(x) if x == 3.0
        ));
    }
}
