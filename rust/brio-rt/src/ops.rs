//! Operator semantics shared by the evaluator and the VM.
//!
//! Both engines funnel infix operators, prefix operators, and index
//! reads/writes through these functions, which is what keeps the
//! "same program, same value" property between the two pipelines cheap
//! to maintain.

use brio_core::ast::InfixOp;
use brio_core::bytecode::Opcode;
use brio_core::errors::RuntimeError;
use brio_core::values::{values_equal, HashKey, Value};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn from_infix(op: InfixOp) -> Option<BinOp> {
        let mapped = match op {
            InfixOp::Add => BinOp::Add,
            InfixOp::Sub => BinOp::Sub,
            InfixOp::Mul => BinOp::Mul,
            InfixOp::Div => BinOp::Div,
            InfixOp::Mod => BinOp::Mod,
            InfixOp::Eq => BinOp::Eq,
            InfixOp::NotEq => BinOp::Ne,
            InfixOp::Lt => BinOp::Lt,
            InfixOp::Gt => BinOp::Gt,
            InfixOp::LtEq => BinOp::Le,
            InfixOp::GtEq => BinOp::Ge,
            // Short-circuit forms never reach the shared path.
            InfixOp::And | InfixOp::Or => return None,
        };
        Some(mapped)
    }

    pub fn from_opcode(op: Opcode) -> Option<BinOp> {
        let mapped = match op {
            Opcode::Add => BinOp::Add,
            Opcode::Sub => BinOp::Sub,
            Opcode::Mul => BinOp::Mul,
            Opcode::Div => BinOp::Div,
            Opcode::Mod => BinOp::Mod,
            Opcode::Eq => BinOp::Eq,
            Opcode::Ne => BinOp::Ne,
            Opcode::Lt => BinOp::Lt,
            Opcode::Gt => BinOp::Gt,
            Opcode::Le => BinOp::Le,
            Opcode::Ge => BinOp::Ge,
            _ => return None,
        };
        Some(mapped)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        }
    }
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinOp::Add => add(left, right),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arith(op, left, right),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => compare(op, left, right),
    }
}

fn type_mismatch(op: BinOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand types for '{}': {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn is_string_coercible(value: &Value) -> bool {
    matches!(
        value,
        Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Null
    )
}

fn add(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        // `+` with one string operand coerces the other side through its
        // canonical string form.
        (Value::Str(a), b) if is_string_coercible(b) => {
            Ok(Value::str(format!("{}{}", a, b.display_string())))
        }
        (a, Value::Str(b)) if is_string_coercible(a) => {
            Ok(Value::str(format!("{}{}", a.display_string(), b)))
        }
        (a, b) => Err(type_mismatch(BinOp::Add, a, b)),
    }
}

fn arith(op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arith(op, *a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_arith(op, *a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_arith(op, *a, *b as f64))),
        (a, b) => Err(type_mismatch(op, a, b)),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeError> {
    match op {
        BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
        BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
        BinOp::Div => {
            if b == 0 {
                Err(RuntimeError::arith("division by zero"))
            } else {
                Ok(Value::Int(a.wrapping_div(b)))
            }
        }
        BinOp::Mod => {
            if b == 0 {
                Err(RuntimeError::arith("modulo by zero"))
            } else {
                Ok(Value::Int(a.wrapping_rem(b)))
            }
        }
        _ => unreachable!("not an arithmetic op"),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        _ => unreachable!("not an arithmetic op"),
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = match (left, right) {
        (Value::Int(a), Value::Int(b)) => (*a as f64, *b as f64),
        (Value::Float(a), Value::Float(b)) => (*a, *b),
        (Value::Int(a), Value::Float(b)) => (*a as f64, *b),
        (Value::Float(a), Value::Int(b)) => (*a, *b as f64),
        (a, b) => return Err(type_mismatch(op, a, b)),
    };
    let result = match op {
        BinOp::Lt => a < b,
        BinOp::Gt => a > b,
        BinOp::Le => a <= b,
        BinOp::Ge => a >= b,
        _ => unreachable!("not a comparison"),
    };
    Ok(Value::Bool(result))
}

pub fn negate(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(RuntimeError::type_error(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

pub fn not(value: &Value) -> Value {
    Value::Bool(!value.is_truthy())
}

/// `obj[idx]` read. Out-of-range array reads yield null; out-of-range
/// string reads fail with an `index` error.
pub fn index_read(object: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match object {
        Value::Array(items) => {
            let Value::Int(i) = index else {
                return Err(RuntimeError::type_error(format!(
                    "array index must be an Integer, got {}",
                    index.type_name()
                )));
            };
            let items = items.borrow();
            if *i < 0 || *i as usize >= items.len() {
                return Ok(Value::Null);
            }
            Ok(items[*i as usize].clone())
        }
        Value::Hash(hash) => {
            let key = HashKey::from_value(index)?;
            Ok(hash.borrow().get(&key).cloned().unwrap_or(Value::Null))
        }
        Value::Str(s) => {
            let Value::Int(i) = index else {
                return Err(RuntimeError::type_error(format!(
                    "string index must be an Integer, got {}",
                    index.type_name()
                )));
            };
            let chars: Vec<char> = s.chars().collect();
            if *i < 0 || *i as usize >= chars.len() {
                return Err(RuntimeError::index(format!(
                    "string index {} out of range (length {})",
                    i,
                    chars.len()
                )));
            }
            Ok(Value::str(chars[*i as usize].to_string()))
        }
        other => Err(RuntimeError::type_error(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

/// `obj[idx] = value`. Array writes are bounds-checked.
pub fn index_write(object: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match object {
        Value::Array(items) => {
            let Value::Int(i) = index else {
                return Err(RuntimeError::type_error(format!(
                    "array index must be an Integer, got {}",
                    index.type_name()
                )));
            };
            let mut items = items.borrow_mut();
            if *i < 0 || *i as usize >= items.len() {
                return Err(RuntimeError::index(format!(
                    "array index {} out of range (length {})",
                    i,
                    items.len()
                )));
            }
            items[*i as usize] = value;
            Ok(())
        }
        Value::Hash(hash) => {
            let key = HashKey::from_value(index)?;
            hash.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(RuntimeError::type_error(format!(
            "cannot assign into {}",
            other.type_name()
        ))),
    }
}

/// Normalize a thrown value into an exception object. Error values throw
/// as themselves; anything else wraps as a `user`-kinded exception with
/// the value as its payload.
pub fn to_error_obj(value: Value) -> Rc<brio_core::values::ErrorObj> {
    match value {
        Value::Error(err) => err,
        other => Rc::new(brio_core::values::ErrorObj {
            kind: "user".to_string(),
            message: other.display_string(),
            payload: Some(other),
            span: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ops_stay_integer() {
        let v = binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn mixed_numeric_promotes_to_float() {
        let v = binary(BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap();
        assert!(matches!(v, Value::Float(x) if x == 1.5));
    }

    #[test]
    fn division_by_zero_is_arith_kind() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Arith);
        let err = binary(BinOp::Mod, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Arith);
    }

    #[test]
    fn string_concatenation_coerces_primitives() {
        let v = binary(BinOp::Add, &Value::str("n="), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Str(s) if &*s == "n=3"));
        let v = binary(BinOp::Add, &Value::Bool(true), &Value::str("!")).unwrap();
        assert!(matches!(v, Value::Str(s) if &*s == "true!"));
    }

    #[test]
    fn string_plus_array_is_a_type_error() {
        let err = binary(BinOp::Add, &Value::str("x"), &Value::array(vec![])).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }

    #[test]
    fn relational_needs_numbers() {
        let err = binary(BinOp::Lt, &Value::str("a"), &Value::str("b")).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }

    #[test]
    fn array_read_out_of_range_is_null_but_write_errors() {
        let arr = Value::array(vec![Value::Int(1)]);
        assert!(matches!(
            index_read(&arr, &Value::Int(5)).unwrap(),
            Value::Null
        ));
        assert!(matches!(
            index_read(&arr, &Value::Int(-1)).unwrap(),
            Value::Null
        ));
        let err = index_write(&arr, &Value::Int(1), Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Index);
    }

    #[test]
    fn string_index_out_of_range_errors() {
        let s = Value::str("ab");
        assert!(index_read(&s, &Value::Int(2)).is_err());
        assert!(index_read(&s, &Value::Int(-1)).is_err());
        assert!(matches!(
            index_read(&s, &Value::Int(1)).unwrap(),
            Value::Str(c) if &*c == "b"
        ));
    }

    #[test]
    fn thrown_non_error_wraps_as_user_kind() {
        let err = to_error_obj(Value::str("boom"));
        assert_eq!(err.kind, "user");
        assert_eq!(err.message, "boom");
    }
}
