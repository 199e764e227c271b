//! Array methods. `push` and `unshift` mutate in place and return the
//! array itself, so chained pushes through any alias stay visible
//! everywhere; `reverse` and `slice` build new arrays.

use super::{expect_arity, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::Value;
use std::cell::RefCell;
use std::rc::Rc;

const METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "join", "reverse",
];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

pub fn call(
    receiver: &Value,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: &[Value],
) -> BuiltinResult {
    match name {
        "push" => {
            expect_arity("push", args, 1)?;
            items.borrow_mut().push(args[0].clone());
            Ok(receiver.clone())
        }
        "pop" => {
            expect_arity("pop", args, 0)?;
            Ok(items.borrow_mut().pop().unwrap_or(Value::Null))
        }
        "shift" => {
            expect_arity("shift", args, 0)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(items.remove(0))
            }
        }
        "unshift" => {
            expect_arity("unshift", args, 1)?;
            items.borrow_mut().insert(0, args[0].clone());
            Ok(receiver.clone())
        }
        "slice" => {
            expect_arity("slice", args, 2)?;
            let start = super::int_arg("slice", args, 0)?.max(0) as usize;
            let end = super::int_arg("slice", args, 1)?.max(0) as usize;
            let items = items.borrow();
            let end = end.min(items.len());
            let start = start.min(end);
            Ok(Value::array(items[start..end].to_vec()))
        }
        "join" => {
            expect_arity("join", args, 1)?;
            let sep = super::str_arg("join", args, 0)?;
            let joined = items
                .borrow()
                .iter()
                .map(|v| v.display_string())
                .collect::<Vec<_>>()
                .join(sep);
            Ok(Value::str(joined))
        }
        "reverse" => {
            expect_arity("reverse", args, 0)?;
            let reversed: Vec<Value> = items.borrow().iter().rev().cloned().collect();
            Ok(Value::array(reversed))
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for Array",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brio_core::values::values_equal;

    fn array(items: Vec<Value>) -> Value {
        Value::array(items)
    }

    fn inner(value: &Value) -> &Rc<RefCell<Vec<Value>>> {
        match value {
            Value::Array(items) => items,
            _ => panic!("not an array"),
        }
    }

    #[test]
    fn push_returns_the_same_array() {
        let arr = array(vec![Value::Int(1)]);
        let result = call(&arr, inner(&arr), "push", &[Value::Int(2)]).unwrap();
        assert!(values_equal(&arr, &result));
        assert_eq!(inner(&arr).borrow().len(), 2);
    }

    #[test]
    fn pop_and_shift_on_empty_yield_null() {
        let arr = array(vec![]);
        assert!(matches!(
            call(&arr, inner(&arr), "pop", &[]).unwrap(),
            Value::Null
        ));
        assert!(matches!(
            call(&arr, inner(&arr), "shift", &[]).unwrap(),
            Value::Null
        ));
    }

    #[test]
    fn slice_clamps_to_bounds() {
        let arr = array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = call(&arr, inner(&arr), "slice", &[Value::Int(1), Value::Int(9)]).unwrap();
        assert_eq!(inner(&result).borrow().len(), 2);
    }

    #[test]
    fn join_uses_display_form() {
        let arr = array(vec![Value::Int(1), Value::str("a"), Value::Bool(true)]);
        assert!(matches!(
            call(&arr, inner(&arr), "join", &[Value::str("-")]).unwrap(),
            Value::Str(s) if &*s == "1-a-true"
        ));
    }

    #[test]
    fn reverse_builds_a_new_array() {
        let arr = array(vec![Value::Int(1), Value::Int(2)]);
        let result = call(&arr, inner(&arr), "reverse", &[]).unwrap();
        assert!(!values_equal(&arr, &result));
        assert!(values_equal(&inner(&result).borrow()[0], &Value::Int(2)));
    }
}
