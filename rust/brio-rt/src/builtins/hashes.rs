//! Hash methods. All iteration-order-sensitive operations follow
//! first-insertion order.

use super::{expect_arity, expect_arity_range, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::{HashKey, HashObj, Value};
use std::cell::RefCell;
use std::rc::Rc;

const METHODS: &[&str] = &["has_key", "get", "set", "delete"];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

pub fn keys(hash: &Rc<RefCell<HashObj>>) -> Value {
    Value::array(hash.borrow().keys().map(|k| k.to_value()).collect())
}

pub fn values(hash: &Rc<RefCell<HashObj>>) -> Value {
    Value::array(hash.borrow().values().cloned().collect())
}

pub fn call(
    receiver: &Value,
    hash: &Rc<RefCell<HashObj>>,
    name: &str,
    args: &[Value],
) -> BuiltinResult {
    match name {
        "has_key" => {
            expect_arity("has_key", args, 1)?;
            let key = HashKey::from_value(&args[0])?;
            Ok(Value::Bool(hash.borrow().contains_key(&key)))
        }
        "get" => {
            expect_arity_range("get", args, 1, 2)?;
            let key = HashKey::from_value(&args[0])?;
            let fallback = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(hash.borrow().get(&key).cloned().unwrap_or(fallback))
        }
        "set" => {
            expect_arity("set", args, 2)?;
            let key = HashKey::from_value(&args[0])?;
            hash.borrow_mut().insert(key, args[1].clone());
            Ok(receiver.clone())
        }
        "delete" => {
            expect_arity("delete", args, 1)?;
            let key = HashKey::from_value(&args[0])?;
            Ok(hash.borrow_mut().remove(&key).unwrap_or(Value::Null))
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for Hash",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brio_core::values::values_equal;

    fn hash_with(pairs: Vec<(HashKey, Value)>) -> Value {
        let mut obj = HashObj::new();
        for (k, v) in pairs {
            obj.insert(k, v);
        }
        Value::hash(obj)
    }

    fn inner(value: &Value) -> &Rc<RefCell<HashObj>> {
        match value {
            Value::Hash(h) => h,
            _ => panic!("not a hash"),
        }
    }

    #[test]
    fn get_with_default() {
        let h = hash_with(vec![(HashKey::Str("a".into()), Value::Int(1))]);
        let missing = call(&h, inner(&h), "get", &[Value::str("b"), Value::Int(9)]).unwrap();
        assert!(values_equal(&missing, &Value::Int(9)));
        let missing_no_default = call(&h, inner(&h), "get", &[Value::str("b")]).unwrap();
        assert!(matches!(missing_no_default, Value::Null));
    }

    #[test]
    fn delete_returns_the_removed_value() {
        let h = hash_with(vec![(HashKey::Int(1), Value::str("x"))]);
        let removed = call(&h, inner(&h), "delete", &[Value::Int(1)]).unwrap();
        assert!(values_equal(&removed, &Value::str("x")));
        assert!(inner(&h).borrow().is_empty());
        let again = call(&h, inner(&h), "delete", &[Value::Int(1)]).unwrap();
        assert!(matches!(again, Value::Null));
    }

    #[test]
    fn unhashable_key_is_type_error() {
        let h = hash_with(vec![]);
        let err = call(&h, inner(&h), "has_key", &[Value::array(vec![])]).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }

    #[test]
    fn keys_follow_insertion_order() {
        let h = hash_with(vec![
            (HashKey::Str("b".into()), Value::Int(1)),
            (HashKey::Str("a".into()), Value::Int(2)),
        ]);
        let Value::Array(keys) = keys(inner(&h)) else {
            panic!("expected array");
        };
        assert!(values_equal(&keys.borrow()[0], &Value::str("b")));
        assert!(values_equal(&keys.borrow()[1], &Value::str("a")));
    }
}
