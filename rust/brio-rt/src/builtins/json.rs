//! The `JSON` namespace: `parse` and `stringify` bridged through
//! serde_json.

use super::{expect_arity, str_arg, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::{HashKey, HashObj, Value};

const METHODS: &[&str] = &["parse", "stringify"];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

pub fn call(name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "parse" => {
            expect_arity("JSON.parse", args, 1)?;
            let text = str_arg("JSON.parse", args, 0)?;
            let parsed: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| RuntimeError::type_error(format!("invalid JSON: {}", e)))?;
            Ok(from_json(parsed))
        }
        "stringify" => {
            expect_arity("JSON.stringify", args, 1)?;
            let json = to_json(&args[0])?;
            serde_json::to_string(&json)
                .map(Value::str)
                .map_err(|e| RuntimeError::type_error(format!("cannot stringify: {}", e)))
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for JSON",
            name
        ))),
    }
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            Value::array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => {
            let mut hash = HashObj::new();
            for (k, v) in map {
                hash.insert(HashKey::Str(k.into()), from_json(v));
            }
            Value::hash(hash)
        }
    }
}

fn to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::from(*n)),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| RuntimeError::type_error("cannot stringify a non-finite float")),
        Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.borrow().len());
            for item in items.borrow().iter() {
                out.push(to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Hash(hash) => {
            let mut map = serde_json::Map::new();
            for (key, val) in hash.borrow().iter() {
                map.insert(key.to_value().display_string(), to_json(val)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        other => Err(RuntimeError::type_error(format!(
            "{} is not JSON-representable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brio_core::values::values_equal;

    #[test]
    fn parse_builds_language_values() {
        let parsed = call("parse", &[Value::str(r#"{"a": 1, "b": [true, null]}"#)]).unwrap();
        let Value::Hash(hash) = &parsed else {
            panic!("expected hash");
        };
        let a = hash.borrow().get(&HashKey::Str("a".into())).cloned().unwrap();
        assert!(values_equal(&a, &Value::Int(1)));
    }

    #[test]
    fn stringify_then_parse_round_trips() {
        let mut obj = HashObj::new();
        obj.insert(HashKey::Str("n".into()), Value::Int(3));
        obj.insert(
            HashKey::Str("xs".into()),
            Value::array(vec![Value::Float(1.5), Value::str("hi")]),
        );
        let original = Value::hash(obj);
        let text = call("stringify", std::slice::from_ref(&original)).unwrap();
        let Value::Str(text) = text else {
            panic!("expected string");
        };
        let reparsed = call("parse", &[Value::str(text.to_string())]).unwrap();
        let again = call("stringify", &[reparsed]).unwrap();
        let Value::Str(again) = again else {
            panic!("expected string");
        };
        assert_eq!(text, again);
    }

    #[test]
    fn functions_are_not_representable() {
        let err = call("stringify", &[Value::Builtin(brio_core::values::Builtin::Print)])
            .unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }

    #[test]
    fn invalid_json_is_type_error() {
        let err = call("parse", &[Value::str("{oops")]).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }
}
