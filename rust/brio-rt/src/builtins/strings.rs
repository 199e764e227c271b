//! String methods. Pattern arguments (`match`, `matches?`, `replace`,
//! `split`) accept either a plain String or a Regexp value.

use super::{expect_arity, str_arg, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::Value;
use regex::Regex;
use std::rc::Rc;

const METHODS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "split",
    "substring",
    "contains",
    "starts_with",
    "ends_with",
    "match",
    "matches?",
    "replace",
];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

enum Pattern<'a> {
    Literal(&'a str),
    Regex(&'a Rc<Regex>),
}

fn pattern_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<Pattern<'a>, RuntimeError> {
    match &args[idx] {
        Value::Str(s) => Ok(Pattern::Literal(s)),
        Value::Regexp(r) => Ok(Pattern::Regex(r)),
        other => Err(RuntimeError::type_error(format!(
            "{} expects a String or Regexp, got {}",
            name,
            other.type_name()
        ))),
    }
}

pub fn call(s: &Rc<str>, name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "upper" => {
            expect_arity("upper", args, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            expect_arity("lower", args, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "trim" => {
            expect_arity("trim", args, 0)?;
            Ok(Value::str(s.trim().to_string()))
        }
        "split" => {
            expect_arity("split", args, 1)?;
            let parts: Vec<Value> = match pattern_arg("split", args, 0)? {
                Pattern::Literal(sep) if sep.is_empty() => {
                    s.chars().map(|c| Value::str(c.to_string())).collect()
                }
                Pattern::Literal(sep) => s.split(sep).map(Value::str).collect(),
                Pattern::Regex(re) => re.split(s).map(Value::str).collect(),
            };
            Ok(Value::array(parts))
        }
        "substring" => {
            expect_arity("substring", args, 2)?;
            let start = super::int_arg("substring", args, 0)?;
            let end = super::int_arg("substring", args, 1)?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            if start < 0 || end < start || end > len {
                return Err(RuntimeError::index(format!(
                    "substring range {}..{} out of bounds (length {})",
                    start, end, len
                )));
            }
            let slice: String = chars[start as usize..end as usize].iter().collect();
            Ok(Value::str(slice))
        }
        "contains" => {
            expect_arity("contains", args, 1)?;
            Ok(Value::Bool(s.contains(str_arg("contains", args, 0)?)))
        }
        "starts_with" => {
            expect_arity("starts_with", args, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg("starts_with", args, 0)?)))
        }
        "ends_with" => {
            expect_arity("ends_with", args, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg("ends_with", args, 0)?)))
        }
        "match" => {
            expect_arity("match", args, 1)?;
            let found = match pattern_arg("match", args, 0)? {
                Pattern::Literal(pat) => s.contains(pat).then(|| pat.to_string()),
                Pattern::Regex(re) => re.find(s).map(|m| m.as_str().to_string()),
            };
            Ok(found.map(Value::str).unwrap_or(Value::Null))
        }
        "matches?" => {
            expect_arity("matches?", args, 1)?;
            let matched = match pattern_arg("matches?", args, 0)? {
                Pattern::Literal(pat) => s.contains(pat),
                Pattern::Regex(re) => re.is_match(s),
            };
            Ok(Value::Bool(matched))
        }
        "replace" => {
            expect_arity("replace", args, 2)?;
            let replacement = str_arg("replace", args, 1)?;
            let replaced = match pattern_arg("replace", args, 0)? {
                Pattern::Literal(pat) => s.replace(pat, replacement),
                Pattern::Regex(re) => re.replace_all(s, replacement).into_owned(),
            };
            Ok(Value::str(replaced))
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for String",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Rc<str> {
        Rc::from(text)
    }

    #[test]
    fn case_and_trim() {
        assert!(matches!(
            call(&s("  Hi  "), "trim", &[]).unwrap(),
            Value::Str(v) if &*v == "Hi"
        ));
        assert!(matches!(
            call(&s("hi"), "upper", &[]).unwrap(),
            Value::Str(v) if &*v == "HI"
        ));
    }

    #[test]
    fn split_on_literal_and_empty() {
        let Value::Array(parts) = call(&s("a,b,c"), "split", &[Value::str(",")]).unwrap() else {
            panic!("expected array");
        };
        assert_eq!(parts.borrow().len(), 3);
        let Value::Array(chars) = call(&s("ab"), "split", &[Value::str("")]).unwrap() else {
            panic!("expected array");
        };
        assert_eq!(chars.borrow().len(), 2);
    }

    #[test]
    fn substring_bounds() {
        assert!(matches!(
            call(&s("hello"), "substring", &[Value::Int(1), Value::Int(3)]).unwrap(),
            Value::Str(v) if &*v == "el"
        ));
        assert!(call(&s("hello"), "substring", &[Value::Int(2), Value::Int(9)]).is_err());
    }

    #[test]
    fn regex_patterns() {
        let re = Value::Regexp(Rc::new(Regex::new(r"\d+").unwrap()));
        assert!(matches!(
            call(&s("a12b"), "match", std::slice::from_ref(&re)).unwrap(),
            Value::Str(v) if &*v == "12"
        ));
        assert!(matches!(
            call(&s("abc"), "match", std::slice::from_ref(&re)).unwrap(),
            Value::Null
        ));
        assert!(matches!(
            call(&s("a12b"), "matches?", std::slice::from_ref(&re)).unwrap(),
            Value::Bool(true)
        ));
        assert!(matches!(
            call(&s("a12b"), "replace", &[re, Value::str("#")]).unwrap(),
            Value::Str(v) if &*v == "a#b"
        ));
    }

    #[test]
    fn wrong_arity_is_type_error() {
        let err = call(&s("x"), "upper", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Type);
    }
}
