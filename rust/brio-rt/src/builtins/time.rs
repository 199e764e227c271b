//! The `Time` namespace, bridged through chrono. Timestamps are UTC
//! epoch seconds (Float) or milliseconds (Integer).

use super::{expect_arity, str_arg, BuiltinResult};
use brio_core::errors::RuntimeError;
use brio_core::values::Value;
use chrono::{DateTime, NaiveDateTime, Utc};

const METHODS: &[&str] = &["now", "now_ms", "format", "parse"];

pub fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

fn epoch_arg(name: &str, args: &[Value], idx: usize) -> Result<f64, RuntimeError> {
    match &args[idx] {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(x) => Ok(*x),
        other => Err(RuntimeError::type_error(format!(
            "{} expects an epoch timestamp, got {}",
            name,
            other.type_name()
        ))),
    }
}

pub fn call(name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "now" => {
            expect_arity("Time.now", args, 0)?;
            let now = Utc::now();
            Ok(Value::Float(
                now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6,
            ))
        }
        "now_ms" => {
            expect_arity("Time.now_ms", args, 0)?;
            Ok(Value::Int(Utc::now().timestamp_millis()))
        }
        "format" => {
            expect_arity("Time.format", args, 2)?;
            let epoch = epoch_arg("Time.format", args, 0)?;
            let fmt = str_arg("Time.format", args, 1)?;
            let datetime = DateTime::<Utc>::from_timestamp(
                epoch as i64,
                ((epoch.fract().abs()) * 1e9) as u32,
            )
            .ok_or_else(|| RuntimeError::type_error("timestamp out of range"))?;
            Ok(Value::str(datetime.format(fmt).to_string()))
        }
        "parse" => {
            expect_arity("Time.parse", args, 2)?;
            let text = str_arg("Time.parse", args, 0)?;
            let fmt = str_arg("Time.parse", args, 1)?;
            let parsed = NaiveDateTime::parse_from_str(text, fmt).map_err(|e| {
                RuntimeError::type_error(format!("cannot parse time '{}': {}", text, e))
            })?;
            Ok(Value::Float(parsed.and_utc().timestamp() as f64))
        }
        _ => Err(RuntimeError::name_error(format!(
            "unknown method '{}' for Time",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_round_trip() {
        let formatted = call(
            "format",
            &[Value::Int(0), Value::str("%Y-%m-%d %H:%M:%S")],
        )
        .unwrap();
        let Value::Str(text) = formatted else {
            panic!("expected string");
        };
        assert_eq!(&*text, "1970-01-01 00:00:00");
        let parsed = call(
            "parse",
            &[Value::str(text.to_string()), Value::str("%Y-%m-%d %H:%M:%S")],
        )
        .unwrap();
        assert!(matches!(parsed, Value::Float(x) if x == 0.0));
    }

    #[test]
    fn now_is_positive() {
        let Value::Float(now) = call("now", &[]).unwrap() else {
            panic!("expected float");
        };
        assert!(now > 1.6e9);
    }
}
