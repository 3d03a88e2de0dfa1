//! Coercion and comparison rules over JSON values.
//!
//! Truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsey,
//! everything else is truthy. String-to-number coercion happens only inside
//! arithmetic.

use serde_json::Value;

use crate::error::ExprError;

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Numeric view of a value for arithmetic: numbers pass through, numeric
/// strings coerce, everything else is a type error.
pub fn as_number(value: &Value) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExprError::Type("number out of range".to_string())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExprError::Type(format!("cannot treat `{s}` as a number"))),
        other => Err(ExprError::Type(format!(
            "cannot treat {} as a number",
            type_name(other)
        ))),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Structural equality, with numbers compared numerically so `1 == 1.0`.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Ordering comparison. Defined for number/number (with string coercion on
/// neither side) and string/string; anything else is a type error.
pub fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (
                a.as_f64()
                    .ok_or_else(|| ExprError::Type("number out of range".to_string()))?,
                b.as_f64()
                    .ok_or_else(|| ExprError::Type("number out of range".to_string()))?,
            );
            a.partial_cmp(&b)
                .ok_or_else(|| ExprError::Type("numbers are not comparable".to_string()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => Err(ExprError::Type(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

/// Wrap an f64 arithmetic result back into a JSON number, keeping integers
/// integral.
pub fn number_value(n: f64) -> Result<Value, ExprError> {
    if !n.is_finite() {
        return Err(ExprError::Type("arithmetic produced a non-finite number".to_string()));
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Ok(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| ExprError::Type("arithmetic produced a non-finite number".to_string()))
    }
}

/// Render a value for string concatenation and template output. Strings are
/// raw, null is empty, everything else is compact JSON.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
