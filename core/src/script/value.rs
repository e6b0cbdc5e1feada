//! Runtime values for the expression dialect and their JSON boundary.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use super::ScriptError;


/// A value during evaluation. `Undefined` never crosses the JSON boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "object",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::Array(_) | ScriptValue::Object(_) => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ScriptValue::Undefined | ScriptValue::Null => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ScriptValue::Str(s) => !s.is_empty(),
            ScriptValue::Array(_) | ScriptValue::Object(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    /// `Number(value)` semantics.
    pub fn to_number(&self) -> f64 {
        match self {
            ScriptValue::Undefined => f64::NAN,
            ScriptValue::Null => 0.0,
            ScriptValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ScriptValue::Number(n) => *n,
            ScriptValue::Str(s) => string_to_number(s),
            ScriptValue::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            ScriptValue::Object(_) => f64::NAN,
        }
    }

    /// `String(value)` semantics.
    pub fn to_js_string(&self) -> String {
        match self {
            ScriptValue::Undefined => "undefined".to_string(),
            ScriptValue::Null => "null".to_string(),
            ScriptValue::Bool(b) => b.to_string(),
            ScriptValue::Number(n) => format_number(*n),
            ScriptValue::Str(s) => s.clone(),
            ScriptValue::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            ScriptValue::Object(_) => "[object Object]".to_string(),
        }
    }

    /// `===`
    pub fn strict_eq(&self, other: &ScriptValue) -> bool {
        match (self, other) {
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            // Arrays and objects compare by identity in JavaScript; values
            // here are copies, so two composites are never identical.
            (ScriptValue::Array(_), _) | (ScriptValue::Object(_), _) => false,
            _ => self == other,
        }
    }

    /// `==`
    pub fn loose_eq(&self, other: &ScriptValue) -> bool {
        use ScriptValue::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(_), Str(_)) | (Str(_), Number(_)) | (Bool(_), _) | (_, Bool(_)) => {
                self.to_number() == other.to_number()
            }
            (Array(_) | Object(_), Str(_) | Number(_)) => {
                ScriptValue::Str(self.to_js_string()).loose_eq(other)
            }
            (Str(_) | Number(_), Array(_) | Object(_)) => {
                self.loose_eq(&ScriptValue::Str(other.to_js_string()))
            }
            _ => self.strict_eq(other),
        }
    }

    /// Convert a JSON value into the runtime representation.
    pub fn from_json(value: &Value) -> ScriptValue {
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ScriptValue::Str(s.clone()),
            Value::Array(items) => ScriptValue::Array(items.iter().map(ScriptValue::from_json).collect()),
            Value::Object(map) => ScriptValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON the way `JSON.stringify` then `JSON.parse` would.
    ///
    /// Integral finite numbers become JSON integers, non-finite numbers
    /// become `null`, `undefined` members are dropped, `undefined` array
    /// elements become `null`, and a top-level `undefined` is an error.
    pub fn to_json(&self) -> Result<Value, ScriptError> {
        match self {
            ScriptValue::Undefined => Err(ScriptError::NonJsonResult("undefined".into())),
            other => Ok(other.to_json_lossy()),
        }
    }

    fn to_json_lossy(&self) -> Value {
        match self {
            ScriptValue::Undefined | ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::Str(s) => Value::String(s.clone()),
            ScriptValue::Array(items) => Value::Array(items.iter().map(ScriptValue::to_json_lossy).collect()),
            ScriptValue::Object(map) => Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, ScriptValue::Undefined))
                    .map(|(k, v)| (k.clone(), v.to_json_lossy()))
                    .collect(),
            ),
        }
    }
}


/// JSON number for `n`: integer when integral and in range, float otherwise,
/// `null` when not finite.
pub fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        // Normalises -0 to 0 as JSON.stringify does.
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}


/// JavaScript-style number formatting: `410000`, `0.5`, `NaN`, `Infinity`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}


/// `Number("...")`: trimmed decimal, empty string is 0, otherwise NaN.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            let valid = t
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
            if valid {
                t.parse::<f64>().unwrap_or(f64::NAN)
            } else {
                f64::NAN
            }
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
