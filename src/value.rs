//! Request value types and their coercion rules.
//!
//! Raw request fields are `serde_json::Value`s: query strings and CLI flags
//! arrive as strings, JSON bodies as whatever the client sent. A
//! [`ValueType`] says what shape the caller wants, and [`ValueTypes`] turns
//! any raw value into that shape. Applications may register their own named
//! types with a converter function.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

/// Converter for a custom value type.
pub type Converter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// The shape a request field is coerced into.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ValueType {
    Int,
    Float,
    String,
    Bool,
    /// ASCII letters, digits and underscore only.
    Alpha,
    Array,
    /// Passed through untouched.
    Object,
    /// A type registered by name on the request.
    Custom(String),
}

impl ValueType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Int       => "int",
            Self::Float     => "float",
            Self::String    => "string",
            Self::Bool      => "bool",
            Self::Alpha     => "alpha",
            Self::Array     => "array",
            Self::Object    => "object",
            Self::Custom(n) => n,
        }
    }

    /// Value returned for an absent field when no default is given.
    pub fn zero(&self) -> Value {
        match self {
            Self::Int    => Value::from(0),
            Self::Float  => Value::from(0.0),
            Self::Bool   => Value::Bool(false),
            Self::Array  => Value::Array(Vec::new()),
            Self::Object => Value::Null,
            Self::String | Self::Alpha | Self::Custom(_) => Value::String(String::new()),
        }
    }
}

impl From<&str> for ValueType {
    fn from(name: &str) -> Self {
        match name {
            "int"    => Self::Int,
            "float"  => Self::Float,
            "string" => Self::String,
            "bool"   => Self::Bool,
            "alpha"  => Self::Alpha,
            "array"  => Self::Array,
            "object" => Self::Object,
            other    => Self::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of custom value types plus the built-in coercions.
///
/// A converter registered under a built-in name (`"int"`, `"bool"`, ...)
/// takes precedence over the built-in rule.
#[derive(Clone, Default)]
pub struct ValueTypes {
    custom: HashMap<String, Converter>,
}

impl ValueTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, converter: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(converter));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    /// Coerces a present (non-null) raw value into `ty`.
    pub fn coerce(&self, input: &Value, ty: &ValueType) -> Value {
        if let Some(convert) = self.custom.get(ty.as_str()) {
            return convert(input);
        }

        match ty {
            ValueType::Object | ValueType::Custom(_) => return input.clone(),
            ValueType::Array => return to_array(input),
            _ => {}
        }

        // Scalar types read the first element of a collection.
        let scalar = match input {
            Value::Array(items) => match items.first() {
                Some(first) => first,
                None => return ty.zero(),
            },
            Value::Object(map) => match map.values().next() {
                Some(first) => first,
                None => return ty.zero(),
            },
            other => other,
        };

        match ty {
            ValueType::Int    => Value::from(to_int(scalar)),
            ValueType::Float  => Number::from_f64(to_float(scalar)).map_or(Value::from(0.0), Value::Number),
            ValueType::String => Value::String(to_string(scalar)),
            ValueType::Bool   => Value::Bool(to_bool(scalar)),
            ValueType::Alpha  => Value::String(
                to_string(scalar)
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect(),
            ),
            ValueType::Array | ValueType::Object | ValueType::Custom(_) => input.clone(),
        }
    }
}

impl fmt::Debug for ValueTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.custom.keys()).finish()
    }
}

fn to_array(input: &Value) -> Value {
    match input {
        Value::Array(_) | Value::Object(_) => input.clone(),
        Value::Null | Value::Bool(false) => Value::Array(Vec::new()),
        Value::String(s) if s.is_empty() => Value::Array(Vec::new()),
        other => Value::Array(vec![other.clone()]),
    }
}

/// Integer reading of a scalar: numeric strings are read up to the first
/// non-numeric character (`"12abc"` → 12), anything unreadable is 0.
pub(crate) fn to_int(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .unwrap_or_else(|| float_to_int(n.as_f64().unwrap_or(0.0))),
        Value::String(s) => {
            let digits = numeric_prefix(s);
            digits
                .parse::<i64>()
                .unwrap_or_else(|_| float_to_int(digits.parse::<f64>().unwrap_or(0.0)))
        }
        Value::Array(items) => i64::from(!items.is_empty()),
        Value::Object(map) => i64::from(!map.is_empty()),
    }
}

pub(crate) fn to_float(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => numeric_prefix(s).parse().unwrap_or(0.0),
        Value::Array(items) => f64::from(u8::from(!items.is_empty())),
        Value::Object(map) => f64::from(u8::from(!map.is_empty())),
    }
}

/// Plain-text reading of a scalar. `true` is `"1"`, `false` and null are empty.
pub(crate) fn to_string(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::Bool(true) => "1".to_owned(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `"y"` is true, otherwise the usual truthy words (`1`, `true`, `on`, `yes`).
pub(crate) fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) if s == "y" => true,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        _ => false,
    }
}

fn float_to_int(f: f64) -> i64 {
    if f.is_finite() { f.trunc() as i64 } else { 0 }
}

/// Longest prefix of `s` (after leading whitespace) that reads as a number:
/// optional sign, digits, optional fraction, optional exponent.
fn numeric_prefix(s: &str) -> &str {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;

    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if mantissa_digits > 0 || frac_end > frac_start {
            mantissa_digits += frac_end - frac_start;
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return "";
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    &s[..end]
}

/// Turns list-shaped data into a mapping keyed by position, leaving
/// mappings alone. Anything else becomes an empty mapping.
pub(crate) fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Map::new(),
    }
}
