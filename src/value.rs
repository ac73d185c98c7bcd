use std::fmt;

use serde::{Deserialize, Serialize};

/// A primitive Value Space value.
///
/// Layers store nothing richer than this: there is no schema beyond the
/// variant itself. Tables and objects in the underlying substrates are
/// directories, not values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 text
    String(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// List of strings
    StringList(Vec<String>),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::StringList(_) => "string list",
        }
    }

    /// The contained string, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The contained flag, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The contained integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a float; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Interprets command-line text.
    ///
    /// `true`/`false` become booleans, integers and floats are parsed, and
    /// anything else is kept as a string. Quote-wrapped text is always a
    /// string.
    pub fn parse_literal(text: &str) -> Value {
        if let Some(inner) = text
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Value::String(inner.to_string());
        }

        match text {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }

        if let Ok(int) = text.parse::<i64>() {
            return Value::Int(int);
        }

        if let Ok(float) = text.parse::<f64>() {
            return Value::Float(float);
        }

        Value::String(text.to_string())
    }

    /// Converts to a TOML value. Bytes become an integer array.
    ///
    /// TOML has no bytes type and its tables are directories in the
    /// config store, so an empty `Bytes` is written as `[]` and reads back
    /// through [`from_toml`](Self::from_toml) as an empty `StringList`.
    /// Layers that serialize `Value` directly keep the variant.
    pub fn to_toml(&self) -> toml::Value {
        match self {
            Value::Bool(b) => toml::Value::Boolean(*b),
            Value::Int(i) => toml::Value::Integer(*i),
            Value::Float(f) => toml::Value::Float(*f),
            Value::String(s) => toml::Value::String(s.clone()),
            Value::Bytes(bytes) => toml::Value::Array(
                bytes
                    .iter()
                    .map(|b| toml::Value::Integer(i64::from(*b)))
                    .collect(),
            ),
            Value::StringList(list) => {
                toml::Value::Array(list.iter().cloned().map(toml::Value::String).collect())
            }
        }
    }

    /// Reads a TOML leaf. Tables and mixed arrays are not values.
    ///
    /// Arrays of strings are string lists and arrays of integers in
    /// `0..=255` are bytes; `[]` is an empty string list.
    pub fn from_toml(value: &toml::Value) -> Option<Value> {
        match value {
            toml::Value::Boolean(b) => Some(Value::Bool(*b)),
            toml::Value::Integer(i) => Some(Value::Int(*i)),
            toml::Value::Float(f) => Some(Value::Float(*f)),
            toml::Value::String(s) => Some(Value::String(s.clone())),
            toml::Value::Datetime(dt) => Some(Value::String(dt.to_string())),
            toml::Value::Array(items) => {
                if let Some(strings) = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                {
                    return Some(Value::StringList(strings));
                }

                items
                    .iter()
                    .map(|item| item.as_integer().and_then(|i| u8::try_from(i).ok()))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Bytes)
            }
            toml::Value::Table(_) => None,
        }
    }

    /// Converts to a JSON value. Bytes become an integer array.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => serde_json::Value::from(bytes.clone()),
            Value::StringList(list) => serde_json::Value::from(list.clone()),
        }
    }

    /// Reads a JSON leaf. Objects, nulls and mixed arrays are not values.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                if let Some(strings) = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                {
                    return Some(Value::StringList(strings));
                }

                items
                    .iter()
                    .map(|item| item.as_u64().and_then(|i| u8::try_from(i).ok()))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Bytes)
            }
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::StringList(list) => write!(f, "[{}]", list.join(", ")),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringList(value)
    }
}
