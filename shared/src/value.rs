//! Attribute value codec
//!
//! Application code describes an attribute value with [`Value`], choosing the
//! variant at the call site. The codec turns it into a [`TypedValue`] whose tag
//! always matches its payload, and [`decode`] is the exact inverse:
//!
//! ```text
//! decode(encode(v)) == v   for every representable v
//! ```
//!
//! Values with no wire representation fail to encode; the codec never coerces.

use std::fmt;

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::limits::MAX_STRING_LEN;

/// Wire tag of a capability value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Unknown,
    Integer,
    Number,
    IntOrNum,
    String,
    StringArray,
    JsonObject,
    Boolean,
}

impl ValueType {
    pub const fn code(self) -> i32 {
        match self {
            ValueType::Unknown => -1,
            ValueType::Integer => 0,
            ValueType::Number => 1,
            ValueType::IntOrNum => 2,
            ValueType::String => 3,
            ValueType::StringArray => 4,
            ValueType::JsonObject => 5,
            ValueType::Boolean => 6,
        }
    }
}

/// A value as supplied by application code
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Object(Map<String, JsonValue>),
}

impl Value {
    /// Short name of the variant, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Str).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::List(v.into_iter().map(Value::from).collect())
    }
}

impl From<Map<String, JsonValue>> for Value {
    fn from(v: Map<String, JsonValue>) -> Self {
        Value::Object(v)
    }
}

/// Tagged value ready to be handed to the connectivity engine
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Integer(i64),
    Number(f64),
    String(String),
    StringArray(Vec<String>),
    Boolean(bool),
    JsonObject(Map<String, JsonValue>),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Integer(_) => ValueType::Integer,
            TypedValue::Number(_) => ValueType::Number,
            TypedValue::String(_) => ValueType::String,
            TypedValue::StringArray(_) => ValueType::StringArray,
            TypedValue::Boolean(_) => ValueType::Boolean,
            TypedValue::JsonObject(_) => ValueType::JsonObject,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret a bare command-line token: booleans, then integers, then
    /// numbers, falling back to a string.
    pub fn parse_token(token: &str) -> Self {
        match token {
            "true" => return TypedValue::Boolean(true),
            "false" => return TypedValue::Boolean(false),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return TypedValue::Integer(i);
        }
        match token.parse::<f64>() {
            Ok(n) if n.is_finite() => TypedValue::Number(n),
            _ => TypedValue::String(token.to_string()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Number(n) => write!(f, "{}", n),
            TypedValue::String(s) => write!(f, "{:?}", s),
            TypedValue::StringArray(items) => write!(f, "{:?}", items),
            TypedValue::Boolean(b) => write!(f, "{}", b),
            TypedValue::JsonObject(map) => write!(f, "{}", JsonValue::Object(map.clone())),
        }
    }
}

/// Errors that can occur while encoding a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("String value too long: {len} bytes (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("Unsupported value type: {0}")]
    UnsupportedType(&'static str),
}

/// Value codec with a configurable string length cap
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_string_len: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub const fn new() -> Self {
        Self {
            max_string_len: MAX_STRING_LEN,
        }
    }

    pub const fn with_max_len(max_string_len: usize) -> Self {
        Self { max_string_len }
    }

    pub fn max_string_len(&self) -> usize {
        self.max_string_len
    }

    /// Encode an application value into its tagged form
    pub fn encode(&self, value: &Value) -> Result<TypedValue, EncodeError> {
        // Bool stays ahead of Integer.
        match value {
            Value::Bool(b) => Ok(TypedValue::Boolean(*b)),
            Value::Integer(i) => Ok(TypedValue::Integer(*i)),
            Value::Number(n) if n.is_finite() => Ok(TypedValue::Number(*n)),
            Value::Number(_) => Err(EncodeError::UnsupportedType("non-finite number")),
            Value::Str(s) => {
                self.check_len(s)?;
                Ok(TypedValue::String(s.clone()))
            }
            Value::List(items) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Str(s) => {
                            self.check_len(s)?;
                            strings.push(s.clone());
                        }
                        _ => return Err(EncodeError::UnsupportedType("non-string list element")),
                    }
                }
                Ok(TypedValue::StringArray(strings))
            }
            Value::Object(map) => Ok(TypedValue::JsonObject(map.clone())),
            Value::Null | Value::Bytes(_) => Err(EncodeError::UnsupportedType(value.kind_name())),
        }
    }

    /// Decode a tagged value back into the application form
    pub fn decode(&self, value: &TypedValue) -> Value {
        match value {
            TypedValue::Integer(i) => Value::Integer(*i),
            TypedValue::Number(n) => Value::Number(*n),
            TypedValue::String(s) => Value::Str(s.clone()),
            TypedValue::StringArray(items) => {
                Value::List(items.iter().cloned().map(Value::Str).collect())
            }
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::JsonObject(map) => Value::Object(map.clone()),
        }
    }

    fn check_len(&self, s: &str) -> Result<(), EncodeError> {
        if s.len() > self.max_string_len {
            return Err(EncodeError::TooLong {
                len: s.len(),
                max: self.max_string_len,
            });
        }
        Ok(())
    }
}

/// Encode with the default codec
pub fn encode(value: &Value) -> Result<TypedValue, EncodeError> {
    Codec::new().encode(value)
}

/// Decode with the default codec
pub fn decode(value: &TypedValue) -> Value {
    Codec::new().decode(value)
}
