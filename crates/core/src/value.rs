#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A scalar field value. Rows hold nothing richer than this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

pub type Tuple = Vec<Value>;

impl Value {
    /// null < boolean/integer < float < string
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) | Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn integral(&self) -> i64 {
        match self {
            Value::Bool(value) => i64::from(*value),
            Value::Integer(value) => *value,
            _ => 0,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One slot of a range-scan bound. `Min`/`Max` never reach an index.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyPart {
    Min,
    Value(Value),
    Max,
}

impl From<Value> for KeyPart {
    fn from(value: Value) -> Self {
        KeyPart::Value(value)
    }
}

pub fn compare_value(a: &Value, b: &Value) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => a.integral().cmp(&b.integral()),
    }
}

/// Element-wise comparison; on a shared equal prefix the shorter tuple sorts first.
pub fn compare_tuple(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ord = compare_value(left, right);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

pub fn compare_key_part(a: &KeyPart, b: &KeyPart) -> Ordering {
    match (a, b) {
        (KeyPart::Min, KeyPart::Min) | (KeyPart::Max, KeyPart::Max) => Ordering::Equal,
        (KeyPart::Min, _) | (_, KeyPart::Max) => Ordering::Less,
        (_, KeyPart::Min) | (KeyPart::Max, _) => Ordering::Greater,
        (KeyPart::Value(x), KeyPart::Value(y)) => compare_value(x, y),
    }
}

pub fn compare_key_parts(a: &[KeyPart], b: &[KeyPart]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ord = compare_key_part(left, right);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
