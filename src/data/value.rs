//! Values flowing from the scan driver into the data sink.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Single numeric or boolean reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// Homogeneous numeric array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericArray {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl NumericArray {
    pub fn len(&self) -> usize {
        match self {
            NumericArray::Int(v) => v.len(),
            NumericArray::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything the sink knows how to persist.
///
/// Mappings become groups, everything else becomes a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    Text(String),
    Array(NumericArray),
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// Numeric view of a scalar value, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Float(v)) => Some(*v),
            Value::Scalar(Scalar::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(Scalar::Float(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(Scalar::Int(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Scalar(Scalar::Bool(value))
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

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(NumericArray::Float(value))
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Value::Array(NumericArray::Int(value))
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Mapping(value)
    }
}

/// A value stamped with the moment (Unix seconds) it belongs to.
///
/// The timestamp decides which entry of the output file receives the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub timestamp: f64,
    pub value: Value,
}

impl TimedValue {
    pub fn new(timestamp: f64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// One `put_values` call worth of data, keyed by tagged key, in insertion order.
pub type ValueBatch = IndexMap<String, TimedValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_maps_to_closed_variants() {
        let value: Value =
            serde_json::from_str(r#"{"reals": [1.0, 2.5], "count": 3, "label": "T2", "ok": true}"#)
                .unwrap();
        let Value::Mapping(map) = value else {
            panic!("expected mapping");
        };
        assert_eq!(map["reals"], Value::from(vec![1.0, 2.5]));
        assert_eq!(map["count"], Value::from(3i64));
        assert_eq!(map["label"], Value::from("T2"));
        assert_eq!(map["ok"], Value::from(true));
    }

    #[test]
    fn scalar_view() {
        assert_eq!(Value::from(2i64).as_f64(), Some(2.0));
        assert_eq!(Value::from("x").as_f64(), None);
    }
}
