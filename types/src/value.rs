//! Bridging values: the only data shape that crosses into listener code.
//!
//! Everything delivered to a foreground or background listener is a
//! string-keyed map of primitives, nested maps and lists. Producers hand the
//! bridge opaque JSON blobs; conversion happens once, at the boundary, and
//! failures surface as [`BridgeError::Serialization`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::BridgeError;

/// A string-keyed bridging map.
pub type BridgeMap = BTreeMap<String, BridgeValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BridgeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<BridgeValue>),
    Map(BridgeMap),
}

impl BridgeValue {
    /// Convert an arbitrary JSON value.
    ///
    /// Unsigned integers above `i64::MAX` are rejected rather than silently
    /// widened to a lossy float.
    pub fn from_json(value: &Value) -> Result<Self, BridgeError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if n.is_u64() {
                    return Err(BridgeError::Serialization(format!(
                        "integer {n} does not fit in a signed 64-bit value"
                    )));
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(BridgeError::Serialization(format!(
                        "unrepresentable number {n}"
                    )));
                }
            }
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, BridgeError>>()?,
            ),
            Value::Object(_) => Self::Map(bridge_map_from_json(value)?),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BridgeMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Convert a JSON blob whose top level must be an object.
pub fn bridge_map_from_json(value: &Value) -> Result<BridgeMap, BridgeError> {
    let Value::Object(fields) = value else {
        return Err(BridgeError::Serialization(format!(
            "expected a JSON object, found {}",
            json_kind(value)
        )));
    };
    fields
        .iter()
        .map(|(key, value)| Ok::<_, BridgeError>((key.clone(), BridgeValue::from_json(value)?)))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl From<bool> for BridgeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for BridgeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for BridgeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for BridgeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for BridgeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<BridgeMap> for BridgeValue {
    fn from(value: BridgeMap) -> Self {
        Self::Map(value)
    }
}

impl From<Vec<BridgeValue>> for BridgeValue {
    fn from(value: Vec<BridgeValue>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<BridgeValue>> From<Option<T>> for BridgeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
