#![forbid(unsafe_code)]

//! JSON persistence for snapshot trees (feature `state-persistence`).
//!
//! Conversion is lossless for everything a snapshot can hold except the
//! integer/float distinction at the edges: JSON numbers that fit `i64`
//! deserialize as [`Snapshot::Int`], everything else as
//! [`Snapshot::Float`]. Non-finite floats serialize as `null`, matching
//! JSON's number domain.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::value::Snapshot;

/// Failure to parse persisted snapshot text.
#[derive(Debug)]
pub enum PersistError {
    /// The input was not valid JSON.
    Parse(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "snapshot parse error: {msg}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// Convert a snapshot tree into a `serde_json::Value`.
#[must_use]
pub fn snapshot_to_json(snapshot: &Snapshot) -> Value {
    match snapshot {
        Snapshot::Null => Value::Null,
        Snapshot::Bool(b) => Value::Bool(*b),
        Snapshot::Int(n) => Value::from(*n),
        Snapshot::Float(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Snapshot::Str(s) => Value::String(s.to_string()),
        Snapshot::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), snapshot_to_json(v)))
                .collect(),
        ),
        Snapshot::Array(vec) => Value::Array(vec.iter().map(snapshot_to_json).collect()),
    }
}

/// Convert a `serde_json::Value` into a snapshot tree.
#[must_use]
pub fn snapshot_from_json(value: &Value) -> Snapshot {
    match value {
        Value::Null => Snapshot::Null,
        Value::Bool(b) => Snapshot::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(Snapshot::Int)
            .unwrap_or_else(|| Snapshot::Float(n.as_f64().unwrap_or(f64::NAN))),
        Value::String(s) => Snapshot::Str(Rc::from(s.as_str())),
        Value::Object(map) => {
            Snapshot::object(map.iter().map(|(k, v)| (k.clone(), snapshot_from_json(v))))
        }
        Value::Array(vec) => Snapshot::array(vec.iter().map(snapshot_from_json)),
    }
}

/// Serialize a snapshot tree to a JSON string.
#[must_use]
pub fn snapshot_to_string(snapshot: &Snapshot) -> String {
    snapshot_to_json(snapshot).to_string()
}

/// Parse a snapshot tree from JSON text.
pub fn snapshot_from_str(text: &str) -> Result<Snapshot, PersistError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| PersistError::Parse(err.to_string()))?;
    Ok(snapshot_from_json(&value))
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        snapshot_to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(snapshot_from_json(&value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
