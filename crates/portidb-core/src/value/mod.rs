//! Module: value
//! Responsibility: structured-clone values stored in object stores.
//! Does not own: key validation or ordering (see `key`).
//! Boundary: values cross the RPC channel as tagged JSON (`{"type", "value"}`).


use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

///
/// Value
///
/// Owned structured-clone value. Binary payloads stay raw bytes; dates are
/// milliseconds since the epoch. Objects keep their properties sorted so two
/// clones of the same value compare and serialize identically.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(#[serde(with = "crate::serialize::number")] f64),
    String(String),
    Date(#[serde(with = "crate::serialize::number")] f64),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Array(Vec<Self>),
    Object(BTreeMap<String, Self>),
}

impl Value {
    /// Build an object value from `(property, value)` pairs.
    pub fn object<K, I>(properties: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::Object(
            properties
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Own property lookup; `None` for non-objects and missing properties.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Self> {
        match self {
            Self::Object(map) => map.get(property),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Self>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Undefined, Self::Number),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Number(n) => Self::Number(n),
            Key::Date(ms) => Self::Date(ms),
            Key::String(s) => Self::String(s),
            Key::Binary(bytes) => Self::Binary(bytes),
            Key::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
        }
    }
}

impl From<&Key> for Value {
    fn from(key: &Key) -> Self {
        Self::from(key.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}
