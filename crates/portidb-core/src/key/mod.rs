//! Module: key
//! Responsibility: valid keys, their total order, key paths and key ranges.
//! Does not own: record storage or any remote access.
//! Boundary: every ordering decision in the engine goes through `Key::cmp`.

mod convert;
mod path;
mod range;


pub use convert::value_to_key;
pub use path::KeyPath;
pub use range::KeyRange;

use crate::{error::DomError, value::Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

///
/// Key
///
/// A valid key. Ordering across variants follows the fixed type rank
/// number < date < string < binary < array; arrays compare element-wise and
/// a strict prefix sorts first.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Key {
    Number(#[serde(with = "crate::serialize::number")] f64),
    Date(#[serde(with = "crate::serialize::number")] f64),
    String(String),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Array(Vec<Self>),
}

impl Key {
    /// Largest integer a key generator may hand out.
    pub const MAX_GENERATED: f64 = 9_007_199_254_740_992.0;

    /// Milliseconds either side of the epoch a valid date may lie.
    pub const MAX_DATE_MS: f64 = 8.64e15;

    /// True for a finite time value no further than `MAX_DATE_MS` from the
    /// epoch.
    #[must_use]
    pub fn is_valid_date(ms: f64) -> bool {
        ms.abs() <= Self::MAX_DATE_MS
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Date(_) => 1,
            Self::String(_) => 2,
            Self::Binary(_) => 3,
            Self::Array(_) => 4,
        }
    }

    /// Reject keys that were built directly but could never come out of
    /// `value_to_key` (NaN numbers, invalid dates).
    pub fn validate(&self) -> Result<(), DomError> {
        match self {
            Self::Number(n) if n.is_nan() => Err(DomError::data("key is NaN")),
            Self::Date(ms) if !Self::is_valid_date(*ms) => {
                Err(DomError::data("key is an invalid date"))
            }
            Self::Array(items) => items.iter().try_for_each(Self::validate),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

fn cmp_number(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) | (Self::Date(a), Self::Date(b)) => {
                cmp_number(*a, *b)
            }
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Key {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}

impl TryFrom<&Value> for Key {
    type Error = DomError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        value_to_key(value)
    }
}
