use crate::{
    error::DomError,
    key::{Key, value_to_key},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// KeyPath
///
/// Where a key lives inside a stored value: a (possibly dotted) property
/// path, or a list of such paths producing an array key. The empty string
/// names the value itself.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// Check the path syntax; an invalid path is a `SyntaxError`.
    pub fn validate(&self) -> Result<(), DomError> {
        match self {
            Self::Single(path) => validate_single(path),
            Self::Compound(paths) if paths.is_empty() => {
                Err(DomError::syntax("compound key path is empty"))
            }
            Self::Compound(paths) => paths.iter().try_for_each(|p| validate_single(p)),
        }
    }

    #[must_use]
    pub const fn is_compound(&self) -> bool {
        matches!(self, Self::Compound(_))
    }

    /// Evaluate the path against a value. `None` when any step is missing.
    #[must_use]
    pub fn extract_value(&self, value: &Value) -> Option<Value> {
        match self {
            Self::Single(path) => extract_single(path, value),
            Self::Compound(paths) => paths
                .iter()
                .map(|p| extract_single(p, value))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Evaluate the path and convert the result into a key.
    ///
    /// `Ok(None)` means the path did not resolve; a resolved value that is not
    /// a valid key is a `DataError`.
    pub fn extract_key(&self, value: &Value) -> Result<Option<Key>, DomError> {
        self.extract_value(value)
            .map(|v| value_to_key(&v))
            .transpose()
    }

    /// Whether `inject` would succeed on this value.
    #[must_use]
    pub fn can_inject(&self, value: &Value) -> bool {
        let Self::Single(path) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }

        let mut current = value;
        for ident in path.split('.') {
            let Value::Object(map) = current else {
                return false;
            };
            match map.get(ident) {
                Some(next) => current = next,
                None => return true,
            }
        }

        true
    }

    /// Write a generated key into the value at this path, creating missing
    /// intermediate objects.
    pub fn inject(&self, value: &mut Value, key: &Key) -> Result<(), DomError> {
        let Self::Single(path) = self else {
            return Err(DomError::data("cannot inject a key through a compound key path"));
        };
        if path.is_empty() {
            return Err(DomError::data("cannot inject a key at the empty key path"));
        }

        let mut idents: Vec<&str> = path.split('.').collect();
        let last = idents.pop().unwrap_or_default();

        let mut current = value;
        for ident in idents {
            let map = current
                .as_object_mut()
                .ok_or_else(|| DomError::data(format!("'{ident}' has a non-object parent")))?;
            current = map
                .entry(ident.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }

        let map = current
            .as_object_mut()
            .ok_or_else(|| DomError::data(format!("'{last}' has a non-object parent")))?;
        map.insert(last.to_string(), Value::from(key));

        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::Single(path.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        Self::Compound(paths.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(path) => f.write_str(path),
            Self::Compound(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

fn validate_single(path: &str) -> Result<(), DomError> {
    if path.is_empty() || path.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(DomError::syntax(format!("'{path}' is not a valid key path")))
    }
}

fn is_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn extract_single(path: &str, value: &Value) -> Option<Value> {
    if path.is_empty() {
        return (!value.is_undefined()).then(|| value.clone());
    }

    let mut current = value.clone();
    for ident in path.split('.') {
        current = match (&current, ident) {
            (Value::String(s), "length") => Value::from(count_as_f64(s.encode_utf16().count())),
            (Value::Array(items), "length") => Value::from(count_as_f64(items.len())),
            (Value::Object(map), _) => map.get(ident)?.clone(),
            _ => return None,
        };
    }

    (!current.is_undefined()).then_some(current)
}

#[expect(clippy::cast_precision_loss)]
const fn count_as_f64(n: usize) -> f64 {
    n as f64
}
