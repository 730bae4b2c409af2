use crate::{error::DomError, key::Key, value::Value};

/// Convert a structured value into a key.
///
/// Numbers, dates, strings, binary buffers and arrays of those convert;
/// everything else, NaN numbers and invalid dates included, is a `DataError`.
/// Owned values cannot be cyclic or sparse, so arrays only need their
/// elements checked.
pub fn value_to_key(value: &Value) -> Result<Key, DomError> {
    match value {
        Value::Number(n) if n.is_nan() => Err(DomError::data("NaN is not a valid key")),
        Value::Number(n) => Ok(Key::Number(*n)),
        Value::Date(ms) if !Key::is_valid_date(*ms) => {
            Err(DomError::data("invalid date is not a valid key"))
        }
        Value::Date(ms) => Ok(Key::Date(*ms)),
        Value::String(s) => Ok(Key::String(s.clone())),
        Value::Binary(bytes) => Ok(Key::Binary(bytes.clone())),
        Value::Array(items) => items
            .iter()
            .map(value_to_key)
            .collect::<Result<Vec<_>, _>>()
            .map(Key::Array),
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Object(_) => {
            Err(DomError::data("value is not a valid key"))
        }
    }
}
