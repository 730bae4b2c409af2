use crate::{error::DomError, key::Key};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

///
/// KeyRange
///
/// An interval over keys. A missing bound is unbounded on that side; an
/// open bound excludes the bound key itself.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Key>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl KeyRange {
    /// The range matching every key.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    #[must_use]
    pub const fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    #[must_use]
    pub const fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Build a two-sided range. An empty interval is a `DataError`.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Result<Self, DomError> {
        lower.validate()?;
        upper.validate()?;

        match lower.cmp(&upper) {
            Ordering::Greater => Err(DomError::data("lower bound is greater than upper bound")),
            Ordering::Equal if lower_open || upper_open => {
                Err(DomError::data("bounds are equal and one of them is open"))
            }
            _ => Ok(Self {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        !self.is_below(key) && !self.is_above(key)
    }

    /// True when `key` sorts before every key the range matches.
    #[must_use]
    pub fn is_below(&self, key: &Key) -> bool {
        self.lower.as_ref().is_some_and(|lower| match key.cmp(lower) {
            Ordering::Less => true,
            Ordering::Equal => self.lower_open,
            Ordering::Greater => false,
        })
    }

    /// True when `key` sorts after every key the range matches.
    #[must_use]
    pub fn is_above(&self, key: &Key) -> bool {
        self.upper.as_ref().is_some_and(|upper| match key.cmp(upper) {
            Ordering::Greater => true,
            Ordering::Equal => self.upper_open,
            Ordering::Less => false,
        })
    }

    /// Replace the lower bound, keeping the upper one.
    #[must_use]
    pub fn with_lower(mut self, key: Key, open: bool) -> Self {
        self.lower = Some(key);
        self.lower_open = open;
        self
    }

    /// Replace the upper bound, keeping the lower one.
    #[must_use]
    pub fn with_upper(mut self, key: Key, open: bool) -> Self {
        self.upper = Some(key);
        self.upper_open = open;
        self
    }

    /// The single key this range matches, if it is an equality range.
    #[must_use]
    pub fn as_only(&self) -> Option<&Key> {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper))
                if lower == upper && !self.lower_open && !self.upper_open =>
            {
                Some(lower)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Validate every bound key.
    pub fn validate(&self) -> Result<(), DomError> {
        if let Some(lower) = &self.lower {
            lower.validate()?;
        }
        if let Some(upper) = &self.upper {
            upper.validate()?;
        }

        Ok(())
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        Self::only(key)
    }
}
