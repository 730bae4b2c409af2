use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// DomError
///
/// Error surfaced by every engine operation, either synchronously from the
/// call site (validation) or asynchronously through a failed request.
/// The `kind` is one of the fixed DOM exception names; `message` carries the
/// human-readable detail and defaults to the kind's fixed description.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, ThisError)]
#[error("{kind}: {message}")]
pub struct DomError {
    pub kind: DomErrorKind,
    pub message: String,
}

impl DomError {
    pub fn new(kind: DomErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Construct an error carrying the kind's fixed description.
    #[must_use]
    pub fn from_kind(kind: DomErrorKind) -> Self {
        Self::new(kind, kind.description())
    }

    #[must_use]
    pub fn abort() -> Self {
        Self::from_kind(DomErrorKind::Abort)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::Constraint, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::Data, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::InvalidState, message)
    }

    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::InvalidAccess, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::NotFound, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::Syntax, message)
    }

    #[must_use]
    pub fn read_only() -> Self {
        Self::from_kind(DomErrorKind::ReadOnly)
    }

    #[must_use]
    pub fn transaction_inactive() -> Self {
        Self::from_kind(DomErrorKind::TransactionInactive)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DomErrorKind::Unknown, message)
    }

    #[must_use]
    pub fn version() -> Self {
        Self::from_kind(DomErrorKind::Version)
    }

    /// DOM exception name, e.g. `"ConstraintError"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    #[must_use]
    pub fn is(&self, kind: DomErrorKind) -> bool {
        self.kind == kind
    }
}

///
/// DomErrorKind
///
/// Fixed error taxonomy. Names and descriptions are part of the wire
/// contract with the privileged side and must not change.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DomErrorKind {
    Abort,
    Constraint,
    DataClone,
    Data,
    InvalidState,
    InvalidAccess,
    NotFound,
    NotReadable,
    QuotaExceeded,
    Syntax,
    ReadOnly,
    TransactionInactive,
    Unknown,
    Version,
}

impl DomErrorKind {
    pub const ALL: [Self; 14] = [
        Self::Abort,
        Self::Constraint,
        Self::DataClone,
        Self::Data,
        Self::InvalidState,
        Self::InvalidAccess,
        Self::NotFound,
        Self::NotReadable,
        Self::QuotaExceeded,
        Self::Syntax,
        Self::ReadOnly,
        Self::TransactionInactive,
        Self::Unknown,
        Self::Version,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Abort => "AbortError",
            Self::Constraint => "ConstraintError",
            Self::DataClone => "DataCloneError",
            Self::Data => "DataError",
            Self::InvalidState => "InvalidStateError",
            Self::InvalidAccess => "InvalidAccessError",
            Self::NotFound => "NotFoundError",
            Self::NotReadable => "NotReadableError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::Syntax => "SyntaxError",
            Self::ReadOnly => "ReadOnlyError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::Unknown => "UnknownError",
            Self::Version => "VersionError",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Abort => "A request was aborted.",
            Self::Constraint => {
                "A mutation operation in the transaction failed because a constraint was not satisfied."
            }
            Self::DataClone => {
                "The data being stored could not be cloned by the internal structured cloning algorithm."
            }
            Self::Data => "Data provided to an operation does not meet requirements.",
            Self::InvalidState => "The object is in an invalid state.",
            Self::InvalidAccess => "An invalid operation was performed on an object.",
            Self::NotFound => {
                "The operation failed because the requested database object could not be found."
            }
            Self::NotReadable => {
                "The operation failed because the underlying storage containing the requested data could not be read."
            }
            Self::QuotaExceeded => {
                "The operation failed because there was not enough remaining storage space, or the storage quota was reached and the user declined to give more space to the database."
            }
            Self::Syntax => "The keyPath argument contains an invalid key path.",
            Self::ReadOnly => "The mutating operation was attempted in a read-only transaction.",
            Self::TransactionInactive => {
                "A request was placed against a transaction which is currently not active, or which is finished."
            }
            Self::Unknown => {
                "The operation failed for transient reasons unrelated to the database itself or not covered by any other error."
            }
            Self::Version => {
                "An attempt was made to open a database using a lower version than the existing version."
            }
        }
    }

    /// Resolve a DOM exception name back into its kind.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for DomErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for kind in DomErrorKind::ALL {
            assert_eq!(DomErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(DomErrorKind::from_name("TypeError"), None);
    }

    #[test]
    fn from_kind_uses_fixed_description() {
        let err = DomError::from_kind(DomErrorKind::ReadOnly);

        assert_eq!(
            err.message,
            "The mutating operation was attempted in a read-only transaction."
        );
        assert_eq!(
            err.to_string(),
            "ReadOnlyError: The mutating operation was attempted in a read-only transaction."
        );
    }
}
