use portidb_core::{
    error::{DomError, DomErrorKind},
    key::Key,
    proto::RemoteError,
};
use thiserror::Error as ThisError;

///
/// HostError
///
/// Failure of one host-side method. Reported to the engine as a remote
/// error carrying the matching DOM exception name.
///

#[derive(Debug, ThisError)]
pub enum HostError {
    #[error("object store '{0}' not found")]
    StoreNotFound(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("object store '{0}' already exists")]
    StoreExists(String),

    #[error("index '{0}' already exists")]
    IndexExists(String),

    #[error("a record with key {0:?} already exists")]
    DuplicateKey(Key),

    #[error("unique index '{index}' already holds key {key:?}")]
    UniqueViolation { index: String, key: Key },

    #[error("requested version {requested} is below the stored version {current}")]
    VersionTooLow { requested: u64, current: u64 },

    #[error("key generator exhausted")]
    GeneratorExhausted,

    #[error(transparent)]
    Dom(#[from] DomError),
}

impl HostError {
    #[must_use]
    pub const fn kind(&self) -> DomErrorKind {
        match self {
            Self::StoreNotFound(_) | Self::IndexNotFound(_) => DomErrorKind::NotFound,
            Self::StoreExists(_)
            | Self::IndexExists(_)
            | Self::DuplicateKey(_)
            | Self::UniqueViolation { .. }
            | Self::GeneratorExhausted => DomErrorKind::Constraint,
            Self::VersionTooLow { .. } => DomErrorKind::Version,
            Self::Dom(err) => err.kind,
        }
    }
}

impl From<HostError> for RemoteError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Dom(err) => err.into(),
            other => Self::new(other.kind().name(), other.to_string()),
        }
    }
}
