use crate::{
    error::{DomError, DomErrorKind},
    proto::RemoteError,
};
use thiserror::Error as ThisError;

///
/// RpcError
///

#[derive(Debug, ThisError)]
pub enum RpcError {
    #[error("message channel closed")]
    Closed,

    #[error("remote error: {0}")]
    Remote(RemoteError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),
}

impl RpcError {
    /// The error as the responder reports it on the wire.
    #[must_use]
    pub fn into_remote(self) -> RemoteError {
        match self {
            Self::Remote(err) => err,
            other => RemoteError::new(DomErrorKind::Unknown.name(), other.to_string()),
        }
    }
}

impl From<RpcError> for DomError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(remote) => match DomErrorKind::from_name(&remote.name) {
                Some(kind) => Self::new(kind, remote.message),
                None => Self::unknown(format!("{}: {}", remote.name, remote.message)),
            },
            other => Self::unknown(other.to_string()),
        }
    }
}
