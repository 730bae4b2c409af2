//! Module: proto
//! Responsibility: the wire contract between the sandboxed engine and the
//! privileged host: message envelopes, typed methods and their payloads.
//! Does not own: transport or dispatch (see `rpc`).
//! Boundary: every type here is plain serde data; nothing holds engine state.

mod idb;

#[cfg(test)]
mod tests;

pub use idb::*;

use derive_more::Display;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

///
/// Method
///
/// A named remote operation with typed parameters and result. Notifications
/// reuse the same trait and ignore `Output`.
///

pub trait Method: 'static {
    const NAME: &'static str;

    type Params: Serialize + DeserializeOwned;
    type Output: Serialize + DeserializeOwned;
}

///
/// RequestId
///
/// Correlation id carried by a request and echoed by its response.
///

#[derive(Clone, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

///
/// Message
///
/// One frame on the channel. Requests carry an id, notifications do not;
/// responses echo the id with either a result or an error.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Response {
        id: RequestId,
        #[serde(flatten)]
        outcome: Outcome,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

///
/// Outcome
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Result(serde_json::Value),
    Error(RemoteError),
}

///
/// RemoteError
///
/// Failure reported by the responder. `name` is a DOM exception name when
/// the failure maps onto one.
///

#[derive(Clone, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[display("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<crate::error::DomError> for RemoteError {
    fn from(err: crate::error::DomError) -> Self {
        Self::new(err.name(), err.message)
    }
}
