//! Core engine for portidb: an IndexedDB implementation that buffers writes
//! in a local tombstone cache and reads through to a remote store reached
//! over a message-port RPC channel.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod config;
pub mod db;
pub mod error;
pub mod key;
pub mod obs;
pub mod proto;
pub mod rpc;
pub mod task;
pub mod value;

pub(crate) mod serialize;

///
/// Prelude
///
/// The names an application needs to open a database and work with it.
///

pub mod prelude {
    pub use crate::{
        db::{
            Connection, Cursor, CursorDirection, EventSource, EventType, Factory, Index,
            ObjectStore, Request, RequestResult, Transaction, TransactionMode,
        },
        error::DomError,
        key::{Key, KeyPath, KeyRange},
        proto::{IndexParameters, StoreParameters},
        value::Value,
    };
}
