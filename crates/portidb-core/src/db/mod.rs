//! Module: db
//! Responsibility: the IndexedDB object model: factory, connections,
//! transactions, stores, indexes, cursors and requests, all backed by a
//! local write cache merged over remote reads.
//! Does not own: the wire protocol or the message channel.
//! Boundary: everything runs on one thread; detached work goes through
//! the `Spawner` handed to the `Factory`.

mod connection;
mod cursor;
mod database;
mod direction;
mod event;
mod factory;
mod handle;
mod index;
mod key_generator;
mod merge;
mod names;
mod record;
mod registry;
mod remote;
mod request;
mod signal;
mod store;
mod transaction;
mod undo;

pub use connection::Connection;
pub use cursor::Cursor;
pub use direction::{CursorDirection, ScanDirection, TransactionMode};
pub use event::{Event, EventSource, EventTarget, EventType, ListenerId};
pub use factory::Factory;
pub use handle::{Index, ObjectStore};
pub use names::NameList;
pub use request::{Completion, ReadyState, Request, RequestResult, RequestSource};
pub use transaction::{Transaction, TransactionOutcome, TransactionState};
