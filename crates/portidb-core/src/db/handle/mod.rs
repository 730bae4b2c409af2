//! Module: db::handle
//! Responsibility: the public object store and index handles: argument
//! validation at the call site, then queuing the operation on the owning
//! transaction.
//! Does not own: record storage, merging, or cursor movement.
//! Boundary: every method either fails synchronously or returns a queued
//! `Request`.

mod index;
mod store;

pub use index::Index;
pub use store::ObjectStore;

use crate::{
    db::{Request, RequestResult, RequestSource, Transaction},
    error::DomError,
    key::KeyRange,
};
use futures_util::FutureExt;
use std::future::Future;

/// Queue `op` on `tx` as a request from `source`.
fn queue<Fut>(
    tx: &Transaction,
    source: RequestSource,
    op: impl FnOnce() -> Fut + 'static,
) -> Result<Request, DomError>
where
    Fut: Future<Output = Result<RequestResult, DomError>> + 'static,
{
    let request = Request::new(Some(source), Some(tx.clone()));

    tx.queue_request(request, Box::new(move || op().boxed_local()))
}

/// Validate an optional query; `None` matches everything.
fn query(range: Option<KeyRange>) -> Result<KeyRange, DomError> {
    let range = range.unwrap_or_default();
    range.validate()?;

    Ok(range)
}

/// `getAll` treats a zero count as no limit.
fn limit(count: Option<u32>) -> Option<u32> {
    count.filter(|n| *n > 0)
}

fn count_of(records: usize) -> RequestResult {
    RequestResult::Count(records as u64)
}
