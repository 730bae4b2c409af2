//! Module: db::request
//! Responsibility: the pending-then-done handle returned by every
//! asynchronous engine operation.
//! Does not own: running the operation (see `db::transaction`).
//! Boundary: a request settles exactly once per run; cursor requests are
//! reset and rerun by `continue`/`advance`.

use crate::{
    db::{
        Connection, Cursor, Index, ObjectStore, Transaction,
        event::{EventSource, EventTarget},
    },
    error::DomError,
    key::Key,
    value::Value,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

///
/// ReadyState
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReadyState {
    #[default]
    Pending,
    Done,
}

///
/// RequestResult
///

#[derive(Clone, Debug, Default)]
pub enum RequestResult {
    #[default]
    Undefined,
    Value(Option<Value>),
    Key(Option<Key>),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Option<Cursor>),
    Connection(Connection),
}

impl RequestResult {
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => value,
            _ => None,
        }
    }

    #[must_use]
    pub fn into_key(self) -> Option<Key> {
        match self {
            Self::Key(key) => key,
            _ => None,
        }
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Values(values) => values,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn into_keys(self) -> Vec<Key> {
        match self {
            Self::Keys(keys) => keys,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub const fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_cursor(self) -> Option<Cursor> {
        match self {
            Self::Cursor(cursor) => cursor,
            _ => None,
        }
    }

    #[must_use]
    pub fn into_connection(self) -> Option<Connection> {
        match self {
            Self::Connection(connection) => Some(connection),
            _ => None,
        }
    }
}

///
/// RequestSource
///

#[derive(Clone, Debug)]
pub enum RequestSource {
    Store(ObjectStore),
    Index(Index),
}

///
/// Request
///

#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

#[derive(Default)]
struct RequestInner {
    ready_state: Cell<ReadyState>,
    outcome: RefCell<Option<Result<RequestResult, DomError>>>,
    provisional: RefCell<Option<RequestResult>>,
    source: Option<RequestSource>,
    transaction: RefCell<Option<Transaction>>,
    internal: bool,
    events: EventTarget,
    waiters: RefCell<Vec<Rc<WaiterSlot>>>,
    settle: RefCell<Option<Waker>>,
    runs: Cell<u64>,
}

#[derive(Default)]
struct WaiterSlot {
    waker: RefCell<Option<Waker>>,
    observed: Cell<bool>,
}

impl Request {
    pub(crate) fn new(source: Option<RequestSource>, transaction: Option<Transaction>) -> Self {
        Self {
            inner: Rc::new(RequestInner {
                source,
                transaction: RefCell::new(transaction),
                ..RequestInner::default()
            }),
        }
    }

    /// A request the engine queues for its own bookkeeping; failing it
    /// aborts the transaction without an error event.
    pub(crate) fn internal(transaction: &Transaction) -> Self {
        Self {
            inner: Rc::new(RequestInner {
                transaction: RefCell::new(Some(transaction.clone())),
                internal: true,
                ..RequestInner::default()
            }),
        }
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state.get()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.ready_state() == ReadyState::Done
    }

    /// The settled result, or for an open request still running its
    /// upgrade, the connection being upgraded.
    #[must_use]
    pub fn result(&self) -> Option<RequestResult> {
        match &*self.inner.outcome.borrow() {
            Some(Ok(result)) => Some(result.clone()),
            Some(Err(_)) => None,
            None => self.inner.provisional.borrow().clone(),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<DomError> {
        match &*self.inner.outcome.borrow() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<&RequestSource> {
        self.inner.source.as_ref()
    }

    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        self.inner.transaction.borrow().clone()
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.inner.internal
    }

    pub(crate) fn set_transaction(&self, transaction: Option<Transaction>) {
        *self.inner.transaction.borrow_mut() = transaction;
    }

    pub(crate) fn set_provisional(&self, result: Option<RequestResult>) {
        *self.inner.provisional.borrow_mut() = result;
    }

    /// Settle the request. Waiters are not woken until `wake_waiters`.
    pub(crate) fn finish(&self, outcome: Result<RequestResult, DomError>) {
        *self.inner.outcome.borrow_mut() = Some(outcome);
        *self.inner.provisional.borrow_mut() = None;
        self.inner.ready_state.set(ReadyState::Done);
    }

    /// Make the request pending again before it is rerun. Releases the
    /// settle gate of the previous run, whose waiters are gone.
    pub(crate) fn reset(&self) {
        self.inner.ready_state.set(ReadyState::Pending);
        *self.inner.outcome.borrow_mut() = None;
        self.inner.waiters.borrow_mut().clear();
        self.inner.runs.set(self.inner.runs.get().wrapping_add(1));

        let waker = self.inner.settle.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn wake_waiters(&self) {
        let wakers: Vec<Waker> = self
            .inner
            .waiters
            .borrow()
            .iter()
            .filter_map(|slot| slot.waker.borrow_mut().take())
            .collect();

        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRequest {
        WeakRequest(Rc::downgrade(&self.inner))
    }

    /// Resolves once every task awaiting this request has seen its result.
    pub(crate) fn settled(&self) -> Settled {
        Settled {
            request: self.clone(),
            run: self.inner.runs.get(),
        }
    }

    fn all_observed(&self) -> bool {
        self.inner.waiters.borrow().iter().all(|slot| slot.observed.get())
    }

    fn notify_settle(&self) {
        if self.all_observed() {
            let waker = self.inner.settle.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    fn outcome(&self) -> Option<Result<RequestResult, DomError>> {
        if self.is_done() {
            self.inner.outcome.borrow().clone()
        } else {
            None
        }
    }
}

///
/// WeakRequest
///
/// Non-owning reference held by a cursor to the request it reports
/// through, so a request's cursor result does not keep itself alive.
///

#[derive(Clone, Default)]
pub(crate) struct WeakRequest(Weak<RequestInner>);

impl WeakRequest {
    pub(crate) fn upgrade(&self) -> Option<Request> {
        self.0.upgrade().map(|inner| Request { inner })
    }
}

impl EventSource for Request {
    fn events(&self) -> &EventTarget {
        &self.inner.events
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("ready_state", &self.ready_state())
            .field("internal", &self.inner.internal)
            .finish_non_exhaustive()
    }
}

impl IntoFuture for Request {
    type Output = Result<RequestResult, DomError>;
    type IntoFuture = Completion;

    fn into_future(self) -> Completion {
        Completion {
            request: self,
            slot: None,
        }
    }
}

impl IntoFuture for &Request {
    type Output = Result<RequestResult, DomError>;
    type IntoFuture = Completion;

    fn into_future(self) -> Completion {
        self.clone().into_future()
    }
}

///
/// Completion
///
/// Future of a request's outcome. The owning transaction stays active
/// until every pending `Completion` has observed the result (or been
/// dropped), so requests issued right after `.await` join the same
/// transaction.
///

pub struct Completion {
    request: Request,
    slot: Option<Rc<WaiterSlot>>,
}

impl Future for Completion {
    type Output = Result<RequestResult, DomError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.request.outcome() {
            if let Some(slot) = &self.slot {
                slot.observed.set(true);
            }
            self.request.notify_settle();

            return Poll::Ready(outcome);
        }

        if let Some(slot) = &self.slot {
            *slot.waker.borrow_mut() = Some(cx.waker().clone());
        } else {
            let slot = Rc::new(WaiterSlot::default());
            *slot.waker.borrow_mut() = Some(cx.waker().clone());
            self.request.inner.waiters.borrow_mut().push(Rc::clone(&slot));
            self.slot = Some(slot);
        }

        Poll::Pending
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take()
            && !slot.observed.replace(true)
        {
            self.request.notify_settle();
        }
    }
}

///
/// Settled
///

pub(crate) struct Settled {
    request: Request,
    run: u64,
}

impl Future for Settled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.request.inner.runs.get() != self.run || self.request.all_observed() {
            return Poll::Ready(());
        }

        *self.request.inner.settle.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn completion_resolves_after_finish() {
        let request = Request::new(None, None);
        let mut completion = (&request).into_future();

        assert!((&mut completion).now_or_never().is_none());
        request.finish(Ok(RequestResult::Count(3)));
        request.wake_waiters();

        let result = completion.now_or_never().unwrap().unwrap();
        assert_eq!(result.as_count(), Some(3));
        assert!(request.settled().now_or_never().is_some());
    }

    #[test]
    fn pending_waiters_hold_back_settling() {
        let request = Request::new(None, None);
        let mut completion = (&request).into_future();
        assert!((&mut completion).now_or_never().is_none());

        request.finish(Ok(RequestResult::Undefined));
        assert!(request.settled().now_or_never().is_none());

        drop(completion);
        assert!(request.settled().now_or_never().is_some());
    }

    #[test]
    fn errors_are_reported_once_done() {
        let request = Request::new(None, None);
        assert!(request.error().is_none());

        request.finish(Err(DomError::constraint("dup")));

        assert_eq!(request.ready_state(), ReadyState::Done);
        assert_eq!(request.error().unwrap().name(), "ConstraintError");
        assert!(request.result().is_none());
    }

    #[test]
    fn reset_makes_a_request_pending_again() {
        let request = Request::new(None, None);
        request.finish(Ok(RequestResult::Undefined));
        request.reset();

        assert_eq!(request.ready_state(), ReadyState::Pending);
        assert!(request.clone().into_future().now_or_never().is_none());
    }

    #[test]
    fn rerunning_releases_the_previous_settle_gate() {
        let request = Request::new(None, None);
        request.finish(Ok(RequestResult::Undefined));
        let mut gate = request.settled();

        // A caller re-arms the request and awaits its next run right away.
        request.reset();
        let mut next = (&request).into_future();
        assert!((&mut next).now_or_never().is_none());

        assert!((&mut gate).now_or_never().is_some());
        assert!(request.settled().now_or_never().is_none());
    }
}
