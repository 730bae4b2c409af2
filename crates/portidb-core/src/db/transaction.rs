//! Module: db::transaction
//! Responsibility: the per-transaction request queue, its active/inactive
//! state machine, the rollback log, and the write/upgrade logs flushed to
//! the remote on commit.
//! Does not own: what an operation does (see `db::store`, `db::cursor`).
//! Boundary: one queued operation runs at a time, in enqueue order; the
//! remote sees nothing of a transaction until it commits.

use crate::{
    config::Config,
    db::{
        Connection, ObjectStore, Request, RequestResult, TransactionMode,
        database::Database,
        event::{Event, EventSource, EventTarget, EventType, dispatch_along},
        names::NameList,
        signal::Signal,
        store::StoreState,
        undo::UndoOp,
    },
    error::DomError,
    obs::sink::{self, MetricsEvent},
    proto::{StoreParameters, StoreUpgradeEntry, UpgradeAction, Write, WriteLog},
    task::yield_now,
};
use futures_util::{FutureExt, future::LocalBoxFuture};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    future::Future,
    rc::Rc,
};
use tracing::{debug, warn};

/// Deferred body of a queued request.
pub(crate) type Operation =
    Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<RequestResult, DomError>>>;

///
/// TransactionState
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransactionState {
    #[default]
    Active,
    Inactive,
    Committing,
    Finished,
}

///
/// TransactionOutcome
///

#[derive(Clone, Debug, PartialEq)]
pub enum TransactionOutcome {
    Completed,
    Aborted(DomError),
}

impl TransactionOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

///
/// UpgradeLog
///
/// Schema changes and writes of a versionchange transaction, in the shape
/// the remote replays them. Entries for a store are appended to that
/// store's action only while it is the most recent one, so the replay
/// order matches the order the changes were made in.
///

#[derive(Debug, Default)]
pub(crate) struct UpgradeLog {
    actions: Vec<UpgradeAction>,
    by_store: HashMap<u64, usize>,
}

impl UpgradeLog {
    pub(crate) fn create_store(&mut self, id: u64, name: &str, options: StoreParameters) {
        self.actions.push(UpgradeAction::CreateObjectStore {
            name: name.to_string(),
            options,
            do_on_upgrade: Vec::new(),
        });
        self.by_store.insert(id, self.actions.len() - 1);
    }

    pub(crate) fn delete_store(&mut self, id: u64, name: &str) {
        self.actions.push(UpgradeAction::DeleteObjectStore {
            name: name.to_string(),
        });
        self.by_store.remove(&id);
    }

    /// Append an entry under the store's current name.
    pub(crate) fn push(&mut self, id: u64, name: &str, entry: StoreUpgradeEntry) {
        let last = self.actions.len().checked_sub(1);
        let at = match self.by_store.get(&id) {
            Some(&at) if Some(at) == last => at,
            _ => {
                self.actions.push(UpgradeAction::ModifyObjectStore {
                    name: name.to_string(),
                    do_on_upgrade: Vec::new(),
                });
                let at = self.actions.len() - 1;
                self.by_store.insert(id, at);
                at
            }
        };

        if let Some(entries) = self.actions[at].entries_mut() {
            entries.push(entry);
        }
    }

    pub(crate) fn take(&mut self) -> Vec<UpgradeAction> {
        self.by_store.clear();
        std::mem::take(&mut self.actions)
    }
}

///
/// Transaction
///

#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

struct TransactionInner {
    id: u64,
    mode: TransactionMode,
    db: Rc<Database>,
    connection: Connection,
    scope: NameList,
    state: Cell<TransactionState>,
    started: Cell<bool>,
    error: RefCell<Option<DomError>>,
    queue: RefCell<VecDeque<(Request, Operation)>>,
    running: RefCell<Option<Request>>,
    undo: RefCell<Vec<UndoOp>>,
    writes: RefCell<BTreeMap<String, Vec<Write>>>,
    upgrade: RefCell<UpgradeLog>,
    events: EventTarget,
    done: Signal<TransactionOutcome>,
}

impl Transaction {
    pub(crate) fn new(
        db: &Rc<Database>,
        connection: &Connection,
        scope: NameList,
        mode: TransactionMode,
    ) -> Self {
        let id = db.next_transaction_id();
        debug!(db = %db.name(), tx = id, ?mode, stores = ?scope.as_slice(), "transaction created");

        Self {
            inner: Rc::new(TransactionInner {
                id,
                mode,
                db: Rc::clone(db),
                connection: connection.clone(),
                scope,
                state: Cell::new(TransactionState::Active),
                started: Cell::new(false),
                error: RefCell::new(None),
                queue: RefCell::new(VecDeque::new()),
                running: RefCell::new(None),
                undo: RefCell::new(Vec::new()),
                writes: RefCell::new(BTreeMap::new()),
                upgrade: RefCell::new(UpgradeLog::default()),
                events: EventTarget::default(),
                done: Signal::new(),
            }),
        }
    }

    ///
    /// PUBLIC API
    ///

    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    /// The error that aborted the transaction; `None` after an explicit
    /// `abort()`.
    #[must_use]
    pub fn error(&self) -> Option<DomError> {
        self.inner.error.borrow().clone()
    }

    #[must_use]
    pub fn connection(&self) -> Connection {
        self.inner.connection.clone()
    }

    /// Stores in scope. A versionchange transaction spans every store.
    #[must_use]
    pub fn object_store_names(&self) -> NameList {
        if self.inner.mode.is_version_change() {
            self.inner.db.store_names()
        } else {
            self.inner.scope.clone()
        }
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore, DomError> {
        if self.is_finished() {
            return Err(DomError::invalid_state("the transaction has finished"));
        }
        if !self.inner.mode.is_version_change() && !self.inner.scope.contains(name) {
            return Err(DomError::not_found(format!(
                "'{name}' is not in the transaction's scope"
            )));
        }

        self.inner
            .db
            .store(name)
            .map(|store| ObjectStore::new(store, self.clone()))
            .ok_or_else(|| DomError::not_found(format!("no object store named '{name}'")))
    }

    /// Abort, rolling back every local change.
    pub fn abort(&self) -> Result<(), DomError> {
        match self.state() {
            TransactionState::Committing | TransactionState::Finished => Err(
                DomError::invalid_state("the transaction is committing or finished"),
            ),
            _ => {
                self.abort_with(None);
                Ok(())
            }
        }
    }

    /// Commit once the queued requests have run; no new requests are
    /// accepted.
    pub fn commit(&self) -> Result<(), DomError> {
        if self.state() != TransactionState::Active {
            return Err(DomError::transaction_inactive());
        }
        self.set_state(TransactionState::Committing);

        Ok(())
    }

    /// Resolves when the transaction completes or aborts.
    pub fn done(&self) -> impl Future<Output = TransactionOutcome> + use<> {
        self.inner.done.wait()
    }

    ///
    /// ENGINE API
    ///

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn db(&self) -> &Rc<Database> {
        &self.inner.db
    }

    pub(crate) fn config(&self) -> &Config {
        self.inner.db.config()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state() == TransactionState::Finished
    }

    pub(crate) fn is_started(&self) -> bool {
        self.inner.started.get()
    }

    pub(crate) fn mark_started(&self) {
        self.inner.started.set(true);
    }

    fn set_state(&self, state: TransactionState) {
        self.inner.state.set(state);
    }

    /// Requests may only be placed while the transaction is active.
    pub(crate) fn ensure_active(&self) -> Result<(), DomError> {
        if self.state() == TransactionState::Active {
            Ok(())
        } else {
            Err(DomError::transaction_inactive())
        }
    }

    /// Checked by operations after each remote round-trip, before they
    /// touch local state.
    pub(crate) fn ensure_running(&self) -> Result<(), DomError> {
        if self.is_finished() {
            Err(DomError::abort())
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), DomError> {
        if self.inner.mode.is_read_only() {
            Err(DomError::read_only())
        } else {
            Ok(())
        }
    }

    pub(crate) fn queue_request(
        &self,
        request: Request,
        operation: Operation,
    ) -> Result<Request, DomError> {
        self.ensure_active()?;
        self.inner
            .queue
            .borrow_mut()
            .push_back((request.clone(), operation));

        Ok(request)
    }

    /// Queue engine bookkeeping; a failure aborts the transaction.
    pub(crate) fn queue_internal(&self, operation: Operation) {
        let request = Request::internal(self);
        self.inner.queue.borrow_mut().push_back((request, operation));
    }

    pub(crate) fn push_undo(&self, op: UndoOp) {
        self.inner.undo.borrow_mut().push(op);
    }

    /// Record a data write. Inside an upgrade it joins the store's upgrade
    /// action instead of the write log.
    pub(crate) fn log_write(&self, store: &StoreState, write: Write) {
        if self.inner.mode.is_version_change() {
            self.inner
                .upgrade
                .borrow_mut()
                .push(store.id, &store.name(), StoreUpgradeEntry::Write(write));
        } else {
            self.inner
                .writes
                .borrow_mut()
                .entry(store.name())
                .or_default()
                .push(write);
        }
    }

    pub(crate) fn upgrade_log(&self) -> std::cell::RefMut<'_, UpgradeLog> {
        self.inner.upgrade.borrow_mut()
    }

    ///
    /// EXECUTION
    ///

    /// Drive the queue until it drains, then commit.
    pub(crate) async fn run(self) {
        yield_now().await;
        debug!(tx = self.id(), "transaction started");

        loop {
            if self.is_finished() {
                return;
            }

            let next = self.inner.queue.borrow_mut().pop_front();
            let Some((request, operation)) = next else {
                self.finish().await;
                return;
            };
            if request.is_done() {
                continue;
            }

            self.deactivate();
            *self.inner.running.borrow_mut() = Some(request.clone());
            let outcome = operation().await;
            self.inner.running.borrow_mut().take();
            if self.is_finished() {
                return;
            }

            match outcome {
                Ok(result) => {
                    request.finish(Ok(result));
                    if request.is_internal() {
                        continue;
                    }

                    self.activate();
                    request
                        .events()
                        .dispatch(&Event::new(EventType::Success).with_request(&request));
                    request.wake_waiters();
                }
                Err(err) if request.is_internal() => {
                    self.abort_with(Some(err));
                    return;
                }
                Err(err) => {
                    request.finish(Err(err.clone()));
                    self.activate();

                    let event = Event::error_event(err.clone()).with_request(&request);
                    self.dispatch_request_event(&request, &event);
                    request.wake_waiters();

                    if !event.default_prevented() {
                        debug!(tx = self.id(), error = %err, "unhandled request error");
                        self.abort_with(Some(err));
                        return;
                    }
                }
            }

            request.settled().await;
            if self.is_finished() {
                return;
            }
            self.deactivate();
            yield_now().await;
        }
    }

    fn activate(&self) {
        if self.state() == TransactionState::Inactive {
            self.set_state(TransactionState::Active);
        }
    }

    fn deactivate(&self) {
        if self.state() == TransactionState::Active {
            self.set_state(TransactionState::Inactive);
        }
    }

    fn dispatch_request_event(&self, request: &Request, event: &Event) {
        dispatch_along(
            event,
            &[
                request.events(),
                &self.inner.events,
                self.inner.connection.events(),
            ],
        );
    }

    async fn finish(&self) {
        self.set_state(TransactionState::Committing);

        match self.flush().await {
            Ok(()) => {
                self.inner.undo.borrow_mut().clear();
                self.inner.db.cleanup_after_completed_transaction();
                self.set_state(TransactionState::Finished);
                debug!(tx = self.id(), "transaction committed");

                self.inner.events.dispatch(&Event::new(EventType::Complete));
                self.inner.done.set(TransactionOutcome::Completed);
                sink::record(MetricsEvent::TransactionFinished { committed: true });
            }
            Err(err) => {
                warn!(tx = self.id(), error = %err, "remote flush failed, rolling back");
                self.rollback();
                self.inner.db.cleanup_after_completed_transaction();
                *self.inner.error.borrow_mut() = Some(err.clone());
                self.set_state(TransactionState::Finished);

                self.fire_abort();
                self.inner.done.set(TransactionOutcome::Aborted(err));
                sink::record(MetricsEvent::TransactionFinished { committed: false });
            }
        }

        self.inner.db.process_transactions();
    }

    async fn flush(&self) -> Result<(), DomError> {
        let db = &self.inner.db;

        if self.inner.mode.is_version_change() {
            let actions = self.inner.upgrade.borrow_mut().take();
            debug!(db = %db.name(), version = db.version(), actions = actions.len(), "flushing upgrade");
            db.remote().open_database(Some(db.version()), actions).await?;
            db.mark_remote();

            return Ok(());
        }

        let log = WriteLog {
            db_name: db.name().to_string(),
            ops: std::mem::take(&mut *self.inner.writes.borrow_mut()),
        };
        if log.is_empty() {
            return Ok(());
        }

        debug!(db = %db.name(), stores = log.ops.len(), "flushing write log");
        db.remote().execute_transaction(log).await
    }

    fn rollback(&self) {
        let undo = std::mem::take(&mut *self.inner.undo.borrow_mut());
        for op in undo.into_iter().rev() {
            op.apply();
        }

        self.inner.writes.borrow_mut().clear();
        self.inner.upgrade.borrow_mut().take();
    }

    fn fire_abort(&self) {
        dispatch_along(
            &Event::new(EventType::Abort).bubbling(),
            &[&self.inner.events, self.inner.connection.events()],
        );
    }

    /// Roll back and fail every outstanding request with `AbortError`.
    /// `cause` is `None` for an explicit abort.
    pub(crate) fn abort_with(&self, cause: Option<DomError>) {
        if self.is_finished() {
            return;
        }
        debug!(tx = self.id(), cause = ?cause, "transaction aborting");

        self.rollback();

        let abort = DomError::abort();
        let running = self.inner.running.borrow_mut().take();
        let queued: Vec<Request> = self
            .inner
            .queue
            .borrow_mut()
            .drain(..)
            .map(|(request, _)| request)
            .collect();

        *self.inner.error.borrow_mut() = cause.clone();
        self.set_state(TransactionState::Finished);

        for request in running.into_iter().chain(queued) {
            if request.is_done() {
                continue;
            }
            request.finish(Err(abort.clone()));
            if !request.is_internal() {
                self.dispatch_request_event(&request, &Event::error_event(abort.clone()).with_request(&request));
            }
            request.wake_waiters();
        }

        self.inner.db.cleanup_after_completed_transaction();

        let tx = self.clone();
        let outcome = TransactionOutcome::Aborted(cause.unwrap_or(abort));
        self.inner.db.spawner().spawn_local(
            async move {
                tx.fire_abort();
                tx.inner.done.set(outcome);
                sink::record(MetricsEvent::TransactionFinished { committed: false });
                tx.inner.db.process_transactions();
            }
            .boxed_local(),
        );
    }
}

impl EventSource for Transaction {
    fn events(&self) -> &EventTarget {
        &self.inner.events
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        key::KeyPath,
        proto::{StoreUpgradeAction, Write},
        value::Value,
    };

    fn put() -> StoreUpgradeEntry {
        StoreUpgradeEntry::Write(Write::Put {
            value: Value::Null,
            key: None,
        })
    }

    fn names(log: &UpgradeLog) -> Vec<(&str, usize)> {
        log.actions
            .iter()
            .map(|a| {
                let entries = match a {
                    UpgradeAction::CreateObjectStore { do_on_upgrade, .. }
                    | UpgradeAction::ModifyObjectStore { do_on_upgrade, .. } => do_on_upgrade.len(),
                    UpgradeAction::DeleteObjectStore { .. } => 0,
                };
                (a.store_name(), entries)
            })
            .collect()
    }

    #[test]
    fn entries_join_the_latest_action_of_their_store() {
        let mut log = UpgradeLog::default();
        log.create_store(1, "items", StoreParameters::default());
        log.push(1, "items", put());
        log.push(1, "items", put());

        assert_eq!(names(&log), vec![("items", 2)]);
    }

    #[test]
    fn interleaved_stores_open_new_modify_actions() {
        let mut log = UpgradeLog::default();
        log.create_store(1, "a", StoreParameters::default());
        log.create_store(2, "b", StoreParameters::default());
        log.push(1, "a", put());
        log.push(
            2,
            "b",
            StoreUpgradeEntry::Schema(StoreUpgradeAction::CreateIndex {
                name: "by".into(),
                key_path: KeyPath::from("x"),
                options: Default::default(),
            }),
        );

        assert_eq!(names(&log), vec![("a", 0), ("b", 0), ("a", 1), ("b", 1)]);
    }

    #[test]
    fn deleted_stores_start_afresh() {
        let mut log = UpgradeLog::default();
        log.create_store(1, "a", StoreParameters::default());
        log.delete_store(1, "a");
        log.push(1, "a", put());

        assert_eq!(names(&log), vec![("a", 0), ("a", 0), ("a", 1)]);
        assert_eq!(log.take().len(), 3);
        assert!(log.actions.is_empty());
    }
}
