//! Module: db::connection
//! Responsibility: one open handle on a database: schema changes during an
//! upgrade, transaction creation, and closing.
//! Does not own: the open/upgrade flow (see `db::factory`).
//! Boundary: schema changes are only accepted while this connection's
//! upgrade transaction is active.

use crate::{
    db::{
        ObjectStore, Transaction, TransactionMode, TransactionState,
        database::Database,
        event::{Event, EventSource, EventTarget, EventType},
        names::NameList,
        signal::Signal,
        undo::UndoOp,
    },
    error::DomError,
    key::KeyPath,
    proto::StoreParameters,
};
use futures_util::FutureExt;
use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    rc::Rc,
};
use tracing::{debug, warn};

///
/// Connection
///

#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    db: Rc<Database>,
    version: Cell<u64>,
    close_pending: Cell<bool>,
    closed: Signal<()>,
    upgrade: RefCell<Option<Transaction>>,
    events: EventTarget,
}

impl ConnectionInner {
    pub(crate) fn is_close_pending(&self) -> bool {
        self.close_pending.get()
    }

    pub(crate) fn fire_version_change(&self, old: u64, new: Option<u64>) {
        self.events
            .dispatch(&Event::versions(EventType::VersionChange, old, new));
    }

    pub(crate) fn closed(&self) -> impl Future<Output = ()> + use<> {
        self.closed.wait()
    }
}

impl Connection {
    pub(crate) fn new(db: &Rc<Database>) -> Self {
        let inner = Rc::new(ConnectionInner {
            db: Rc::clone(db),
            version: Cell::new(db.version()),
            close_pending: Cell::new(false),
            closed: Signal::new(),
            upgrade: RefCell::new(None),
            events: EventTarget::default(),
        });
        db.add_connection(&inner);

        Self { inner }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.db.name()
    }

    /// The version this connection opened (or is upgrading to).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn object_store_names(&self) -> NameList {
        self.inner.db.store_names()
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.inner.version.set(version);
    }

    pub(crate) const fn inner(&self) -> &Rc<ConnectionInner> {
        &self.inner
    }

    pub(crate) fn is(&self, inner: &Rc<ConnectionInner>) -> bool {
        Rc::ptr_eq(&self.inner, inner)
    }

    pub(crate) fn set_upgrade(&self, tx: Option<Transaction>) {
        *self.inner.upgrade.borrow_mut() = tx;
    }

    fn running_upgrade(&self) -> Option<Transaction> {
        self.inner
            .upgrade
            .borrow()
            .clone()
            .filter(|tx| !tx.is_finished())
    }

    fn upgrade_for_schema_change(&self) -> Result<(Transaction, &Rc<Database>), DomError> {
        let tx = self
            .running_upgrade()
            .ok_or_else(|| DomError::invalid_state("schema changes need a running upgrade"))?;
        tx.ensure_active()?;

        Ok((tx, &self.inner.db))
    }

    ///
    /// SCHEMA
    ///

    /// Create an object store. Only valid inside the upgrade.
    pub fn create_object_store(
        &self,
        name: &str,
        parameters: StoreParameters,
    ) -> Result<ObjectStore, DomError> {
        let (tx, db) = self.upgrade_for_schema_change()?;

        if let Some(path) = &parameters.key_path {
            path.validate()?;
        }
        if db.store(name).is_some() {
            return Err(DomError::constraint(format!(
                "an object store named '{name}' already exists"
            )));
        }
        let generated_path_unusable = match &parameters.key_path {
            Some(KeyPath::Single(path)) => path.is_empty(),
            Some(KeyPath::Compound(_)) => true,
            None => false,
        };
        if parameters.auto_increment && generated_path_unusable {
            return Err(DomError::invalid_access(
                "auto-increment needs a non-empty, non-compound key path",
            ));
        }

        let store = db.create_store(name, &parameters);
        tx.push_undo(UndoOp::RemoveCreatedStore {
            db: Rc::clone(db),
            store: Rc::clone(&store),
        });
        tx.upgrade_log().create_store(store.id, name, parameters);
        debug!(db = %db.name(), store = name, "object store created");

        Ok(ObjectStore::new(store, tx))
    }

    /// Delete an object store. Only valid inside the upgrade.
    pub fn delete_object_store(&self, name: &str) -> Result<(), DomError> {
        let (tx, db) = self.upgrade_for_schema_change()?;

        let store = db
            .remove_store(name)
            .ok_or_else(|| DomError::not_found(format!("no object store named '{name}'")))?;
        store.set_deleted(true);
        tx.upgrade_log().delete_store(store.id, name);
        tx.push_undo(UndoOp::RestoreDeletedStore {
            db: Rc::clone(db),
            store,
        });
        debug!(db = %db.name(), store = name, "object store deleted");

        Ok(())
    }

    ///
    /// TRANSACTIONS
    ///

    /// Start a transaction over `names`. It runs once every earlier
    /// transaction of the database has finished.
    pub fn transaction<I, S>(&self, names: I, mode: TransactionMode) -> Result<Transaction, DomError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.inner.close_pending.get() {
            return Err(DomError::invalid_state("the connection is closing"));
        }
        if self.running_upgrade().is_some() {
            return Err(DomError::invalid_state("an upgrade is running"));
        }

        let scope: NameList = names.into_iter().collect();
        let db = &self.inner.db;
        if let Some(missing) = scope.iter().find(|name| db.store(name).is_none()) {
            return Err(DomError::not_found(format!("no object store named '{missing}'")));
        }
        if scope.is_empty() {
            return Err(DomError::invalid_access("a transaction needs at least one store"));
        }
        if mode.is_version_change() {
            return Err(DomError::invalid_access(
                "versionchange transactions are only created by open",
            ));
        }

        let tx = Transaction::new(db, self, scope, mode);
        db.push_transaction(tx.clone());
        db.process_transactions();

        Ok(tx)
    }

    ///
    /// CLOSING
    ///

    /// Close once every transaction of this connection has finished. During
    /// an upgrade the upgrade is aborted and `AbortError` is returned.
    pub fn close(&self) -> Result<(), DomError> {
        if self.inner.close_pending.replace(true) {
            return Ok(());
        }

        let upgrade = self
            .running_upgrade()
            .filter(|tx| tx.state() != TransactionState::Committing);
        if let Some(tx) = &upgrade {
            tx.abort_with(Some(DomError::abort()));
        }

        let inner = Rc::clone(&self.inner);
        let db = Rc::clone(&self.inner.db);
        let spawner = Rc::clone(db.spawner());
        spawner.spawn_local(
            async move {
                for tx in db.transactions_of(&inner) {
                    tx.done().await;
                }
                if let Err(err) = db.remote().close_database().await {
                    warn!(db = %db.name(), error = %err, "closeDatabase failed");
                }
                db.remove_connection(&inner);
                debug!(db = %db.name(), "connection closed");
                inner.closed.set(());
            }
            .boxed_local(),
        );

        match upgrade {
            Some(_) => Err(DomError::abort()),
            None => Ok(()),
        }
    }

    /// Resolves once the connection is fully closed.
    pub fn closed(&self) -> impl Future<Output = ()> + use<> {
        self.inner.closed()
    }
}

impl EventSource for Connection {
    fn events(&self) -> &EventTarget {
        &self.inner.events
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("close_pending", &self.inner.close_pending.get())
            .finish_non_exhaustive()
    }
}
