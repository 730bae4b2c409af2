//! Module: db::database
//! Responsibility: the shared state of one named database: version, object
//! stores, open connections, and the transaction queue.
//! Does not own: opening or deleting (see `db::factory`).
//! Boundary: at most one transaction runs at a time per database.

use crate::{
    config::Config,
    db::{Transaction, connection::ConnectionInner, names::NameList, remote::Remote, store::StoreState},
    proto::{StoreDescriptor, StoreParameters},
    task::Spawner,
};
use futures_util::FutureExt;
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};
use tracing::debug;

///
/// Database
///

pub(crate) struct Database {
    name: String,
    version: Cell<u64>,
    stores: RefCell<BTreeMap<String, Rc<StoreState>>>,
    connections: RefCell<Vec<Weak<ConnectionInner>>>,
    transactions: RefCell<Vec<Transaction>>,
    remote: Remote,
    spawner: Spawner,
    config: Rc<Config>,
    next_store_id: Cell<u64>,
    next_transaction_id: Cell<u64>,
}

impl Database {
    pub(crate) fn new(name: &str, remote: Remote, spawner: Spawner, config: Rc<Config>) -> Self {
        Self {
            name: name.to_string(),
            version: Cell::new(0),
            stores: RefCell::new(BTreeMap::new()),
            connections: RefCell::new(Vec::new()),
            transactions: RefCell::new(Vec::new()),
            remote,
            spawner,
            config,
            next_store_id: Cell::new(1),
            next_transaction_id: Cell::new(1),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.version.set(version);
    }

    pub(crate) const fn remote(&self) -> &Remote {
        &self.remote
    }

    pub(crate) const fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        let id = self.next_transaction_id.get();
        self.next_transaction_id.set(id + 1);
        id
    }

    ///
    /// STORES
    ///

    pub(crate) fn store(&self, name: &str) -> Option<Rc<StoreState>> {
        self.stores.borrow().get(name).cloned()
    }

    pub(crate) fn store_names(&self) -> NameList {
        self.stores.borrow().keys().cloned().collect()
    }

    /// A store that exists only locally until the upgrade commits.
    pub(crate) fn create_store(&self, name: &str, parameters: &StoreParameters) -> Rc<StoreState> {
        let store = Rc::new(StoreState::new(
            self.allocate_store_id(),
            name,
            parameters,
            self.remote.clone(),
            false,
        ));
        self.insert_store(Rc::clone(&store));

        store
    }

    pub(crate) fn insert_store(&self, store: Rc<StoreState>) {
        self.stores.borrow_mut().insert(store.name(), store);
    }

    pub(crate) fn remove_store(&self, name: &str) -> Option<Rc<StoreState>> {
        self.stores.borrow_mut().remove(name)
    }

    /// Replace the local schema with the remote's description.
    pub(crate) fn sync_schema(&self, descriptors: &[StoreDescriptor]) {
        let stores: BTreeMap<String, Rc<StoreState>> = descriptors
            .iter()
            .map(|descriptor| {
                let store =
                    StoreState::from_descriptor(self.allocate_store_id(), descriptor, self.remote.clone());
                (descriptor.name.clone(), Rc::new(store))
            })
            .collect();

        debug!(db = %self.name, stores = stores.len(), "schema synced from remote");
        *self.stores.borrow_mut() = stores;
    }

    /// Every store and index now exists remotely under its current name.
    pub(crate) fn mark_remote(&self) {
        for store in self.stores.borrow().values() {
            store.mark_remote();
        }
    }

    pub(crate) fn cleanup_after_completed_transaction(&self) {
        for store in self.stores.borrow().values() {
            store.cleanup_after_completed_transaction();
        }
    }

    fn allocate_store_id(&self) -> u64 {
        let id = self.next_store_id.get();
        self.next_store_id.set(id + 1);
        id
    }

    ///
    /// CONNECTIONS
    ///

    pub(crate) fn add_connection(&self, connection: &Rc<ConnectionInner>) {
        self.connections.borrow_mut().push(Rc::downgrade(connection));
    }

    pub(crate) fn remove_connection(&self, connection: &Rc<ConnectionInner>) {
        let target = Rc::downgrade(connection);
        self.connections
            .borrow_mut()
            .retain(|c| c.strong_count() > 0 && !c.ptr_eq(&target));
    }

    /// Live connections, optionally leaving one out.
    pub(crate) fn connections(&self, except: Option<&Rc<ConnectionInner>>) -> Vec<Rc<ConnectionInner>> {
        self.connections
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| except.is_none_or(|e| !Rc::ptr_eq(c, e)))
            .collect()
    }

    ///
    /// TRANSACTIONS
    ///

    pub(crate) fn push_transaction(&self, tx: Transaction) {
        self.transactions.borrow_mut().push(tx);
    }

    /// Unfinished transactions created by `connection`.
    pub(crate) fn transactions_of(&self, connection: &Rc<ConnectionInner>) -> Vec<Transaction> {
        self.transactions
            .borrow()
            .iter()
            .filter(|tx| !tx.is_finished() && tx.connection().is(connection))
            .cloned()
            .collect()
    }

    /// Schedule a look at the queue: once nothing is running, start the
    /// oldest pending transaction.
    pub(crate) fn process_transactions(self: &Rc<Self>) {
        let db = Rc::clone(self);
        self.spawner
            .spawn_local(async move { db.start_next() }.boxed_local());
    }

    fn start_next(&self) {
        let next = {
            let mut transactions = self.transactions.borrow_mut();
            transactions.retain(|tx| !tx.is_finished());
            if transactions.iter().any(Transaction::is_started) {
                return;
            }
            transactions.first().cloned()
        };

        if let Some(tx) = next {
            tx.mark_started();
            self.spawner.spawn_local(tx.run().boxed_local());
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("version", &self.version.get())
            .field("stores", &self.stores.borrow().len())
            .finish_non_exhaustive()
    }
}
