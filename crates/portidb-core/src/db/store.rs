//! Module: db::store
//! Responsibility: object store state, local record maintenance with index
//! upkeep, the merged local/remote read path, and write logging.
//! Does not own: argument validation or request queuing (see
//! `db::handle::store`).
//! Boundary: every local mutation pushes its undo step and write entry
//! through the owning `Transaction`.

use crate::{
    db::{
        CursorDirection, ScanDirection, Transaction,
        index::IndexState,
        key_generator::KeyGenerator,
        merge::{fetch_unmasked, merge_sorted},
        names::NameList,
        record::{Record, RecordStore},
        remote::{CursorQuery, Remote},
        undo::UndoOp,
    },
    error::DomError,
    key::{Key, KeyPath, KeyRange},
    obs::sink::{self, MetricsEvent},
    proto::{CursorRecord, StoreDescriptor, StoreParameters, Write},
    value::Value,
};
use futures_util::{FutureExt, future::LocalBoxFuture};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::Rc,
};
use tracing::{debug, trace};

///
/// StoreState
///
/// One object store of a database. `remote_name` is the name the remote
/// knows the store by; `None` while the store exists only locally.
///

#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) id: u64,
    name: RefCell<String>,
    remote_name: RefCell<Option<String>>,
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    pub(crate) generator: RefCell<KeyGenerator>,
    pub(crate) records: RefCell<RecordStore<Value>>,
    pub(crate) indexes: RefCell<BTreeMap<String, Rc<IndexState>>>,
    deleted: Cell<bool>,
    remote: Remote,
}

impl StoreState {
    pub(crate) fn new(
        id: u64,
        name: &str,
        parameters: &StoreParameters,
        remote: Remote,
        on_remote: bool,
    ) -> Self {
        Self {
            id,
            name: RefCell::new(name.to_string()),
            remote_name: RefCell::new(on_remote.then(|| name.to_string())),
            key_path: parameters.key_path.clone(),
            auto_increment: parameters.auto_increment,
            generator: RefCell::new(KeyGenerator::new()),
            records: RefCell::new(RecordStore::new()),
            indexes: RefCell::new(BTreeMap::new()),
            deleted: Cell::new(false),
            remote,
        }
    }

    /// Materialize a store the remote already holds, with its indexes.
    pub(crate) fn from_descriptor(id: u64, descriptor: &StoreDescriptor, remote: Remote) -> Self {
        let store = Self::new(id, &descriptor.name, &descriptor.parameters, remote, true);
        {
            let mut indexes = store.indexes.borrow_mut();
            for index in &descriptor.indexes {
                indexes.insert(
                    index.name.clone(),
                    Rc::new(IndexState::from_descriptor(index)),
                );
            }
        }

        store
    }

    pub(crate) fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_string();
    }

    pub(crate) fn remote_name(&self) -> Option<String> {
        self.remote_name.borrow().clone()
    }

    pub(crate) const fn remote(&self) -> &Remote {
        &self.remote
    }

    /// The remote now knows this store and its indexes by their current
    /// names.
    pub(crate) fn mark_remote(&self) {
        *self.remote_name.borrow_mut() = Some(self.name());
        for index in self.indexes.borrow().values() {
            index.mark_remote();
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.deleted.set(deleted);
    }

    pub(crate) fn index(&self, name: &str) -> Option<Rc<IndexState>> {
        self.indexes.borrow().get(name).cloned()
    }

    pub(crate) fn index_names(&self) -> NameList {
        self.indexes.borrow().keys().cloned().collect()
    }

    /// Drop the masking state of the store and its indexes.
    pub(crate) fn cleanup_after_completed_transaction(&self) {
        self.records.borrow_mut().cleanup_after_completed_transaction();
        for index in self.indexes.borrow().values() {
            index.records.borrow_mut().cleanup_after_completed_transaction();
        }
    }

    ///
    /// LOCAL RECORDS
    ///

    /// Add a record and its index entries.
    pub(crate) fn insert_record(&self, key: &Key, value: &Value) {
        self.records.borrow_mut().add(key.clone(), value.clone());
        for index in self.indexes.borrow().values() {
            let mut entries = index.records.borrow_mut();
            for index_key in index.keys_for(value) {
                entries.add(index_key, key.clone());
            }
        }
    }

    /// Remove the records inside `range` and their index entries. The whole
    /// range stays masked until the transaction ends.
    pub(crate) fn remove_records(&self, range: &KeyRange) -> Vec<Record<Value>> {
        let removed = self.records.borrow_mut().delete(range);
        for index in self.indexes.borrow().values() {
            let mut entries = index.records.borrow_mut();
            for record in &removed {
                entries.delete_by_value(&record.key);
            }
        }

        removed
    }

    ///
    /// MERGED READS
    ///

    /// Records inside `range`, local cache merged over the remote store.
    pub(crate) async fn read(
        &self,
        range: &KeyRange,
        count: Option<u32>,
        just_keys: bool,
    ) -> Result<Vec<CursorRecord>, DomError> {
        let limit = count.map(|n| n as usize);
        let remote_name = self.remote_name();
        let first = remote_name
            .as_deref()
            .map(|name| self.fetch(name, range, count, just_keys));

        let cached: Vec<CursorRecord> = self
            .records
            .borrow()
            .values(range, ScanDirection::Asc)
            .take(limit.unwrap_or(usize::MAX))
            .map(|record| CursorRecord {
                key: record.key.clone(),
                primary_key: record.key.clone(),
                value: (!just_keys).then(|| record.value.clone()),
            })
            .collect();

        let (Some(first), Some(name)) = (first, remote_name) else {
            return Ok(cached);
        };

        let fetched = fetch_unmasked(
            first,
            count,
            |r| self.records.borrow().modified(&r.key),
            |last, n| {
                let from = range.clone().with_lower(last.key.clone(), false);
                self.fetch(&name, &from, Some(n), just_keys)
            },
        )
        .await?;

        sink::record(MetricsEvent::MergeRead {
            local: cached.len() as u64,
            remote: fetched.records.len() as u64,
            masked: fetched.masked,
        });
        trace!(
            store = %self.name(),
            local = cached.len(),
            remote = fetched.records.len(),
            masked = fetched.masked,
            "merged store read"
        );

        Ok(merge_sorted(cached, fetched.records, limit, |a, b| {
            a.key.cmp(&b.key)
        }))
    }

    fn fetch(
        &self,
        name: &str,
        range: &KeyRange,
        count: Option<u32>,
        just_keys: bool,
    ) -> LocalBoxFuture<'static, Result<Vec<CursorRecord>, DomError>> {
        if just_keys {
            let keys = self.remote.get_all_keys(name, range, count);
            async move {
                Ok(keys
                    .await?
                    .into_iter()
                    .map(|key| CursorRecord {
                        primary_key: key.clone(),
                        key,
                        value: None,
                    })
                    .collect())
            }
            .boxed_local()
        } else {
            self.remote.get_all_records(name, range, count).boxed_local()
        }
    }

    /// Whether a record with `key` exists, locally or (unless masked)
    /// remotely.
    pub(crate) async fn contains(&self, key: &Key) -> Result<bool, DomError> {
        let only = KeyRange::only(key.clone());
        if self.records.borrow().get(&only).is_some() {
            return Ok(true);
        }
        if self.records.borrow().modified(key) {
            return Ok(false);
        }

        match self.remote_name() {
            Some(name) => Ok(self.remote.count(&name, &only).await? > 0),
            None => Ok(false),
        }
    }

    ///
    /// WRITES
    ///

    /// Store a record for `add` (`no_overwrite`) or `put`. The caller has
    /// already validated the key and key path. Returns the effective key.
    pub(crate) async fn store_record(
        self: &Rc<Self>,
        tx: &Transaction,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<Key, DomError> {
        let key = match &self.key_path {
            Some(path) => path.extract_key(&value)?,
            None => key,
        };
        let key = if self.auto_increment {
            let before = *self.generator.borrow();
            let outcome = self.assign_key(tx, &mut value, key).await;
            if *self.generator.borrow() != before {
                tx.push_undo(UndoOp::RestoreKeyGenerator {
                    store: Rc::clone(self),
                    generator: before,
                });
            }
            outcome?
        } else {
            key.ok_or_else(|| DomError::data("no key could be derived for the record"))?
        };
        tx.ensure_running()?;

        let only = KeyRange::only(key.clone());
        if no_overwrite && self.records.borrow().get(&only).is_some() {
            return Err(duplicate(&key));
        }
        if let Some(err) = self.unique_clash(&value, &key) {
            return Err(err);
        }

        let existing = key.clone();
        let exists = no_overwrite.then(|| async move { self.contains(&existing).await });
        let remote_unique = self.remote_unique_checks(&value);
        if let Some(exists) = exists
            && exists.await?
        {
            return Err(duplicate(&key));
        }
        for (index, check) in remote_unique {
            let entries = check.await?;
            let records = self.records.borrow();
            if entries
                .iter()
                .any(|e| e.primary_key != key && !records.modified(&e.primary_key))
            {
                return Err(DomError::constraint(format!(
                    "index '{index}' already holds a record with that key"
                )));
            }
        }
        tx.ensure_running()?;

        for old in self.remove_records(&only) {
            tx.push_undo(UndoOp::RestoreRecord {
                store: Rc::clone(self),
                key: old.key,
                value: old.value,
            });
        }
        self.insert_record(&key, &value);
        tx.push_undo(UndoOp::RemoveRecord {
            store: Rc::clone(self),
            key: key.clone(),
        });

        let logged_key = self.key_path.is_none().then(|| key.clone());
        let write = if no_overwrite {
            Write::Add {
                value,
                key: logged_key,
            }
        } else {
            Write::Put {
                value,
                key: logged_key,
            }
        };
        tx.log_write(self, write);
        trace!(store = %self.name(), ?key, no_overwrite, "stored record");

        Ok(key)
    }

    /// Resolve the key of an auto-increment store: bump the generator past
    /// an explicit numeric key, or generate one and inject it in-line.
    async fn assign_key(
        &self,
        tx: &Transaction,
        value: &mut Value,
        key: Option<Key>,
    ) -> Result<Key, DomError> {
        if let Some(key) = key {
            if let Key::Number(n) = key {
                self.generator.borrow_mut().set_if_larger(n);
            }
            return Ok(key);
        }

        self.prime_generator(tx).await?;
        let generated = self.generator.borrow_mut().next()?;
        if let Some(path) = &self.key_path {
            path.inject(value, &generated)?;
        }

        Ok(generated)
    }

    /// Seed the generator from the largest numeric key the remote holds.
    async fn prime_generator(&self, tx: &Transaction) -> Result<(), DomError> {
        if self.generator.borrow().is_primed() {
            return Ok(());
        }

        if tx.config().prime_key_generators
            && let Some(name) = self.remote_name()
        {
            let last = self
                .remote
                .next_from_cursor(
                    &name,
                    CursorQuery {
                        range: KeyRange::upper_bound(Key::Number(f64::INFINITY), false),
                        direction: CursorDirection::Prev,
                        index_name: None,
                        prev_primary_key: None,
                        curr_primary_key: None,
                        just_keys: true,
                    },
                )
                .await?;

            if let Some(n) = last.and_then(|r| r.key.as_number()) {
                debug!(store = %name, largest = n, "primed key generator");
                self.generator.borrow_mut().set_if_larger(n);
            }
        }
        self.generator.borrow_mut().mark_primed();

        Ok(())
    }

    /// A local unique-index entry for one of `value`'s keys that belongs to
    /// another record.
    fn unique_clash(&self, value: &Value, key: &Key) -> Option<DomError> {
        self.indexes
            .borrow()
            .values()
            .filter(|index| index.unique)
            .find_map(|index| {
                let entries = index.records.borrow();
                index
                    .keys_for(value)
                    .into_iter()
                    .any(|index_key| {
                        entries
                            .values(&KeyRange::only(index_key), ScanDirection::Asc)
                            .any(|entry| entry.value != *key)
                    })
                    .then(|| {
                        DomError::constraint(format!(
                            "index '{}' already holds a record with that key",
                            index.name()
                        ))
                    })
            })
    }

    /// Remote lookups for each unique-index key `value` produces.
    fn remote_unique_checks(
        &self,
        value: &Value,
    ) -> Vec<(String, LocalBoxFuture<'static, Result<Vec<CursorRecord>, DomError>>)> {
        let Some(store_name) = self.remote_name() else {
            return Vec::new();
        };

        let mut checks = Vec::new();
        for index in self.indexes.borrow().values().filter(|index| index.unique) {
            let Some(index_name) = index.remote_name() else {
                continue;
            };
            for index_key in index.keys_for(value) {
                let check = self.remote.get_all_records_from_index(
                    &store_name,
                    &index_name,
                    &KeyRange::only(index_key),
                    None,
                );
                checks.push((index.name(), check.boxed_local()));
            }
        }

        checks
    }

    /// Delete every record inside `range`.
    pub(crate) fn delete(self: &Rc<Self>, tx: &Transaction, range: &KeyRange) {
        for old in self.remove_records(range) {
            tx.push_undo(UndoOp::RestoreRecord {
                store: Rc::clone(self),
                key: old.key,
                value: old.value,
            });
        }

        tx.log_write(
            self,
            Write::Delete {
                query: range.into(),
            },
        );
    }

    pub(crate) fn clear(self: &Rc<Self>, tx: &Transaction) {
        let removed = self.records.borrow_mut().clear();
        for index in self.indexes.borrow().values() {
            index.records.borrow_mut().clear();
        }

        for old in removed {
            tx.push_undo(UndoOp::RestoreRecord {
                store: Rc::clone(self),
                key: old.key,
                value: old.value,
            });
        }

        tx.log_write(self, Write::Clear);
    }
}

fn duplicate(key: &Key) -> DomError {
    DomError::constraint(format!("a record with key {key:?} already exists"))
}
