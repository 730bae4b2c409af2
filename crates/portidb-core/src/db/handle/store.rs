use crate::{
    db::{
        CursorDirection, Index, Request, RequestResult, RequestSource, Transaction,
        cursor::{Cursor, CursorSource},
        handle::{count_of, limit, query, queue},
        index::IndexState,
        names::NameList,
        store::StoreState,
        undo::UndoOp,
    },
    error::DomError,
    key::{Key, KeyPath, KeyRange},
    proto::{IndexParameters, StoreUpgradeAction, StoreUpgradeEntry},
    value::Value,
};
use futures_util::FutureExt;
use std::{fmt, rc::Rc};
use tracing::debug;

///
/// ObjectStore
///
/// An object store as seen through one transaction.
///

#[derive(Clone)]
pub struct ObjectStore {
    store: Rc<StoreState>,
    tx: Transaction,
}

impl ObjectStore {
    pub(crate) const fn new(store: Rc<StoreState>, tx: Transaction) -> Self {
        Self { store, tx }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.store.name()
    }

    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.store.key_path.clone()
    }

    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.store.auto_increment
    }

    #[must_use]
    pub fn index_names(&self) -> NameList {
        self.store.index_names()
    }

    #[must_use]
    pub fn transaction(&self) -> Transaction {
        self.tx.clone()
    }

    fn source(&self) -> RequestSource {
        RequestSource::Store(self.clone())
    }

    fn ensure_usable(&self) -> Result<(), DomError> {
        if self.store.is_deleted() {
            return Err(DomError::invalid_state("the object store was deleted"));
        }

        self.tx.ensure_active()
    }

    fn ensure_upgrading(&self) -> Result<(), DomError> {
        if !self.tx.mode().is_version_change() {
            return Err(DomError::invalid_state("schema changes need an upgrade"));
        }

        self.ensure_usable()
    }

    ///
    /// READS
    ///

    /// The first record inside `range`.
    pub fn get(&self, range: impl Into<KeyRange>) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(Some(range.into()))?;
        let store = Rc::clone(&self.store);

        queue(&self.tx, self.source(), move || async move {
            let mut records = store.read(&range, Some(1), false).await?;
            Ok(RequestResult::Value(records.pop().and_then(|r| r.value)))
        })
    }

    /// The key of the first record inside `range`.
    pub fn get_key(&self, range: impl Into<KeyRange>) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(Some(range.into()))?;
        let store = Rc::clone(&self.store);

        queue(&self.tx, self.source(), move || async move {
            let mut records = store.read(&range, Some(1), true).await?;
            Ok(RequestResult::Key(records.pop().map(|r| r.key)))
        })
    }

    pub fn get_all(&self, range: Option<KeyRange>, count: Option<u32>) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(range)?;
        let store = Rc::clone(&self.store);

        queue(&self.tx, self.source(), move || async move {
            let records = store.read(&range, limit(count), false).await?;
            Ok(RequestResult::Values(
                records.into_iter().filter_map(|r| r.value).collect(),
            ))
        })
    }

    pub fn get_all_keys(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(range)?;
        let store = Rc::clone(&self.store);

        queue(&self.tx, self.source(), move || async move {
            let records = store.read(&range, limit(count), true).await?;
            Ok(RequestResult::Keys(records.into_iter().map(|r| r.key).collect()))
        })
    }

    pub fn count(&self, range: Option<KeyRange>) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(range)?;
        let store = Rc::clone(&self.store);

        queue(&self.tx, self.source(), move || async move {
            Ok(count_of(store.read(&range, None, true).await?.len()))
        })
    }

    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> Result<Request, DomError> {
        self.open(range, direction, false)
    }

    /// Like `open_cursor`, without loading values.
    pub fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> Result<Request, DomError> {
        self.open(range, direction, true)
    }

    fn open(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
        key_only: bool,
    ) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(range)?;

        Cursor::open(
            CursorSource::Store(Rc::clone(&self.store)),
            &self.tx,
            range,
            direction,
            key_only,
        )
    }

    ///
    /// WRITES
    ///

    /// Insert a record; fails with `ConstraintError` if the key exists.
    pub fn add(&self, value: Value, key: Option<Key>) -> Result<Request, DomError> {
        self.write(value, key, true)
    }

    /// Insert or replace a record.
    pub fn put(&self, value: Value, key: Option<Key>) -> Result<Request, DomError> {
        self.write(value, key, false)
    }

    fn write(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> Result<Request, DomError> {
        self.ensure_usable()?;
        self.tx.ensure_writable()?;
        self.check_key(&value, key.as_ref())?;

        let store = Rc::clone(&self.store);
        let tx = self.tx.clone();
        queue(&self.tx, self.source(), move || async move {
            let key = store.store_record(&tx, value, key, no_overwrite).await?;
            Ok(RequestResult::Key(Some(key)))
        })
    }

    /// Call-site key checks for `add`/`put`.
    fn check_key(&self, value: &Value, key: Option<&Key>) -> Result<(), DomError> {
        if let Some(key) = key {
            key.validate()?;
        }

        match (&self.store.key_path, key) {
            (Some(_), Some(_)) => Err(DomError::data(
                "an explicit key was given for a store with an in-line key path",
            )),
            (Some(path), None) => match path.extract_key(value)? {
                Some(_) => Ok(()),
                None if self.store.auto_increment && path.can_inject(value) => Ok(()),
                None => Err(DomError::data("the value has no key at the store's key path")),
            },
            (None, None) if !self.store.auto_increment => Err(DomError::data(
                "a key is required for a store without a key path or generator",
            )),
            _ => Ok(()),
        }
    }

    /// Delete every record inside `range`.
    pub fn delete(&self, range: impl Into<KeyRange>) -> Result<Request, DomError> {
        self.ensure_usable()?;
        self.tx.ensure_writable()?;
        let range = query(Some(range.into()))?;

        let store = Rc::clone(&self.store);
        let tx = self.tx.clone();
        queue(&self.tx, self.source(), move || async move {
            store.delete(&tx, &range);
            Ok(RequestResult::Undefined)
        })
    }

    pub fn clear(&self) -> Result<Request, DomError> {
        self.ensure_usable()?;
        self.tx.ensure_writable()?;

        let store = Rc::clone(&self.store);
        let tx = self.tx.clone();
        queue(&self.tx, self.source(), move || async move {
            store.clear(&tx);
            Ok(RequestResult::Undefined)
        })
    }

    ///
    /// SCHEMA
    ///

    pub fn index(&self, name: &str) -> Result<Index, DomError> {
        if self.tx.is_finished() {
            return Err(DomError::invalid_state("the transaction has finished"));
        }
        if self.store.is_deleted() {
            return Err(DomError::invalid_state("the object store was deleted"));
        }

        self.store
            .index(name)
            .map(|index| Index::new(Rc::clone(&self.store), index, self.tx.clone()))
            .ok_or_else(|| DomError::not_found(format!("no index named '{name}'")))
    }

    /// Create an index and fill it from the records held locally. A unique
    /// index that finds a duplicate aborts the upgrade.
    pub fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        parameters: IndexParameters,
    ) -> Result<Index, DomError> {
        self.ensure_upgrading()?;
        if self.store.index(name).is_some() {
            return Err(DomError::constraint(format!(
                "an index named '{name}' already exists"
            )));
        }
        key_path.validate()?;
        if parameters.multi_entry && key_path.is_compound() {
            return Err(DomError::invalid_access(
                "a multi-entry index cannot use a compound key path",
            ));
        }

        let index = Rc::new(IndexState::new(name, key_path.clone(), parameters, false));
        self.store
            .indexes
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&index));
        self.tx.push_undo(UndoOp::RemoveCreatedIndex {
            store: Rc::clone(&self.store),
            index: Rc::clone(&index),
        });
        self.tx.upgrade_log().push(
            self.store.id,
            &self.store.name(),
            StoreUpgradeEntry::Schema(StoreUpgradeAction::CreateIndex {
                name: name.to_string(),
                key_path,
                options: parameters,
            }),
        );

        let (store, populated) = (Rc::clone(&self.store), Rc::clone(&index));
        self.tx.queue_internal(Box::new(move || {
            async move {
                populated.populate(&store)?;
                Ok(RequestResult::Undefined)
            }
            .boxed_local()
        }));
        debug!(store = %self.store.name(), index = name, "index created");

        Ok(Index::new(Rc::clone(&self.store), index, self.tx.clone()))
    }

    pub fn delete_index(&self, name: &str) -> Result<(), DomError> {
        self.ensure_upgrading()?;

        let index = self
            .store
            .indexes
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| DomError::not_found(format!("no index named '{name}'")))?;
        index.set_deleted(true);
        self.tx.push_undo(UndoOp::RestoreDeletedIndex {
            store: Rc::clone(&self.store),
            index,
        });
        self.tx.upgrade_log().push(
            self.store.id,
            &self.store.name(),
            StoreUpgradeEntry::Schema(StoreUpgradeAction::DeleteIndex {
                name: name.to_string(),
            }),
        );

        Ok(())
    }

    /// Rename the store. Only valid inside the upgrade.
    pub fn set_name(&self, name: &str) -> Result<(), DomError> {
        self.ensure_upgrading()?;

        let old_name = self.store.name();
        if old_name == name {
            return Ok(());
        }
        let db = self.tx.db();
        if db.store(name).is_some() {
            return Err(DomError::constraint(format!(
                "an object store named '{name}' already exists"
            )));
        }

        self.tx.upgrade_log().push(
            self.store.id,
            &old_name,
            StoreUpgradeEntry::Schema(StoreUpgradeAction::RenameObjectStore {
                new_name: name.to_string(),
            }),
        );
        self.tx.push_undo(UndoOp::RenameStore {
            db: Rc::clone(db),
            store: Rc::clone(&self.store),
            old_name: old_name.clone(),
        });
        db.remove_store(&old_name);
        self.store.set_name(name);
        db.insert_store(Rc::clone(&self.store));

        Ok(())
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.store.name())
            .field("transaction", &self.tx)
            .finish()
    }
}
