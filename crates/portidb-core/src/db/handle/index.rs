use crate::{
    db::{
        CursorDirection, ObjectStore, Request, RequestResult, RequestSource, Transaction,
        cursor::{Cursor, CursorSource},
        handle::{count_of, limit, query, queue},
        index::IndexState,
        store::StoreState,
        undo::UndoOp,
    },
    error::DomError,
    key::{KeyPath, KeyRange},
    proto::{CursorRecord, StoreUpgradeAction, StoreUpgradeEntry},
};
use std::{fmt, rc::Rc};

///
/// Index
///
/// An index as seen through one transaction. Reads return store records
/// ordered by index key, then primary key.
///

#[derive(Clone)]
pub struct Index {
    store: Rc<StoreState>,
    index: Rc<IndexState>,
    tx: Transaction,
}

impl Index {
    pub(crate) const fn new(store: Rc<StoreState>, index: Rc<IndexState>, tx: Transaction) -> Self {
        Self { store, index, tx }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.index.name()
    }

    #[must_use]
    pub fn key_path(&self) -> KeyPath {
        self.index.key_path.clone()
    }

    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.index.multi_entry
    }

    #[must_use]
    pub fn unique(&self) -> bool {
        self.index.unique
    }

    #[must_use]
    pub fn object_store(&self) -> ObjectStore {
        ObjectStore::new(Rc::clone(&self.store), self.tx.clone())
    }

    fn source(&self) -> RequestSource {
        RequestSource::Index(self.clone())
    }

    fn ensure_usable(&self) -> Result<(), DomError> {
        if self.store.is_deleted() || self.index.is_deleted() {
            return Err(DomError::invalid_state("the index or its store was deleted"));
        }

        self.tx.ensure_active()
    }

    fn queue_read(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
        just_keys: bool,
        finish: impl FnOnce(Vec<CursorRecord>) -> RequestResult + 'static,
    ) -> Result<Request, DomError> {
        self.ensure_usable()?;
        let range = query(range)?;
        let (store, index) = (Rc::clone(&self.store), Rc::clone(&self.index));

        queue(&self.tx, self.source(), move || async move {
            let records = index.read(&store, &range, count, just_keys).await?;
            Ok(finish(records))
        })
    }

    /// The store value of the first entry inside `range`.
    pub fn get(&self, range: impl Into<KeyRange>) -> Result<Request, DomError> {
        self.queue_read(Some(range.into()), Some(1), false, |mut records| {
            RequestResult::Value(records.pop().and_then(|r| r.value))
        })
    }

    /// The primary key of the first entry inside `range`.
    pub fn get_key(&self, range: impl Into<KeyRange>) -> Result<Request, DomError> {
        self.queue_read(Some(range.into()), Some(1), true, |mut records| {
            RequestResult::Key(records.pop().map(|r| r.primary_key))
        })
    }

    pub fn get_all(&self, range: Option<KeyRange>, count: Option<u32>) -> Result<Request, DomError> {
        self.queue_read(range, limit(count), false, |records| {
            RequestResult::Values(records.into_iter().filter_map(|r| r.value).collect())
        })
    }

    /// Primary keys of the entries inside `range`.
    pub fn get_all_keys(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request, DomError> {
        self.queue_read(range, limit(count), true, |records| {
            RequestResult::Keys(records.into_iter().map(|r| r.primary_key).collect())
        })
    }

    pub fn count(&self, range: Option<KeyRange>) -> Result<Request, DomError> {
        self.queue_read(range, None, true, |records| count_of(records.len()))
    }

    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> Result<Request, DomError> {
        self.open(range, direction, false)
    }

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
            CursorSource::Index {
                store: Rc::clone(&self.store),
                index: Rc::clone(&self.index),
            },
            &self.tx,
            range,
            direction,
            key_only,
        )
    }

    /// Rename the index. Only valid inside the upgrade.
    pub fn set_name(&self, name: &str) -> Result<(), DomError> {
        if !self.tx.mode().is_version_change() {
            return Err(DomError::invalid_state("schema changes need an upgrade"));
        }
        self.ensure_usable()?;

        let old_name = self.index.name();
        if old_name == name {
            return Ok(());
        }
        if self.store.index(name).is_some() {
            return Err(DomError::constraint(format!(
                "an index named '{name}' already exists"
            )));
        }

        self.tx.upgrade_log().push(
            self.store.id,
            &self.store.name(),
            StoreUpgradeEntry::Schema(StoreUpgradeAction::ModifyIndex {
                name: old_name.clone(),
                new_name: name.to_string(),
            }),
        );
        self.tx.push_undo(UndoOp::RenameIndex {
            store: Rc::clone(&self.store),
            index: Rc::clone(&self.index),
            old_name: old_name.clone(),
        });

        let mut indexes = self.store.indexes.borrow_mut();
        indexes.remove(&old_name);
        self.index.set_name(name);
        indexes.insert(name.to_string(), Rc::clone(&self.index));

        Ok(())
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.index.name())
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}
