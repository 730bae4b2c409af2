use crate::{
    db::{
        Connection, database::Database, index::IndexState, key_generator::KeyGenerator,
        store::StoreState,
    },
    key::{Key, KeyRange},
    value::Value,
};
use std::rc::Rc;

///
/// UndoOp
///
/// One step of a transaction's rollback log. Steps are applied in reverse
/// order of recording when the transaction aborts.
///

#[derive(Debug)]
pub(crate) enum UndoOp {
    RestoreKeyGenerator {
        store: Rc<StoreState>,
        generator: KeyGenerator,
    },
    RemoveRecord {
        store: Rc<StoreState>,
        key: Key,
    },
    RestoreRecord {
        store: Rc<StoreState>,
        key: Key,
        value: Value,
    },
    RemoveCreatedStore {
        db: Rc<Database>,
        store: Rc<StoreState>,
    },
    RestoreDeletedStore {
        db: Rc<Database>,
        store: Rc<StoreState>,
    },
    RenameStore {
        db: Rc<Database>,
        store: Rc<StoreState>,
        old_name: String,
    },
    RestoreVersion {
        db: Rc<Database>,
        connection: Connection,
        old: u64,
    },
    RemoveCreatedIndex {
        store: Rc<StoreState>,
        index: Rc<IndexState>,
    },
    RestoreDeletedIndex {
        store: Rc<StoreState>,
        index: Rc<IndexState>,
    },
    RenameIndex {
        store: Rc<StoreState>,
        index: Rc<IndexState>,
        old_name: String,
    },
}

impl UndoOp {
    pub(crate) fn apply(self) {
        match self {
            Self::RestoreKeyGenerator { store, generator } => {
                *store.generator.borrow_mut() = generator;
            }
            Self::RemoveRecord { store, key } => {
                store.remove_records(&KeyRange::only(key));
            }
            Self::RestoreRecord { store, key, value } => {
                store.insert_record(&key, &value);
            }
            Self::RemoveCreatedStore { db, store } => {
                db.remove_store(&store.name());
                store.set_deleted(true);
            }
            Self::RestoreDeletedStore { db, store } => {
                store.set_deleted(false);
                db.insert_store(store);
            }
            Self::RenameStore {
                db,
                store,
                old_name,
            } => {
                db.remove_store(&store.name());
                store.set_name(&old_name);
                db.insert_store(store);
            }
            Self::RestoreVersion {
                db,
                connection,
                old,
            } => {
                db.set_version(old);
                connection.set_version(old);
            }
            Self::RemoveCreatedIndex { store, index } => {
                store.indexes.borrow_mut().remove(&index.name());
                index.set_deleted(true);
            }
            Self::RestoreDeletedIndex { store, index } => {
                index.set_deleted(false);
                store.indexes.borrow_mut().insert(index.name(), index);
            }
            Self::RenameIndex {
                store,
                index,
                old_name,
            } => {
                let mut indexes = store.indexes.borrow_mut();
                indexes.remove(&index.name());
                index.set_name(&old_name);
                indexes.insert(old_name, index);
            }
        }
    }
}
