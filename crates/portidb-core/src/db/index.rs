//! Module: db::index
//! Responsibility: index state, entry derivation from stored values, and
//! the merged local/remote index read.
//! Does not own: the public `Index` handle or request queuing.
//! Boundary: entries are kept in step with the owning store by
//! `StoreState`; masking uses the owning store's modification set.

use crate::{
    db::{
        ScanDirection,
        merge::{fetch_unmasked, merge_sorted},
        record::RecordStore,
        store::StoreState,
    },
    error::DomError,
    key::{Key, KeyPath, KeyRange, value_to_key},
    obs::sink::{self, MetricsEvent},
    proto::{CursorRecord, IndexDescriptor, IndexParameters},
    value::Value,
};
use std::cell::{Cell, RefCell};
use tracing::trace;

///
/// IndexState
///
/// One index of an object store. `remote_name` is the name the remote
/// knows the index by; `None` while the index exists only locally.
///

#[derive(Debug)]
pub(crate) struct IndexState {
    name: RefCell<String>,
    remote_name: RefCell<Option<String>>,
    pub(crate) key_path: KeyPath,
    pub(crate) multi_entry: bool,
    pub(crate) unique: bool,
    pub(crate) records: RefCell<RecordStore<Key>>,
    deleted: Cell<bool>,
}

impl IndexState {
    pub(crate) fn new(
        name: &str,
        key_path: KeyPath,
        parameters: IndexParameters,
        on_remote: bool,
    ) -> Self {
        Self {
            name: RefCell::new(name.to_string()),
            remote_name: RefCell::new(on_remote.then(|| name.to_string())),
            key_path,
            multi_entry: parameters.multi_entry,
            unique: parameters.unique,
            records: RefCell::new(RecordStore::new()),
            deleted: Cell::new(false),
        }
    }

    pub(crate) fn from_descriptor(descriptor: &IndexDescriptor) -> Self {
        Self::new(
            &descriptor.name,
            descriptor.key_path.clone(),
            descriptor.parameters,
            true,
        )
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

    pub(crate) fn mark_remote(&self) {
        *self.remote_name.borrow_mut() = Some(self.name());
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.deleted.set(deleted);
    }

    /// Index keys a stored value produces. A missing path or an invalid
    /// key yields nothing; a multi-entry array yields each valid element
    /// once.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        let Some(extracted) = self.key_path.extract_value(value) else {
            return Vec::new();
        };

        match (&extracted, self.multi_entry) {
            (Value::Array(items), true) => {
                let mut keys: Vec<Key> = items.iter().filter_map(|v| value_to_key(v).ok()).collect();
                keys.sort();
                keys.dedup();
                keys
            }
            _ => value_to_key(&extracted).into_iter().collect(),
        }
    }

    /// Build entries for every record the store holds locally. A unique
    /// index fails on the first duplicate key.
    pub(crate) fn populate(&self, store: &StoreState) -> Result<(), DomError> {
        let records = store.records.borrow();
        let mut entries = self.records.borrow_mut();

        for record in records.values(&KeyRange::unbounded(), ScanDirection::Asc) {
            for key in self.keys_for(&record.value) {
                if self.unique && entries.get(&KeyRange::only(key.clone())).is_some() {
                    return Err(DomError::constraint(format!(
                        "index '{}' already holds key {key:?}",
                        self.name()
                    )));
                }
                entries.add(key, record.key.clone());
            }
        }

        Ok(())
    }

    /// Index entries inside `range`, ordered by (index key, primary key),
    /// merged with the remote index. Values are filled in unless
    /// `just_keys`.
    pub(crate) async fn read(
        &self,
        store: &StoreState,
        range: &KeyRange,
        count: Option<u32>,
        just_keys: bool,
    ) -> Result<Vec<CursorRecord>, DomError> {
        let limit = count.map(|n| n as usize);
        let remote = store.remote_name().zip(self.remote_name());
        let fetch = |store_name: &str, index_name: &str, range: &KeyRange, count: Option<u32>| {
            store
                .remote()
                .get_all_records_from_index(store_name, index_name, range, count)
        };
        let first = remote
            .as_ref()
            .map(|(store_name, index_name)| fetch(store_name, index_name, range, count));

        let cached: Vec<CursorRecord> = {
            let entries = self.records.borrow();
            let records = store.records.borrow();
            entries
                .values(range, ScanDirection::Asc)
                .take(limit.unwrap_or(usize::MAX))
                .map(|entry| CursorRecord {
                    key: entry.key.clone(),
                    primary_key: entry.value.clone(),
                    value: if just_keys {
                        None
                    } else {
                        records
                            .get(&KeyRange::only(entry.value.clone()))
                            .map(|r| r.value.clone())
                    },
                })
                .collect()
        };

        let (Some(first), Some((store_name, index_name))) = (first, remote) else {
            return Ok(cached);
        };

        let fetched = fetch_unmasked(
            first,
            count,
            |r| store.records.borrow().modified(&r.primary_key),
            |last, n| {
                let from = range.clone().with_lower(last.key.clone(), false);
                fetch(&store_name, &index_name, &from, Some(n))
            },
        )
        .await?;

        sink::record(MetricsEvent::MergeRead {
            local: cached.len() as u64,
            remote: fetched.records.len() as u64,
            masked: fetched.masked,
        });
        trace!(
            index = %self.name(),
            local = cached.len(),
            remote = fetched.records.len(),
            masked = fetched.masked,
            "merged index read"
        );

        let mut merged = merge_sorted(cached, fetched.records, limit, |a, b| {
            a.key.cmp(&b.key).then_with(|| a.primary_key.cmp(&b.primary_key))
        });
        if just_keys {
            for record in &mut merged {
                record.value = None;
            }
        }

        Ok(merged)
    }
}

///
/// TESTS
///
