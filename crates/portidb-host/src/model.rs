//! Module: model
//! Responsibility: the host's durable state: databases, object stores and
//! their records, with index entries derived on demand.
//! Does not own: the protocol surface (see `host`).
//! Boundary: every mutation either succeeds completely or leaves the
//! value it was called on unchanged; callers stage changes on a clone.

use crate::error::HostError;
use portidb_core::{
    config::MAX_SAFE_INTEGER,
    db::CursorDirection,
    error::DomError,
    key::{Key, KeyPath, KeyRange, value_to_key},
    proto::{
        CursorRecord, IndexDescriptor, IndexParameters, StoreDescriptor, StoreParameters,
        StoreUpgradeAction, StoreUpgradeEntry, UpgradeAction, Write,
    },
    value::Value,
};
use std::collections::BTreeMap;

///
/// HostDb
///

#[derive(Clone, Debug, Default)]
pub(crate) struct HostDb {
    pub version: u64,
    pub stores: BTreeMap<String, HostStore>,
}

impl HostDb {
    pub(crate) fn store(&self, name: &str) -> Result<&HostStore, HostError> {
        self.stores
            .get(name)
            .ok_or_else(|| HostError::StoreNotFound(name.to_string()))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> Result<&mut HostStore, HostError> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| HostError::StoreNotFound(name.to_string()))
    }

    pub(crate) fn descriptors(&self) -> Vec<StoreDescriptor> {
        self.stores
            .iter()
            .map(|(name, store)| store.descriptor(name))
            .collect()
    }

    /// Replay the schema changes (and nested writes) of one upgrade.
    pub(crate) fn apply_upgrade(&mut self, action: UpgradeAction) -> Result<(), HostError> {
        match action {
            UpgradeAction::CreateObjectStore {
                name,
                options,
                do_on_upgrade,
            } => {
                if self.stores.contains_key(&name) {
                    return Err(HostError::StoreExists(name));
                }
                options.key_path.as_ref().map(KeyPath::validate).transpose()?;
                self.stores.insert(name.clone(), HostStore::new(options));
                self.apply_entries(name, do_on_upgrade)
            }
            UpgradeAction::DeleteObjectStore { name } => {
                self.stores
                    .remove(&name)
                    .map(|_| ())
                    .ok_or(HostError::StoreNotFound(name))
            }
            UpgradeAction::ModifyObjectStore {
                name,
                do_on_upgrade,
            } => {
                self.store(&name)?;
                self.apply_entries(name, do_on_upgrade)
            }
        }
    }

    fn apply_entries(
        &mut self,
        mut name: String,
        entries: Vec<StoreUpgradeEntry>,
    ) -> Result<(), HostError> {
        for entry in entries {
            match entry {
                StoreUpgradeEntry::Schema(StoreUpgradeAction::RenameObjectStore { new_name }) => {
                    if self.stores.contains_key(&new_name) {
                        return Err(HostError::StoreExists(new_name));
                    }
                    let store = self
                        .stores
                        .remove(&name)
                        .ok_or_else(|| HostError::StoreNotFound(name.clone()))?;
                    self.stores.insert(new_name.clone(), store);
                    name = new_name;
                }
                StoreUpgradeEntry::Schema(action) => self.store_mut(&name)?.apply_schema(action)?,
                StoreUpgradeEntry::Write(write) => self.store_mut(&name)?.apply_write(write)?,
            }
        }

        Ok(())
    }
}

///
/// HostIndex
///

#[derive(Clone, Debug)]
pub(crate) struct HostIndex {
    pub key_path: KeyPath,
    pub parameters: IndexParameters,
}

impl HostIndex {
    /// Index keys a store value produces. Unresolvable or invalid values
    /// produce none.
    fn keys_for(&self, value: &Value) -> Vec<Key> {
        let Some(extracted) = self.key_path.extract_value(value) else {
            return Vec::new();
        };

        match (extracted, self.parameters.multi_entry) {
            (Value::Array(items), true) => {
                let mut keys: Vec<Key> = items.iter().filter_map(|v| value_to_key(v).ok()).collect();
                keys.sort();
                keys.dedup();
                keys
            }
            (extracted, _) => value_to_key(&extracted).into_iter().collect(),
        }
    }
}

///
/// HostStore
///

#[derive(Clone, Debug)]
pub(crate) struct HostStore {
    pub parameters: StoreParameters,
    pub indexes: BTreeMap<String, HostIndex>,
    records: BTreeMap<Key, Value>,
    generator: u64,
}

impl HostStore {
    pub(crate) const fn new(parameters: StoreParameters) -> Self {
        Self {
            parameters,
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
            generator: 0,
        }
    }

    pub(crate) fn descriptor(&self, name: &str) -> StoreDescriptor {
        StoreDescriptor {
            name: name.to_string(),
            parameters: self.parameters.clone(),
            indexes: self
                .indexes
                .iter()
                .map(|(name, index)| IndexDescriptor {
                    name: name.clone(),
                    key_path: index.key_path.clone(),
                    parameters: index.parameters,
                })
                .collect(),
        }
    }

    fn index(&self, name: &str) -> Result<&HostIndex, HostError> {
        self.indexes
            .get(name)
            .ok_or_else(|| HostError::IndexNotFound(name.to_string()))
    }

    ///
    /// READS
    ///

    /// Records inside `range`, ascending, as `(key, primary key, value)`.
    pub(crate) fn records(&self, range: &KeyRange, count: Option<u32>) -> Vec<CursorRecord> {
        self.records
            .iter()
            .filter(|(key, _)| range.includes(key))
            .take(limit(count))
            .map(|(key, value)| CursorRecord {
                key: key.clone(),
                primary_key: key.clone(),
                value: Some(value.clone()),
            })
            .collect()
    }

    /// Entries of index `name` inside `range`, ordered by (index key,
    /// primary key).
    pub(crate) fn index_records(
        &self,
        name: &str,
        range: &KeyRange,
        count: Option<u32>,
    ) -> Result<Vec<CursorRecord>, HostError> {
        let mut entries = self.index_entries(self.index(name)?);
        entries.retain(|record| range.includes(&record.key));
        entries.truncate(limit(count));

        Ok(entries)
    }

    fn index_entries(&self, index: &HostIndex) -> Vec<CursorRecord> {
        let mut entries: Vec<CursorRecord> = self
            .records
            .iter()
            .flat_map(|(pk, value)| {
                index.keys_for(value).into_iter().map(|key| CursorRecord {
                    key,
                    primary_key: pk.clone(),
                    value: Some(value.clone()),
                })
            })
            .collect();
        entries.sort_by(|a, b| (&a.key, &a.primary_key).cmp(&(&b.key, &b.primary_key)));

        entries
    }

    /// The record a cursor reaches next. Primary-key filters apply only to
    /// entries at the range's starting bound (the lower bound moving
    /// forward, the upper one moving back).
    pub(crate) fn next_from_cursor(&self, step: &CursorStep) -> Result<Option<CursorRecord>, HostError> {
        let mut entries = match &step.index_name {
            Some(name) => self.index_entries(self.index(name)?),
            None => self.records(&KeyRange::unbounded(), None),
        };
        entries.retain(|record| step.range.includes(&record.key) && step.admits(record));

        let forward = step.direction.is_next();
        if !forward {
            entries.reverse();
        }

        let found = entries.first().map(|first| {
            if step.direction.is_unique() {
                // Unique directions report the lowest primary key of a key.
                entries
                    .iter()
                    .filter(|record| record.key == first.key)
                    .min_by(|a, b| a.primary_key.cmp(&b.primary_key))
                    .unwrap_or(first)
            } else {
                first
            }
        });

        Ok(found.cloned().map(|mut record| {
            if step.just_keys {
                record.value = None;
            }
            record
        }))
    }

    ///
    /// WRITES
    ///

    pub(crate) fn apply_write(&mut self, write: Write) -> Result<(), HostError> {
        match write {
            Write::Add { value, key } => self.store_record(value, key, true),
            Write::Put { value, key } => self.store_record(value, key, false),
            Write::Delete { query } => {
                let range = KeyRange::from(query);
                self.records.retain(|key, _| !range.includes(key));
                Ok(())
            }
            Write::Clear => {
                self.records.clear();
                Ok(())
            }
            Write::Replace { key, index, value } => {
                if !index.is_empty() {
                    self.index(&index)?;
                }
                self.check_unique(&key, &value)?;
                self.records.insert(key, value);
                Ok(())
            }
        }
    }

    fn store_record(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<(), HostError> {
        let in_line = match &self.parameters.key_path {
            Some(path) => path.extract_key(&value)?,
            None => None,
        };

        let key = match (in_line.or(key), self.parameters.key_path.clone()) {
            (Some(key), _) => key,
            (None, path) if self.parameters.auto_increment => {
                let key = self.next_key()?;
                if let Some(path) = path {
                    path.inject(&mut value, &key)?;
                }
                key
            }
            (None, _) => {
                return Err(HostError::Dom(DomError::data(
                    "no key for a store without a key path or generator",
                )));
            }
        };
        key.validate()?;

        if no_overwrite && self.records.contains_key(&key) {
            return Err(HostError::DuplicateKey(key));
        }
        self.check_unique(&key, &value)?;
        if self.parameters.auto_increment {
            self.bump_generator(&key);
        }
        self.records.insert(key, value);

        Ok(())
    }

    fn next_key(&mut self) -> Result<Key, HostError> {
        if self.generator >= MAX_SAFE_INTEGER.unsigned_abs() + 1 {
            return Err(HostError::GeneratorExhausted);
        }
        self.generator += 1;

        #[allow(clippy::cast_precision_loss)]
        Ok(Key::Number(self.generator as f64))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn bump_generator(&mut self, key: &Key) {
        if let Some(n) = key.as_number()
            && n >= 1.0
        {
            let n = n.min(Key::MAX_GENERATED).floor() as u64;
            self.generator = self.generator.max(n);
        }
    }

    /// Fail if storing `value` under `pk` would repeat a key in a unique
    /// index. Entries of the record being replaced do not count.
    fn check_unique(&self, pk: &Key, value: &Value) -> Result<(), HostError> {
        for (name, index) in self.indexes.iter().filter(|(_, i)| i.parameters.unique) {
            for key in index.keys_for(value) {
                let clash = self
                    .records
                    .iter()
                    .filter(|(other, _)| *other != pk)
                    .any(|(_, other)| index.keys_for(other).contains(&key));
                if clash {
                    return Err(HostError::UniqueViolation {
                        index: name.clone(),
                        key,
                    });
                }
            }
        }

        Ok(())
    }

    ///
    /// SCHEMA
    ///

    fn apply_schema(&mut self, action: StoreUpgradeAction) -> Result<(), HostError> {
        match action {
            StoreUpgradeAction::CreateIndex {
                name,
                key_path,
                options,
            } => {
                if self.indexes.contains_key(&name) {
                    return Err(HostError::IndexExists(name));
                }
                key_path.validate()?;
                let index = HostIndex {
                    key_path,
                    parameters: options,
                };
                if options.unique {
                    let entries = self.index_entries(&index);
                    if let Some(pair) = entries.windows(2).find(|w| w[0].key == w[1].key) {
                        return Err(HostError::UniqueViolation {
                            index: name,
                            key: pair[0].key.clone(),
                        });
                    }
                }
                self.indexes.insert(name, index);
            }
            StoreUpgradeAction::DeleteIndex { name } => {
                self.indexes
                    .remove(&name)
                    .ok_or(HostError::IndexNotFound(name))?;
            }
            StoreUpgradeAction::ModifyIndex { name, new_name } => {
                if self.indexes.contains_key(&new_name) {
                    return Err(HostError::IndexExists(new_name));
                }
                let index = self
                    .indexes
                    .remove(&name)
                    .ok_or(HostError::IndexNotFound(name))?;
                self.indexes.insert(new_name, index);
            }
            StoreUpgradeAction::RenameObjectStore { .. } => {}
        }

        Ok(())
    }
}

///
/// CursorStep
///
/// Arguments of one `getNextFromCursor` call, decoded.
///

#[derive(Clone, Debug)]
pub(crate) struct CursorStep {
    pub range: KeyRange,
    pub direction: CursorDirection,
    pub index_name: Option<String>,
    pub prev_primary_key: Option<Key>,
    pub curr_primary_key: Option<Key>,
    pub just_keys: bool,
}

impl CursorStep {
    fn admits(&self, record: &CursorRecord) -> bool {
        let forward = self.direction.is_next();
        let bound = if forward {
            self.range.lower.as_ref()
        } else {
            self.range.upper.as_ref()
        };
        if bound != Some(&record.key) {
            return true;
        }

        let pk = &record.primary_key;
        let past_prev = self
            .prev_primary_key
            .as_ref()
            .is_none_or(|prev| if forward { pk > prev } else { pk < prev });
        let from_curr = self
            .curr_primary_key
            .as_ref()
            .is_none_or(|curr| if forward { pk >= curr } else { pk <= curr });

        past_prev && from_curr
    }
}

fn limit(count: Option<u32>) -> usize {
    count
        .filter(|n| *n > 0)
        .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX))
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> HostStore {
        let mut store = HostStore::new(StoreParameters {
            key_path: Some("id".into()),
            auto_increment: true,
        });
        store
            .apply_schema(StoreUpgradeAction::CreateIndex {
                name: "by_city".into(),
                key_path: "city".into(),
                options: IndexParameters::default(),
            })
            .unwrap();
        for city in ["oslo", "bergen", "oslo", "bergen", "oslo"] {
            store
                .apply_write(Write::Add {
                    value: Value::object([("city", Value::from(city))]),
                    key: None,
                })
                .unwrap();
        }

        store
    }

    fn step(range: KeyRange, direction: CursorDirection) -> CursorStep {
        CursorStep {
            range,
            direction,
            index_name: Some("by_city".into()),
            prev_primary_key: None,
            curr_primary_key: None,
            just_keys: false,
        }
    }

    fn pk(record: Option<CursorRecord>) -> Option<Key> {
        record.map(|r| r.primary_key)
    }

    #[test]
    fn generated_keys_are_injected_and_sequential() {
        let store = people();
        let records = store.records(&KeyRange::unbounded(), None);

        assert_eq!(records.len(), 5);
        assert_eq!(records[2].key, Key::from(3));
        assert_eq!(records[2].value.as_ref().and_then(|v| v.get("id")), Some(&Value::from(3)));
    }

    #[test]
    fn explicit_numeric_keys_bump_the_generator() {
        let mut store = people();
        store
            .apply_write(Write::Put {
                value: Value::object([("id", Value::from(10)), ("city", Value::from("rome"))]),
                key: None,
            })
            .unwrap();
        store
            .apply_write(Write::Add {
                value: Value::object([("city", Value::from("rome"))]),
                key: None,
            })
            .unwrap();

        let keys: Vec<Key> = store
            .records(&KeyRange::lower_bound(Key::from(10), false), None)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec![Key::from(10), Key::from(11)]);
    }

    #[test]
    fn add_rejects_an_existing_key() {
        let mut store = people();
        let err = store
            .apply_write(Write::Add {
                value: Value::object([("id", Value::from(2)), ("city", Value::from("rome"))]),
                key: None,
            })
            .unwrap_err();

        assert!(matches!(err, HostError::DuplicateKey(_)));
    }

    #[test]
    fn index_records_are_ordered_by_key_then_primary_key() {
        let store = people();
        let pks: Vec<Key> = store
            .index_records("by_city", &KeyRange::unbounded(), None)
            .unwrap()
            .into_iter()
            .map(|r| r.primary_key)
            .collect();

        assert_eq!(pks, vec![2.into(), 4.into(), 1.into(), 3.into(), 5.into()]);
    }

    #[test]
    fn cursor_prev_primary_key_skips_at_the_bound_only() {
        let store = people();
        let mut query = step(
            KeyRange::lower_bound("oslo".into(), false),
            CursorDirection::Next,
        );
        query.prev_primary_key = Some(3.into());

        assert_eq!(pk(store.next_from_cursor(&query).unwrap()), Some(5.into()));

        query.range = KeyRange::lower_bound("bergen".into(), false);
        query.prev_primary_key = Some(4.into());
        assert_eq!(pk(store.next_from_cursor(&query).unwrap()), Some(1.into()));
    }

    #[test]
    fn cursor_curr_primary_key_includes_the_named_record() {
        let store = people();
        let mut query = step(
            KeyRange::lower_bound("oslo".into(), false),
            CursorDirection::Next,
        );
        query.curr_primary_key = Some(3.into());

        assert_eq!(pk(store.next_from_cursor(&query).unwrap()), Some(3.into()));
    }

    #[test]
    fn cursor_prev_walks_down_from_the_upper_bound() {
        let store = people();
        let mut query = step(
            KeyRange::upper_bound("oslo".into(), false),
            CursorDirection::Prev,
        );
        assert_eq!(pk(store.next_from_cursor(&query).unwrap()), Some(5.into()));

        query.prev_primary_key = Some(5.into());
        assert_eq!(pk(store.next_from_cursor(&query).unwrap()), Some(3.into()));
    }

    #[test]
    fn unique_directions_report_the_lowest_primary_key() {
        let store = people();
        let query = step(KeyRange::unbounded(), CursorDirection::PrevUnique);
        let found = store.next_from_cursor(&query).unwrap().unwrap();

        assert_eq!(found.key, Key::from("oslo"));
        assert_eq!(found.primary_key, Key::from(1));
    }

    #[test]
    fn just_keys_omits_values() {
        let store = people();
        let mut query = step(KeyRange::unbounded(), CursorDirection::Next);
        query.index_name = None;
        query.just_keys = true;
        let found = store.next_from_cursor(&query).unwrap().unwrap();

        assert_eq!(found.key, Key::from(1));
        assert_eq!(found.value, None);
    }

    #[test]
    fn unique_index_creation_fails_on_duplicates() {
        let mut store = people();
        let err = store
            .apply_schema(StoreUpgradeAction::CreateIndex {
                name: "city_unique".into(),
                key_path: "city".into(),
                options: IndexParameters {
                    unique: true,
                    multi_entry: false,
                },
            })
            .unwrap_err();

        assert!(matches!(err, HostError::UniqueViolation { .. }));
        assert!(!store.indexes.contains_key("city_unique"));
    }

    #[test]
    fn rename_moves_later_entries_to_the_new_name() {
        let mut db = HostDb::default();
        db.apply_upgrade(UpgradeAction::CreateObjectStore {
            name: "a".into(),
            options: StoreParameters::default(),
            do_on_upgrade: vec![
                StoreUpgradeEntry::Schema(StoreUpgradeAction::RenameObjectStore {
                    new_name: "b".into(),
                }),
                StoreUpgradeEntry::Write(Write::Put {
                    value: Value::from("x"),
                    key: Some(1.into()),
                }),
            ],
        })
        .unwrap();

        assert!(db.store("a").is_err());
        assert_eq!(db.store("b").unwrap().records(&KeyRange::unbounded(), None).len(), 1);
    }
}
