//! Module: db::record
//! Responsibility: the sorted in-memory record list behind every object
//! store and index, plus the modification set that masks remote reads.
//! Does not own: remote access or index maintenance.
//! Boundary: records stay sorted by key, then by value order.

use crate::{
    db::ScanDirection,
    key::{Key, KeyRange},
    value::Value,
};
use std::{cmp::Ordering, collections::BTreeSet};

///
/// RecordValue
///
/// Secondary order among records that share a key. Store values never
/// share a key; index values are primary keys and sort by key order.
///

pub(crate) trait RecordValue: Clone {
    fn order(&self, other: &Self) -> Ordering;
}

impl RecordValue for Value {
    fn order(&self, _: &Self) -> Ordering {
        Ordering::Equal
    }
}

impl RecordValue for Key {
    fn order(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

///
/// Record
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Record<V> {
    pub key: Key,
    pub value: V,
}

impl<V> Record<V> {
    pub(crate) const fn new(key: Key, value: V) -> Self {
        Self { key, value }
    }
}

///
/// ModificationSet
///
/// Keys and ranges touched locally since the last transaction boundary.
///

#[derive(Debug, Default)]
struct ModificationSet {
    keys: BTreeSet<Key>,
    ranges: Vec<KeyRange>,
}

impl ModificationSet {
    fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key) || self.ranges.iter().any(|range| range.includes(key))
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.ranges.clear();
    }
}

///
/// RecordStore
///

#[derive(Debug)]
pub(crate) struct RecordStore<V> {
    records: Vec<Record<V>>,
    modified: ModificationSet,
}

impl<V> Default for RecordStore<V> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            modified: ModificationSet::default(),
        }
    }
}

impl<V: RecordValue> RecordStore<V> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// First record (ascending) inside `range`.
    pub(crate) fn get(&self, range: &KeyRange) -> Option<&Record<V>> {
        self.slice(range).first()
    }

    /// Insert keeping key order; equal keys are ordered by value.
    pub(crate) fn add(&mut self, key: Key, value: V) {
        let at = self.records.partition_point(|r| match r.key.cmp(&key) {
            Ordering::Less => true,
            Ordering::Equal => r.value.order(&value) != Ordering::Greater,
            Ordering::Greater => false,
        });

        self.modified.keys.insert(key.clone());
        self.records.insert(at, Record::new(key, value));
    }

    /// Remove every record inside `range`; the whole range stays masked.
    pub(crate) fn delete(&mut self, range: &KeyRange) -> Vec<Record<V>> {
        let (lo, hi) = self.bounds(range);
        self.modified.ranges.push(range.clone());

        self.records.drain(lo..hi).collect()
    }

    /// Remove every record and mask every key.
    pub(crate) fn clear(&mut self) -> Vec<Record<V>> {
        self.delete(&KeyRange::unbounded())
    }

    /// Records inside `range` in the given order. Each call starts afresh.
    pub(crate) fn values(&self, range: &KeyRange, direction: ScanDirection) -> Scan<'_, V> {
        Scan {
            inner: self.slice(range).iter(),
            direction,
        }
    }

    /// True if `key` was added or removed locally since the last boundary.
    pub(crate) fn modified(&self, key: &Key) -> bool {
        self.modified.contains(key)
    }

    pub(crate) fn cleanup_after_completed_transaction(&mut self) {
        self.modified.clear();
    }

    fn slice(&self, range: &KeyRange) -> &[Record<V>] {
        let (lo, hi) = self.bounds(range);
        &self.records[lo..hi]
    }

    fn bounds(&self, range: &KeyRange) -> (usize, usize) {
        let lo = self.records.partition_point(|r| range.is_below(&r.key));
        let hi = self.records.partition_point(|r| !range.is_above(&r.key));

        (lo, hi.max(lo))
    }
}

impl RecordStore<Key> {
    /// Remove every entry pointing at `primary_key`.
    pub(crate) fn delete_by_value(&mut self, primary_key: &Key) -> Vec<Record<Key>> {
        let mut removed = Vec::new();
        self.records.retain(|r| {
            if r.value == *primary_key {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });

        for record in &removed {
            self.modified.keys.insert(record.key.clone());
        }

        removed
    }
}

///
/// Scan
///

pub(crate) struct Scan<'a, V> {
    inner: std::slice::Iter<'a, Record<V>>,
    direction: ScanDirection,
}

impl<'a, V> Iterator for Scan<'a, V> {
    type Item = &'a Record<V>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.direction {
            ScanDirection::Asc => self.inner.next(),
            ScanDirection::Desc => self.inner.next_back(),
        }
    }
}

///
/// TESTS
///
