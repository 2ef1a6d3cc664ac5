use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{CalendarDay, Record};

/// The records for which metadata has been resolved, keyed by day.
///
/// There is at most one record per day, and entries are never removed. Payloads that arrive later
/// are stored on the record itself, so the `Arc<Record>` handed out here stays the single source
/// of truth for its day.
#[derive(Debug, Default)]
pub struct CacheStore {
    records: RwLock<BTreeMap<CalendarDay, Arc<Record>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: CalendarDay) -> Option<Arc<Record>> {
        self.records.read().get(&date).cloned()
    }

    /// Stores `record` unless a record for its day already exists.
    ///
    /// Returns the record that is stored afterwards. When another writer got there first, its
    /// record is kept, as payloads may already have been merged into it, and `record` is dropped.
    pub fn insert_if_absent(&self, record: Arc<Record>) -> Arc<Record> {
        let mut records = self.records.write();
        let stored = records.entry(record.date()).or_insert_with(|| record.clone());
        if !Arc::ptr_eq(stored, &record) {
            tracing::debug!(date = %record.date(), "Keeping previously stored record");
        }
        Arc::clone(stored)
    }

    pub fn contains(&self, date: CalendarDay) -> bool {
        self.records.read().contains_key(&date)
    }

    /// All days with a stored record, in ascending order.
    pub fn dates(&self) -> Vec<CalendarDay> {
        self.records.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
