//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use ctxop_core::{Change, ChangeSet, ObjectId, Record};
use parking_lot::Mutex;
use tracing::debug;

use crate::trait_::{ensure_permanent, Result, Store, StoreError};

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, BTreeMap<ObjectId, Record>>,
    next_keys: HashMap<String, u64>,
}

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_next_apply: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail without changing anything.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Number of stored records of an entity.
    pub fn count(&self, entity: &str) -> usize {
        self.inner
            .lock()
            .records
            .get(entity)
            .map_or(0, |records| records.len())
    }
}

impl Store for InMemoryStore {
    fn allocate_keys(&self, entity: &str, count: usize) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock();
        let next = inner.next_keys.entry(entity.to_string()).or_insert(1);
        let keys = (*next..*next + count as u64).collect();
        *next += count as u64;
        Ok(keys)
    }

    fn load(&self, entity: &str) -> Result<Vec<Record>> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .get(entity)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn apply(&self, changes: &ChangeSet) -> Result<()> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Other("store rejected the change set".to_string()));
        }
        ensure_permanent(changes)?;

        let mut inner = self.inner.lock();
        for (id, change) in changes.iter() {
            let records = inner.records.entry(change.entity().to_string()).or_default();
            match change {
                Change::Insert(r) | Change::Update(r) => {
                    records.insert(id.clone(), r.clone());
                }
                Change::Delete { .. } => {
                    records.remove(id);
                }
            }
        }
        debug!("Applied {} changes to in-memory store", changes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_keys_is_per_entity() {
        let store = InMemoryStore::new();
        assert_eq!(store.allocate_keys("Employee", 2).unwrap(), vec![1, 2]);
        assert_eq!(store.allocate_keys("Employee", 1).unwrap(), vec![3]);
        assert_eq!(store.allocate_keys("Department", 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_apply_and_load() {
        let store = InMemoryStore::new();
        let mut record = Record::new("Employee").with("name", "Harold");
        record.id = ObjectId::permanent("Employee", 1);

        let mut changes = ChangeSet::new();
        changes.insert(record.clone());
        store.apply(&changes).unwrap();
        assert_eq!(store.load("Employee").unwrap(), vec![record.clone()]);

        let mut changes = ChangeSet::new();
        changes.delete(record.id.clone(), "Employee");
        store.apply(&changes).unwrap();
        assert_eq!(store.count("Employee"), 0);
    }

    #[test]
    fn test_apply_rejects_temporary_ids() {
        let store = InMemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.insert(Record::new("Employee"));
        assert!(matches!(store.apply(&changes), Err(StoreError::TemporaryId(_))));
    }

    #[test]
    fn test_fail_next_apply_is_one_shot() {
        let store = InMemoryStore::new();
        store.fail_next_apply();
        assert!(store.apply(&ChangeSet::new()).is_err());
        assert!(store.apply(&ChangeSet::new()).is_ok());
    }
}
