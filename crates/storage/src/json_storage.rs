//! JSON file store implementation.
//!
//! Stores each record as a JSON file under `records/<entity>/` and keeps a
//! small per-entity meta marker (next key + version + updated_at) under
//! `meta/`. Snapshotting the directory is left to whoever owns it.

use std::path::{Path, PathBuf};

use ctxop_core::{Change, ChangeSet, ObjectId, Record};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::trait_::{ensure_permanent, Result, Store, StoreError};

/// Per-entity meta marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityMeta {
    next_key: u64,
    version: u64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self {
            next_key: 1,
            version: 0,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// File-based JSON store.
pub struct JsonStore {
    root: PathBuf,
    // Serializes key allocation and writes across threads.
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open a store rooted at `root`, creating the directory layout if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("meta"))?;
        info!("Opened JSON store at {}", root.display());

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entity_dir(&self, entity: &str) -> PathBuf {
        self.root.join("records").join(entity)
    }

    fn record_path(&self, entity: &str, key: u64) -> PathBuf {
        self.entity_dir(entity).join(format!("{}.json", key))
    }

    fn meta_path(&self, entity: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.meta.json", entity))
    }

    fn read_meta(&self, entity: &str) -> Result<EntityMeta> {
        Ok(read_json(&self.meta_path(entity))?.unwrap_or_default())
    }

    fn write_meta(&self, entity: &str, meta: &EntityMeta) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        std::fs::write(self.meta_path(entity), json.as_bytes())?;
        Ok(())
    }

    /// Read and increment the per-entity version, return the new version.
    fn bump_version(&self, entity: &str) -> Result<u64> {
        let mut meta = self.read_meta(entity)?;
        meta.version += 1;
        meta.updated_at = chrono::Utc::now();
        self.write_meta(entity, &meta)?;
        Ok(meta.version)
    }
}

fn store_key(id: &ObjectId) -> Result<u64> {
    match id {
        ObjectId::Permanent { key, .. } => Ok(*key),
        ObjectId::Temporary { .. } => Err(StoreError::TemporaryId(id.to_string())),
    }
}

impl Store for JsonStore {
    fn allocate_keys(&self, entity: &str, count: usize) -> Result<Vec<u64>> {
        check_entity_name(entity)?;
        let _guard = self.write_lock.lock();
        let mut meta = self.read_meta(entity)?;
        let keys = (meta.next_key..meta.next_key + count as u64).collect();
        meta.next_key += count as u64;
        self.write_meta(entity, &meta)?;
        Ok(keys)
    }

    fn load(&self, entity: &str) -> Result<Vec<Record>> {
        check_entity_name(entity)?;
        list_dir(&self.entity_dir(entity))
    }

    fn apply(&self, changes: &ChangeSet) -> Result<()> {
        ensure_permanent(changes)?;
        for (_, change) in changes.iter() {
            check_entity_name(change.entity())?;
        }
        let _guard = self.write_lock.lock();

        let mut touched = std::collections::BTreeSet::new();
        for (id, change) in changes.iter() {
            let entity = change.entity();
            let path = self.record_path(entity, store_key(id)?);
            match change {
                Change::Insert(record) | Change::Update(record) => {
                    std::fs::create_dir_all(self.entity_dir(entity))?;
                    let json = serde_json::to_string_pretty(record)?;
                    std::fs::write(&path, json.as_bytes())?;
                }
                Change::Delete { .. } => {
                    std::fs::remove_file(&path).or_else(|e| {
                        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
                    })?;
                }
            }
            touched.insert(entity.to_string());
        }

        for entity in touched {
            let version = self.bump_version(&entity)?;
            debug!("Entity {} now at version {}", entity, version);
        }
        Ok(())
    }
}

/// Entity names become single path components under the store root.
fn check_entity_name(entity: &str) -> Result<()> {
    let valid = !entity.is_empty()
        && !entity.starts_with('.')
        && !entity.contains(['/', '\\', '\0'])
        && !entity.contains("..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidEntity(entity.to_string()))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    for entry in rd {
        let entry = entry?;
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path())? {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permanent_record(store: &JsonStore, name: &str) -> Record {
        let key = store.allocate_keys("Employee", 1).unwrap()[0];
        let mut record = Record::new("Employee").with("name", name);
        record.id = ObjectId::permanent("Employee", key);
        record
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = {
            let store = JsonStore::open(dir.path()).unwrap();
            let record = permanent_record(&store, "Harold");
            let mut changes = ChangeSet::new();
            changes.insert(record.clone());
            store.apply(&changes).unwrap();
            record
        };

        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.load("Employee").unwrap(), vec![record]);
        // Keys keep counting after reopen.
        assert_eq!(store.allocate_keys("Employee", 1).unwrap(), vec![2]);
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let record = permanent_record(&store, "Kumar");

        let mut changes = ChangeSet::new();
        changes.insert(record.clone());
        store.apply(&changes).unwrap();

        let mut changes = ChangeSet::new();
        changes.delete(record.id.clone(), "Employee");
        store.apply(&changes).unwrap();
        assert!(store.load("Employee").unwrap().is_empty());
        assert_eq!(store.read_meta("Employee").unwrap().version, 2);
    }

    #[test]
    fn test_load_unknown_entity_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        assert!(store.load("Department").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_entity_names_outside_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = JsonStore::open(&root).unwrap();

        assert!(matches!(store.load("../x"), Err(StoreError::InvalidEntity(_))));
        assert!(matches!(store.allocate_keys("a/b", 1), Err(StoreError::InvalidEntity(_))));
        assert!(matches!(store.allocate_keys("", 1), Err(StoreError::InvalidEntity(_))));

        let mut record = Record::new("../x").with("name", "Harold");
        record.id = ObjectId::permanent("../x", 1);
        let mut changes = ChangeSet::new();
        changes.insert(record);
        assert!(matches!(store.apply(&changes), Err(StoreError::InvalidEntity(_))));

        // Nothing escaped the store directory.
        let mut siblings: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        siblings.sort();
        assert_eq!(siblings, vec![std::ffi::OsString::from("store")]);
        assert!(!root.join("x").exists());
    }
}
