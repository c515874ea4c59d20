//! Records and pending changes.

use crate::id::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute map of a record.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A single object of some entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity
    pub id: ObjectId,

    /// Entity name
    pub entity: String,

    /// Attribute values
    #[serde(default)]
    pub attributes: Attributes,
}

impl Record {
    /// Create an empty record with a temporary id.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            id: ObjectId::temporary(),
            entity: entity.into(),
            attributes: Attributes::new(),
        }
    }

    /// Set an attribute.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(attribute, value);
        self
    }

    /// Set an attribute in place.
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.attributes.insert(attribute.into(), value.into());
    }

    /// Read an attribute. Explicit nulls read as absent.
    pub fn get(&self, attribute: &str) -> Option<&serde_json::Value> {
        self.attributes.get(attribute).filter(|v| !v.is_null())
    }

    /// Read a string attribute.
    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(|v| v.as_str())
    }
}

/// A pending change to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Object is new at this level
    Insert(Record),
    /// Object exists further up and was modified
    Update(Record),
    /// Object was removed
    Delete {
        /// Entity of the removed object
        entity: String,
    },
}

impl Change {
    /// Entity the change applies to.
    pub fn entity(&self) -> &str {
        match self {
            Change::Insert(r) | Change::Update(r) => &r.entity,
            Change::Delete { entity } => entity,
        }
    }

    /// The record carried by inserts and updates.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Change::Insert(r) | Change::Update(r) => Some(r),
            Change::Delete { .. } => None,
        }
    }
}

/// Pending changes of a context, keyed by object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: BTreeMap<ObjectId, Change>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed objects.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Look up the change for an object.
    pub fn get(&self, id: &ObjectId) -> Option<&Change> {
        self.changes.get(id)
    }

    /// Iterate over changes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &Change)> {
        self.changes.iter()
    }

    /// Records inserted at this level.
    pub fn inserted(&self) -> impl Iterator<Item = &Record> {
        self.changes.values().filter_map(|c| match c {
            Change::Insert(r) => Some(r),
            _ => None,
        })
    }

    /// Records inserted or updated at this level.
    pub fn upserted(&self) -> impl Iterator<Item = &Record> {
        self.changes.values().filter_map(Change::record)
    }

    /// Record an insert.
    pub fn insert(&mut self, record: Record) {
        self.changes.insert(record.id.clone(), Change::Insert(record));
    }

    /// Record a modification of an object, keeping it an insert if it is new here.
    pub fn update(&mut self, record: Record) {
        let id = record.id.clone();
        let change = match self.changes.get(&id) {
            Some(Change::Insert(_)) => Change::Insert(record),
            _ => Change::Update(record),
        };
        self.changes.insert(id, change);
    }

    /// Record a deletion. Deleting an object inserted at this level drops it.
    pub fn delete(&mut self, id: ObjectId, entity: impl Into<String>) {
        match self.changes.get(&id) {
            Some(Change::Insert(_)) => {
                self.changes.remove(&id);
            }
            _ => {
                self.changes.insert(id, Change::Delete { entity: entity.into() });
            }
        }
    }

    /// Fold a child's changes into this set, as a child save does.
    pub fn absorb(&mut self, child: ChangeSet) {
        for (id, change) in child.changes {
            match change {
                Change::Insert(record) => self.insert(record),
                Change::Update(record) => self.update(record),
                Change::Delete { entity } => self.delete(id, entity),
            }
        }
    }

    /// Replace the id of an object, in both the key and the record.
    pub fn remap(&mut self, from: &ObjectId, to: ObjectId) -> bool {
        let Some(mut change) = self.changes.remove(from) else {
            return false;
        };
        if let Change::Insert(r) | Change::Update(r) = &mut change {
            r.id = to.clone();
        }
        self.changes.insert(to, change);
        true
    }

    /// Overlay these changes on a view of one entity.
    pub fn apply_to(&self, entity: &str, view: &mut BTreeMap<ObjectId, Record>) {
        for (id, change) in &self.changes {
            if change.entity() != entity {
                continue;
            }
            match change {
                Change::Insert(r) | Change::Update(r) => {
                    view.insert(id.clone(), r.clone());
                }
                Change::Delete { .. } => {
                    view.remove(id);
                }
            }
        }
    }

    /// Take all changes, leaving this set empty.
    pub fn take(&mut self) -> ChangeSet {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_of_insert_stays_insert() {
        let mut set = ChangeSet::new();
        let record = Record::new("Employee").with("name", "Harold");
        set.insert(record.clone());
        set.update(record.clone().with("name", "Kumar"));

        match set.get(&record.id) {
            Some(Change::Insert(r)) => assert_eq!(r.get_str("name"), Some("Kumar")),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn test_delete_of_insert_drops_change() {
        let mut set = ChangeSet::new();
        let record = Record::new("Employee");
        set.insert(record.clone());
        set.delete(record.id.clone(), "Employee");
        assert!(set.is_empty());
    }

    #[test]
    fn test_absorb_merges_child_changes() {
        let existing = ObjectId::permanent("Employee", 1);
        let mut parent = ChangeSet::new();
        let inserted = Record::new("Employee").with("name", "Harold");
        parent.insert(inserted.clone());

        let mut child = ChangeSet::new();
        child.update(inserted.clone().with("name", "Harold Lee"));
        child.delete(existing.clone(), "Employee");
        parent.absorb(child);

        assert!(matches!(parent.get(&inserted.id), Some(Change::Insert(_))));
        assert!(matches!(parent.get(&existing), Some(Change::Delete { .. })));
        assert_eq!(parent.len(), 2);
    }

    #[test]
    fn test_remap_moves_record_id() {
        let mut set = ChangeSet::new();
        let record = Record::new("Employee");
        set.insert(record.clone());
        let permanent = ObjectId::permanent("Employee", 7);
        assert!(set.remap(&record.id, permanent.clone()));
        assert_eq!(set.inserted().next().map(|r| r.id.clone()), Some(permanent));
    }

    #[test]
    fn test_apply_to_filters_entity() {
        let mut set = ChangeSet::new();
        set.insert(Record::new("Employee"));
        set.insert(Record::new("Department"));
        let mut view = BTreeMap::new();
        set.apply_to("Employee", &mut view);
        assert_eq!(view.len(), 1);
    }
}
