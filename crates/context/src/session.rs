//! Exclusive view of a managed context.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ctxop_core::{ChangeSet, ContextId, Model, ObjectId, Record, ScopedSession};
use ctxop_storage::Store;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::context::ManagedContext;
use crate::error::{ContextError, Result};

/// Exclusive access to one context's pending changes.
///
/// Only exists inside [`ManagedContext`]'s `perform`. Reads fall through to
/// the ancestors and the backing store; writes stay here until `save`.
pub struct Session {
    context_id: ContextId,
    parent: Option<Arc<ManagedContext>>,
    store: Option<Arc<dyn Store>>,
    model: Arc<Model>,
    changes: OwnedMutexGuard<ChangeSet>,
}

impl Session {
    pub(crate) fn new(
        context_id: ContextId,
        parent: Option<Arc<ManagedContext>>,
        store: Option<Arc<dyn Store>>,
        model: Arc<Model>,
        changes: OwnedMutexGuard<ChangeSet>,
    ) -> Self {
        Self {
            context_id,
            parent,
            store,
            model,
            changes,
        }
    }

    /// Id of the context this session belongs to.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Insert a new object. It gets a fresh temporary id, which is returned.
    pub fn insert(&mut self, mut record: Record) -> Result<ObjectId> {
        self.check_entity(&record.entity)?;
        record.id = ObjectId::temporary();
        let id = record.id.clone();
        self.changes.insert(record);
        Ok(id)
    }

    /// Replace the attributes of a visible object.
    pub fn update(&mut self, record: Record) -> Result<()> {
        self.check_entity(&record.entity)?;
        if self.get(&record.id)?.is_none() {
            return Err(ContextError::NotFound(record.id));
        }
        self.changes.update(record);
        Ok(())
    }

    /// Delete a visible object.
    pub fn delete(&mut self, id: &ObjectId) -> Result<()> {
        let record = self
            .get(id)?
            .ok_or_else(|| ContextError::NotFound(id.clone()))?;
        self.changes.delete(id.clone(), record.entity);
        Ok(())
    }

    /// Look up one object as seen from this context.
    pub fn get(&self, id: &ObjectId) -> Result<Option<Record>> {
        if let Some(change) = self.changes.get(id) {
            return Ok(change.record().cloned());
        }

        let mut ancestor = self.parent.clone();
        while let Some(context) = ancestor {
            {
                let changes = context.changes.blocking_lock();
                if let Some(change) = changes.get(id) {
                    return Ok(change.record().cloned());
                }
            }
            ancestor = context.parent_context().cloned();
        }

        match (id, &self.store) {
            (ObjectId::Permanent { entity, .. }, Some(store)) => {
                Ok(store.load(entity)?.into_iter().find(|r| &r.id == id))
            }
            _ => Ok(None),
        }
    }

    /// Every object of an entity visible from this context, ordered by id.
    pub fn fetch(&self, entity: &str) -> Result<Vec<Record>> {
        self.check_entity(entity)?;
        Ok(self.view(entity)?.into_values().collect())
    }

    /// Objects inserted in this context and not yet saved.
    pub fn inserted_objects(&self) -> Vec<Record> {
        self.changes.inserted().cloned().collect()
    }

    /// Pending changes of this context.
    pub fn pending_changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Discard all pending changes.
    pub fn rollback(&mut self) {
        let dropped = self.changes.take();
        debug!("Context {} rolled back {} changes", self.context_id, dropped.len());
    }

    fn check_entity(&self, entity: &str) -> Result<()> {
        match self.model.entity(entity) {
            Some(_) => Ok(()),
            None => Err(ContextError::UnknownEntity(entity.to_string())),
        }
    }

    /// Store records, overlaid with each ancestor's changes from the root
    /// down, then with this context's own changes.
    fn view(&self, entity: &str) -> Result<BTreeMap<ObjectId, Record>> {
        let mut view = BTreeMap::new();
        if let Some(store) = &self.store {
            for record in store.load(entity)? {
                view.insert(record.id.clone(), record);
            }
        }

        let mut ancestors = Vec::new();
        let mut next = self.parent.clone();
        while let Some(context) = next {
            next = context.parent_context().cloned();
            ancestors.push(context);
        }
        for context in ancestors.iter().rev() {
            context.changes.blocking_lock().apply_to(entity, &mut view);
        }

        self.changes.apply_to(entity, &mut view);
        Ok(view)
    }

    /// Check required and unique attributes of every object changed here.
    fn validate(&self) -> Result<()> {
        let mut views: HashMap<String, BTreeMap<ObjectId, Record>> = HashMap::new();

        for record in self.changes.upserted() {
            let description = self
                .model
                .entity(&record.entity)
                .ok_or_else(|| ContextError::UnknownEntity(record.entity.clone()))?;

            for attribute in &description.required {
                if record.get(attribute).is_none() {
                    return Err(ContextError::MissingAttribute {
                        entity: record.entity.clone(),
                        attribute: attribute.clone(),
                        object: record.id.clone(),
                    });
                }
            }

            if description.unique.is_empty() {
                continue;
            }
            if !views.contains_key(&record.entity) {
                views.insert(record.entity.clone(), self.view(&record.entity)?);
            }
            let view = &views[&record.entity];

            for attribute in &description.unique {
                let Some(value) = record.get(attribute) else {
                    continue;
                };
                let duplicate = view
                    .values()
                    .any(|other| other.id != record.id && other.get(attribute) == Some(value));
                if duplicate {
                    return Err(ContextError::UniqueViolation {
                        entity: record.entity.clone(),
                        attribute: attribute.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ScopedSession for Session {
    type Error = ContextError;

    fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn has_inserted_objects(&self) -> bool {
        self.changes.inserted().next().is_some()
    }

    fn obtain_permanent_ids(&mut self) -> Result<()> {
        let mut temporary: BTreeMap<String, Vec<ObjectId>> = BTreeMap::new();
        for record in self.changes.inserted() {
            if record.id.is_temporary() {
                temporary
                    .entry(record.entity.clone())
                    .or_default()
                    .push(record.id.clone());
            }
        }
        if temporary.is_empty() {
            return Ok(());
        }

        let store = self.store.clone().ok_or(ContextError::NoStore)?;
        for (entity, ids) in temporary {
            let keys = store.allocate_keys(&entity, ids.len())?;
            for (id, key) in ids.iter().zip(keys) {
                self.changes.remap(id, ObjectId::permanent(entity.clone(), key));
            }
            debug!(
                "Context {} obtained {} permanent ids for {}",
                self.context_id,
                ids.len(),
                entity
            );
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.validate()?;

        match self.parent.clone() {
            Some(parent) => {
                let pending = self.changes.take();
                let count = pending.len();
                parent.changes.blocking_lock().absorb(pending);
                debug!(
                    "Context {} saved {} changes into {}",
                    self.context_id,
                    count,
                    parent.id()
                );
            }
            None => {
                let store = self.store.clone().ok_or(ContextError::NoStore)?;
                self.obtain_permanent_ids()?;
                if let Err(e) = store.apply(&self.changes) {
                    warn!("Context {} failed to write its store: {}", self.context_id, e);
                    return Err(e.into());
                }
                let written = self.changes.take();
                debug!(
                    "Context {} saved {} changes into its store",
                    self.context_id,
                    written.len()
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context_id", &self.context_id)
            .field("pending", &self.changes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxop_core::{EntityDescription, TransactionalContext};
    use ctxop_storage::InMemoryStore;

    fn model() -> Model {
        Model::new()
            .with_entity(EntityDescription::new("Employee").required("name").unique("name"))
            .with_entity(EntityDescription::new("Department").required("name"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_unknown_entity_fails() {
        let root = ManagedContext::detached(model());
        let result = root.perform(|s| s.insert(Record::new("Robot"))).await.unwrap();
        assert!(matches!(result, Err(ContextError::UnknownEntity(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_required_attribute_fails_save() {
        let root = ManagedContext::root(Arc::new(InMemoryStore::new()), model());
        let child = root.new_child();
        let result = child
            .perform(|s| {
                s.insert(Record::new("Department"))?;
                s.save()
            })
            .await
            .unwrap();

        let err = result.unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, ContextError::MissingAttribute { .. }));
        assert!(child.has_changes().await.unwrap());
        assert!(!root.has_changes().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unique_attribute_checked_against_ancestors() {
        let root = ManagedContext::root(Arc::new(InMemoryStore::new()), model());
        root.perform(|s| {
            s.insert(Record::new("Employee").with("name", "Harold"))?;
            s.save()
        })
        .await
        .unwrap()
        .unwrap();

        let child = root.new_child();
        let result = child
            .perform(|s| {
                s.insert(Record::new("Employee").with("name", "Harold"))?;
                s.save()
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(ContextError::UniqueViolation { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_and_delete_visible_objects() {
        let root = ManagedContext::root(Arc::new(InMemoryStore::new()), model());
        let id = root
            .perform(|s| {
                let id = s.insert(Record::new("Employee").with("name", "Harold"))?;
                s.save()?;
                Ok::<_, ContextError>(id)
            })
            .await
            .unwrap()
            .unwrap();
        // Root saves assign permanent ids.
        let stored = root.fetch("Employee").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].id.is_temporary());
        assert!(id.is_temporary());

        let child = root.new_child();
        let mut renamed = stored[0].clone();
        renamed.set("name", "Harold Lee");
        let target = renamed.id.clone();
        child
            .perform(move |s| {
                s.update(renamed)?;
                s.save()
            })
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = root
            .fetch("Employee")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["Harold Lee".to_string()]);

        child
            .perform(move |s| {
                s.delete(&target)?;
                s.save()
            })
            .await
            .unwrap()
            .unwrap();
        root.save().await.unwrap();
        assert!(root.fetch("Employee").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_obtain_permanent_ids_requires_store() {
        let root = ManagedContext::detached(model());
        let child = root.new_child();
        let result = child
            .perform(|s| {
                s.insert(Record::new("Employee").with("name", "Harold"))?;
                s.obtain_permanent_ids()
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(ContextError::NoStore)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_obtain_permanent_ids_remaps_inserts() {
        let root = ManagedContext::root(Arc::new(InMemoryStore::new()), model());
        let child = root.new_child();
        let ids = child
            .perform(|s| {
                s.insert(Record::new("Employee").with("name", "Harold"))?;
                s.insert(Record::new("Employee").with("name", "Kumar"))?;
                s.obtain_permanent_ids()?;
                Ok::<_, ContextError>(
                    s.inserted_objects().into_iter().map(|r| r.id).collect::<Vec<_>>(),
                )
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !id.is_temporary()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_store_write_keeps_changes() {
        let store = Arc::new(InMemoryStore::new());
        let root = ManagedContext::root(store.clone(), model());
        root.perform(|s| s.insert(Record::new("Employee").with("name", "Harold")))
            .await
            .unwrap()
            .unwrap();

        store.fail_next_apply();
        assert!(matches!(root.save().await, Err(ContextError::Store(_))));
        assert!(root.has_changes().await.unwrap());
        root.save().await.unwrap();
        assert_eq!(store.count("Employee"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rollback_discards_changes() {
        let root = ManagedContext::detached(model());
        let has_changes = root
            .perform(|s| {
                s.insert(Record::new("Employee").with("name", "Harold"))?;
                s.rollback();
                Ok::<_, ContextError>(s.has_changes())
            })
            .await
            .unwrap()
            .unwrap();
        assert!(!has_changes);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_changes_belong_to_session_context() {
        let root = ManagedContext::detached(model());
        let expected = root.id();
        let (context_id, pending) = root
            .perform(|s| {
                s.insert(Record::new("Employee").with("name", "Harold"))?;
                Ok::<_, ContextError>((s.context_id(), s.pending_changes().len()))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context_id, expected);
        assert_eq!(pending, 1);
    }
}
