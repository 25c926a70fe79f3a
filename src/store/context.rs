use super::{ChangeSet, Container, FetchDescriptor, Record, RecordId, StoredRecord};
use crate::error::StoreError;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;

/// Exclusive staging area derived from a [`Container`].
///
/// A context may be moved into a task but never shared between tasks: it is
/// neither `Clone` nor `Sync`. Staged changes become visible to other contexts
/// only after [`save`](Context::save) succeeds.
pub struct Context {
    container: Container,
    registered: HashMap<RecordId, Record>,
    inserted: Vec<RecordId>,
    updated: Vec<RecordId>,
    updated_set: HashSet<RecordId>,
    deleted: Vec<RecordId>,
    _unshared: PhantomData<Cell<()>>,
}

impl Context {
    pub(crate) fn new(container: Container) -> Self {
        Self {
            container,
            registered: HashMap::new(),
            inserted: Vec::new(),
            updated: Vec::new(),
            updated_set: HashSet::new(),
            deleted: Vec::new(),
            _unshared: PhantomData,
        }
    }

    /// Stage a new record and return its identifier.
    pub fn insert(&mut self, record: Record) -> Result<RecordId, StoreError> {
        record.validate().map_err(StoreError::Validation)?;

        let id = RecordId::new();
        self.registered.insert(id, record);
        self.inserted.push(id);
        Ok(id)
    }

    /// Stage removal of a record. Unsaved inserts are simply dropped.
    pub fn delete(&mut self, id: RecordId) {
        self.registered.remove(&id);

        if let Some(position) = self.inserted.iter().position(|staged| *staged == id) {
            self.inserted.remove(position);
            return;
        }

        if self.updated_set.remove(&id) {
            self.updated.retain(|staged| *staged != id);
        }

        if !self.deleted.contains(&id) {
            self.deleted.push(id);
        }
    }

    /// Look up a record already registered in this context, without touching
    /// the store.
    pub fn registered_model(&self, id: &RecordId) -> Option<&Record> {
        self.registered.get(id)
    }

    /// Resolve an identifier, loading the record from the store if needed.
    pub async fn model(&mut self, id: RecordId) -> Result<&Record, StoreError> {
        self.register(id).await?;
        self.registered.get(&id).ok_or(StoreError::NotFound(id))
    }

    /// Resolve an identifier for mutation; the record is saved with the next
    /// checkpoint.
    pub async fn model_mut(&mut self, id: RecordId) -> Result<&mut Record, StoreError> {
        self.register(id).await?;

        if !self.inserted.contains(&id) && self.updated_set.insert(id) {
            self.updated.push(id);
        }

        self.registered.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    async fn register(&mut self, id: RecordId) -> Result<(), StoreError> {
        if self.deleted.contains(&id) {
            return Err(StoreError::NotFound(id));
        }
        if self.registered.contains_key(&id) {
            return Ok(());
        }

        let stored = self
            .container
            .find(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        self.registered.insert(id, stored.to_record());
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Checkpoint: make every staged change durable in one step.
    ///
    /// On failure nothing is applied and the changes remain staged, so the
    /// caller may retry or [`rollback`](Context::rollback).
    pub async fn save(&mut self) -> Result<usize, StoreError> {
        if !self.has_changes() {
            return Ok(0);
        }

        let changes = self.change_set();
        let applied = self.container.apply(&changes).await?;

        self.inserted.clear();
        self.updated.clear();
        self.updated_set.clear();
        self.deleted.clear();

        log::trace!("context saved {} changes", changes.len());
        Ok(applied)
    }

    fn change_set(&self) -> ChangeSet {
        let pick = |ids: &[RecordId]| -> Vec<(RecordId, Record)> {
            ids.iter()
                .filter_map(|id| self.registered.get(id).map(|record| (*id, record.clone())))
                .collect()
        };

        ChangeSet {
            inserts: pick(&self.inserted),
            updates: pick(&self.updated),
            deletes: self.deleted.clone(),
        }
    }

    /// Discard staged changes. Locally modified records are forgotten so the
    /// next lookup reloads the committed version.
    pub fn rollback(&mut self) {
        for id in self.inserted.drain(..) {
            self.registered.remove(&id);
        }
        for id in self.updated.drain(..) {
            self.registered.remove(&id);
        }
        self.updated_set.clear();
        self.deleted.clear();
    }

    /// Discard staged changes and forget every registered record.
    ///
    /// Long-lived contexts call this between units of work so that later
    /// lookups read the committed state again and memory stays bounded.
    pub fn reset(&mut self) {
        self.rollback();
        self.registered.clear();
    }

    /// Number of records currently registered, staged or loaded.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Number of committed records. Staged changes are not counted.
    ///
    /// The returned future does not borrow the context, so it can be awaited
    /// from a spawned task.
    pub fn fetch_count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send + use<> {
        let container = self.container.clone();
        async move { container.count().await }
    }

    /// Committed records in insertion order. Records not yet registered in
    /// this context are registered; local modifications are left untouched.
    pub async fn fetch(
        &mut self,
        descriptor: FetchDescriptor,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = self.container.fetch(descriptor).await?;
        for row in &rows {
            self.registered
                .entry(row.id)
                .or_insert_with(|| row.to_record());
        }
        Ok(rows)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.has_changes() {
            log::debug!(
                "context dropped with {} unsaved changes ({} registered)",
                self.pending_count(),
                self.registered_count()
            );
        }
    }
}
