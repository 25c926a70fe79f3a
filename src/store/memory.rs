//! In-memory backend.
//!
//! Keeps committed records in a map guarded by a single `RwLock`. A checkpoint
//! takes the write lock once, validates the whole change set and only then
//! applies it, so readers never observe half of a checkpoint.

use super::{ChangeSet, FetchDescriptor, Record, RecordId, StoredRecord};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

struct Row {
    seq: u64,
    record: Record,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    rows: HashMap<RecordId, Row>,
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            capacity,
        }
    }

    pub fn apply(&self, changes: &ChangeSet) -> Result<usize, StoreError> {
        if changes.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write();

        // Validate everything up front; nothing is written unless all of it fits.
        for (id, _) in &changes.inserts {
            if state.rows.contains_key(id) {
                return Err(StoreError::validation(format!("record {} already exists", id)));
            }
        }

        let missing = changes
            .updates
            .iter()
            .filter(|(id, _)| !state.rows.contains_key(id))
            .count();
        if missing > 0 {
            return Err(StoreError::Stale(missing));
        }

        let removed = changes
            .deletes
            .iter()
            .filter(|id| state.rows.contains_key(id))
            .count();
        let requested = state.rows.len() + changes.inserts.len() - removed;
        if let Some(capacity) = self.capacity {
            if requested > capacity {
                return Err(StoreError::CapacityExceeded {
                    capacity,
                    requested,
                });
            }
        }

        let now = Utc::now();
        for (id, record) in &changes.inserts {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.rows.insert(
                *id,
                Row {
                    seq,
                    record: record.clone(),
                    created_at: now,
                },
            );
        }

        for (id, record) in &changes.updates {
            if let Some(row) = state.rows.get_mut(id) {
                row.record = record.clone();
            }
        }

        for id in &changes.deletes {
            state.rows.remove(id);
        }

        log::trace!(
            "memory store applied {} inserts, {} updates, {} deletes",
            changes.inserts.len(),
            changes.updates.len(),
            removed
        );

        Ok(changes.inserts.len() + changes.updates.len() + removed)
    }

    pub fn count(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn find(&self, id: RecordId) -> Option<StoredRecord> {
        self.state.read().rows.get(&id).map(|row| to_stored(id, row))
    }

    pub fn fetch(&self, descriptor: FetchDescriptor) -> Vec<StoredRecord> {
        let state = self.state.read();
        let mut rows: Vec<(&RecordId, &Row)> = state.rows.iter().collect();
        rows.sort_by_key(|(_, row)| row.seq);

        rows.into_iter()
            .skip(descriptor.offset)
            .take(descriptor.limit.unwrap_or(usize::MAX))
            .map(|(id, row)| to_stored(*id, row))
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.rows.clear();
        state.next_seq = 0;
    }
}

fn to_stored(id: RecordId, row: &Row) -> StoredRecord {
    StoredRecord {
        id,
        title: row.record.title.clone(),
        cast: row.record.cast.clone(),
        created_at: row.created_at,
    }
}
