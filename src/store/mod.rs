//! Record storage.
//!
//! A [`Container`] is the long-lived, cheaply cloneable handle to a store. Work
//! happens in a [`Context`] derived from it: each task creates its own context,
//! stages changes there and checkpoints them with [`Context::save`]. Contexts
//! are never shared; tasks exchange [`RecordId`]s and resolve them locally.

pub mod context;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod record;

pub use context::Context;
pub use memory::MemoryStore;
pub use migration::{reset_database, run_migrations};
pub use record::{FetchDescriptor, Record, RecordId, StoredRecord};

use crate::config::StoreConfig;
use crate::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Changes staged in a context, applied as one unit by a checkpoint.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    /// New records, in staging order
    pub inserts: Vec<(RecordId, Record)>,
    /// Committed records with their modified contents
    pub updates: Vec<(RecordId, Record)>,
    /// Committed records to remove
    pub deletes: Vec<RecordId>,
}

impl ChangeSet {
    /// True when applying the set would not touch the store.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Number of staged changes of every kind.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryStore>),
    Postgres(PgPool),
}

/// Shareable handle to a record store.
#[derive(Clone)]
pub struct Container {
    backend: Backend,
}

impl Container {
    /// Volatile store that lives as long as the last clone of this handle.
    pub fn in_memory() -> Self {
        Self::in_memory_with_capacity(None)
    }

    /// Volatile store whose checkpoints fail once they would exceed `capacity`
    /// committed records.
    pub fn in_memory_with_capacity(capacity: Option<usize>) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::new(capacity))),
        }
    }

    /// Wrap an existing pool. The schema is expected to be migrated already.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    /// Connect to Postgres and bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    /// Open the store described by `config`.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.in_memory {
            log::info!("opening in-memory record store");
            return Ok(Self::in_memory_with_capacity(config.memory_capacity));
        }

        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::validation("DATABASE_URL must be set unless STORE_IN_MEMORY is enabled")
        })?;

        log::info!("connecting to postgres record store");
        Self::connect(url, config.max_connections).await
    }

    /// Derive a fresh, empty context for the calling task.
    pub fn new_context(&self) -> Context {
        Context::new(self.clone())
    }

    /// Backend name for logs and CLI output: `"memory"` or `"postgres"`.
    pub fn kind(&self) -> &'static str {
        match &self.backend {
            Backend::Memory(_) => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub(crate) async fn apply(&self, changes: &ChangeSet) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Memory(store) => store.apply(changes),
            Backend::Postgres(pool) => postgres::apply(pool, changes).await,
        }
    }

    pub(crate) async fn count(&self) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.count()),
            Backend::Postgres(pool) => postgres::count(pool).await,
        }
    }

    pub(crate) async fn find(&self, id: RecordId) -> Result<Option<StoredRecord>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.find(id)),
            Backend::Postgres(pool) => postgres::find(pool, id).await,
        }
    }

    pub(crate) async fn fetch(
        &self,
        descriptor: FetchDescriptor,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.fetch(descriptor)),
            Backend::Postgres(pool) => postgres::fetch(pool, descriptor).await,
        }
    }

    /// Remove every committed record.
    pub async fn reset(&self) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                store.clear();
                Ok(())
            }
            Backend::Postgres(pool) => Ok(reset_database(pool).await?),
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("kind", &self.kind())
            .finish()
    }
}
