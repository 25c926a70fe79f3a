//! Bulk record import.
//!
//! [`BulkImporter`] fills a store with a large synthetic dataset from its own
//! task. It derives one private [`Context`](crate::store::Context) from the
//! container, stages records a batch at a time and checkpoints after every
//! batch, so progress is durable at batch granularity:
//!
//! 1. Stage `batch_size` records, yielding to the runtime between insertions
//! 2. Save the context
//! 3. Report the committed batch (ids only) to the optional progress channel
//!
//! Any failure stops the run. Batches already checkpointed stay committed; the
//! failing batch is discarded in full.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let container = Container::in_memory();
//! let stats = BulkImporter::new(container, ImportConfig::new(100_000, 1_000))
//!     .spawn()
//!     .wait()
//!     .await?;
//! assert_eq!(stats.batches, 100);
//! ```

pub mod guard;
pub mod stats;

pub use guard::{PreloadOutcome, ReimportPolicy, preload, preload_with_progress};
pub use stats::ImportStats;

use crate::config::ImportConfig;
use crate::error::StoreError;
use crate::store::{Container, Context, Record, RecordId};
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Builds the record staged at a given zero-based position of the run.
pub type RecordGenerator = Box<dyn Fn(usize) -> Record + Send + Sync>;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid import configuration: {0}")]
    InvalidConfig(String),
    #[error("staging failed in batch {batch} after {committed} committed records: {source}")]
    Staging {
        batch: usize,
        committed: usize,
        source: StoreError,
    },
    #[error("checkpoint of batch {batch} failed after {committed} committed records: {source}")]
    Checkpoint {
        batch: usize,
        committed: usize,
        source: StoreError,
    },
    #[error("could not inspect store before import: {0}")]
    Precheck(StoreError),
    #[error("import task did not finish: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ImportError {
    /// Records that were durably committed before the run aborted.
    pub fn committed(&self) -> Option<usize> {
        match self {
            ImportError::Staging { committed, .. } | ImportError::Checkpoint { committed, .. } => {
                Some(*committed)
            }
            _ => None,
        }
    }

    /// One-based number of the batch that failed.
    pub fn batch(&self) -> Option<usize> {
        match self {
            ImportError::Staging { batch, .. } | ImportError::Checkpoint { batch, .. } => {
                Some(*batch)
            }
            _ => None,
        }
    }
}

/// Sent after successful checkpoints.
///
/// A report normally covers a single batch. When the receiver falls behind,
/// the reports of several consecutive batches are merged into one so the
/// importer never waits on the channel.
#[derive(Debug, Clone)]
pub struct BatchCommitted {
    /// One-based number of the first batch covered by this report
    pub first_batch: usize,
    /// One-based number of the last batch covered by this report
    pub batch: usize,
    /// Records committed so far, this report included
    pub committed: usize,
    /// Identifiers committed by the covered batches, in insertion order
    pub ids: Vec<RecordId>,
}

/// Forwards checkpoint reports without ever blocking the import loop.
struct ProgressReporter {
    sender: mpsc::Sender<BatchCommitted>,
    pending: Option<BatchCommitted>,
}

impl ProgressReporter {
    fn new(sender: mpsc::Sender<BatchCommitted>) -> Self {
        Self {
            sender,
            pending: None,
        }
    }

    /// Queue `report`, merging it into an undelivered one when the channel is
    /// full.
    ///
    /// # Returns
    /// `false` once the receiver has gone away.
    fn report(&mut self, report: BatchCommitted) -> bool {
        let report = match self.pending.take() {
            Some(mut earlier) => {
                earlier.batch = report.batch;
                earlier.committed = report.committed;
                earlier.ids.extend(report.ids);
                earlier
            }
            None => report,
        };

        match self.sender.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(report)) => {
                log::trace!(
                    "import: progress channel full, holding batches {}-{}",
                    report.first_batch,
                    report.batch
                );
                self.pending = Some(report);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        let Some(report) = self.pending.take() else {
            return;
        };

        // Deliver the tail once the receiver catches up; the import is done.
        let sender = self.sender.clone();
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                let _ = sender.send(report).await;
            });
        }
    }
}

/// Fills a container with synthetic records in checkpointed batches.
///
/// Built with [`BulkImporter::new`], optionally customised with
/// [`with_generator`](BulkImporter::with_generator) and
/// [`with_progress`](BulkImporter::with_progress), then started with
/// [`spawn`](BulkImporter::spawn) or [`run`](BulkImporter::run).
pub struct BulkImporter {
    container: Container,
    config: ImportConfig,
    generator: RecordGenerator,
    progress: Option<mpsc::Sender<BatchCommitted>>,
}

impl BulkImporter {
    /// Create an importer that writes `config.total` records into `container`.
    ///
    /// # Arguments
    /// * `container` - Store to fill; the importer derives its own context
    /// * `config` - Total, batch size, per-insert delay and title prefix
    pub fn new(container: Container, config: ImportConfig) -> Self {
        let prefix = config.title_prefix.clone();
        Self {
            container,
            config,
            generator: Box::new(move |index| Record::synthetic(&prefix, index)),
            progress: None,
        }
    }

    /// Replace the default `"<prefix> <index>"` records.
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(usize) -> Record + Send + Sync + 'static,
    {
        self.generator = Box::new(generator);
        self
    }

    /// Report committed batches on `progress`.
    ///
    /// The importer never waits for the receiver. While the channel is full,
    /// reports are merged and delivered once there is room again.
    pub fn with_progress(mut self, progress: mpsc::Sender<BatchCommitted>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the import on its own task. The caller keeps running.
    pub fn spawn(self) -> ImportHandle {
        ImportHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    /// Run the import on the current task.
    ///
    /// # Returns
    /// Totals for the run, or the first failure together with the batch it
    /// occurred in and the number of records committed before it.
    pub async fn run(self) -> Result<ImportStats, ImportError> {
        let mut context = self.container.new_context();
        self.run_in(&mut context).await
    }

    async fn run_in(self, context: &mut Context) -> Result<ImportStats, ImportError> {
        let BulkImporter {
            container,
            config,
            generator,
            progress,
        } = self;

        if config.batch_size == 0 {
            return Err(ImportError::InvalidConfig(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let started = Instant::now();
        let batch_count = config.batch_count();
        let mut stats = ImportStats::default();
        let mut reporter = progress.map(ProgressReporter::new);

        log::info!(
            "import: staging {} records in {} batches of {} ({} store)",
            config.total,
            batch_count,
            config.batch_size,
            container.kind()
        );

        let mut index = 0;
        for batch in 1..=batch_count {
            let size = config.batch_size.min(config.total - index);
            let mut ids = Vec::with_capacity(size);

            for _ in 0..size {
                tokio::task::yield_now().await;
                if !config.insert_delay.is_zero() {
                    tokio::time::sleep(config.insert_delay).await;
                }

                match context.insert(generator(index)) {
                    Ok(id) => ids.push(id),
                    Err(source) => {
                        context.rollback();
                        log::error!("import: batch {} staging failed: {}", batch, source);
                        return Err(ImportError::Staging {
                            batch,
                            committed: stats.records,
                            source,
                        });
                    }
                }
                index += 1;
            }

            if let Err(source) = context.save().await {
                context.rollback();
                log::error!("import: batch {} checkpoint failed: {}", batch, source);
                return Err(ImportError::Checkpoint {
                    batch,
                    committed: stats.records,
                    source,
                });
            }

            // Committed records are not needed again; drop them from the context.
            context.reset();

            stats.record_batch(size);
            log::debug!(
                "import: checkpoint {}/{} committed ({} records)",
                batch,
                batch_count,
                stats.records
            );

            if let Some(active) = reporter.as_mut() {
                let report = BatchCommitted {
                    first_batch: batch,
                    batch,
                    committed: stats.records,
                    ids,
                };
                if !active.report(report) {
                    log::debug!("import: progress receiver dropped, no further reports");
                    reporter = None;
                }
            }
        }

        stats.elapsed = started.elapsed();
        log::info!(
            "import: complete - {} records in {} batches ({:.0} records/s)",
            stats.records,
            stats.batches,
            stats.records_per_second()
        );

        Ok(stats)
    }
}

/// A spawned import run.
pub struct ImportHandle {
    handle: JoinHandle<Result<ImportStats, ImportError>>,
}

impl ImportHandle {
    /// Whether the run has ended, successfully or not. Never blocks.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<ImportStats, ImportError> {
        self.handle.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn imports_total_in_sequential_checkpoints() {
        let container = Container::in_memory();
        let stats = BulkImporter::new(container.clone(), ImportConfig::new(5_000, 1_000))
            .run()
            .await
            .unwrap();

        assert_eq!(stats.batches, 5);
        assert_eq!(stats.records, 5_000);
        assert_eq!(container.new_context().fetch_count().await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn remainder_lands_in_a_short_final_batch() {
        let container = Container::in_memory();
        let (tx, mut rx) = mpsc::channel(8);

        let stats = BulkImporter::new(container.clone(), ImportConfig::new(2_500, 1_000))
            .with_progress(tx)
            .run()
            .await
            .unwrap();

        assert_eq!(stats.batches, 3);
        let mut sizes = Vec::new();
        while let Some(report) = rx.recv().await {
            sizes.push(report.ids.len());
        }
        assert_eq!(sizes, vec![1_000, 1_000, 500]);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let err = BulkImporter::new(Container::in_memory(), ImportConfig::new(10, 0))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn checkpoint_failure_keeps_earlier_batches() {
        let container = Container::in_memory_with_capacity(Some(3_000));
        let err = BulkImporter::new(container.clone(), ImportConfig::new(10_000, 1_000))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Checkpoint { .. }));
        assert_eq!(err.batch(), Some(4));
        assert_eq!(err.committed(), Some(3_000));
        assert_eq!(container.new_context().fetch_count().await.unwrap(), 3_000);
    }

    #[tokio::test]
    async fn staging_failure_discards_the_open_batch() {
        let container = Container::in_memory();
        let err = BulkImporter::new(container.clone(), ImportConfig::new(10, 4))
            .with_generator(|index| {
                if index == 6 {
                    Record::new("", Vec::new())
                } else {
                    Record::synthetic("Movie", index)
                }
            })
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImportError::Staging {
                batch: 2,
                committed: 4,
                ..
            }
        ));
        assert_eq!(container.new_context().fetch_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn default_generator_uses_title_prefix() {
        let container = Container::in_memory();
        let mut config = ImportConfig::new(3, 3);
        config.title_prefix = "User".to_string();
        let (tx, mut rx) = mpsc::channel(1);

        let handle = BulkImporter::new(container.clone(), config)
            .with_progress(tx)
            .spawn();
        let report = rx.recv().await.unwrap();
        handle.wait().await.unwrap();

        let mut context = container.new_context();
        assert_eq!(context.model(report.ids[2]).await.unwrap().title, "User 2");
    }

    #[tokio::test]
    async fn full_progress_channel_does_not_stall_the_run() {
        let container = Container::in_memory();
        let (tx, mut rx) = mpsc::channel(1);

        let stats = BulkImporter::new(container.clone(), ImportConfig::new(30, 10))
            .with_progress(tx)
            .spawn()
            .wait()
            .await
            .unwrap();
        assert_eq!(stats.batches, 3);

        let mut ids = Vec::new();
        let mut covered = Vec::new();
        while let Some(report) = rx.recv().await {
            covered.push((report.first_batch, report.batch));
            ids.extend(report.ids);
        }
        assert_eq!(covered, vec![(1, 1), (2, 3)]);
        assert_eq!(ids.len(), 30);

        let mut context = container.new_context();
        assert_eq!(context.model(ids[29]).await.unwrap().title, "Movie 29");
    }

    #[tokio::test]
    async fn checkpointed_records_are_released_from_the_context() {
        let container = Container::in_memory();
        let mut context = container.new_context();

        let stats = BulkImporter::new(container.clone(), ImportConfig::new(10_000, 1_000))
            .run_in(&mut context)
            .await
            .unwrap();

        assert_eq!(stats.records, 10_000);
        assert_eq!(context.registered_count(), 0);
        assert_eq!(context.fetch_count().await.unwrap(), 10_000);
    }
}
