//! Caller-side guard against importing twice.
//!
//! The importer itself has no duplicate detection; running it against a
//! populated store adds another full dataset. [`preload`] checks the store
//! first when asked to.

use super::{BatchCommitted, BulkImporter, ImportError, ImportStats};
use crate::config::ImportConfig;
use crate::store::Container;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReimportPolicy {
    /// Import regardless of what is already stored.
    Always,
    /// Import only into an empty store.
    #[default]
    SkipIfPopulated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadOutcome {
    Imported(ImportStats),
    Skipped { existing: usize },
}

/// Run a bulk import on its own task, subject to `policy`.
pub async fn preload(
    container: &Container,
    config: ImportConfig,
    policy: ReimportPolicy,
) -> Result<PreloadOutcome, ImportError> {
    preload_with_progress(container, config, policy, None).await
}

/// [`preload`] that reports committed batches on `progress`.
///
/// # Arguments
/// * `container` - Store to fill
/// * `config` - Shape of the import run
/// * `policy` - Whether a populated store is imported into again
/// * `progress` - Receives checkpoint reports; closed without any when skipped
///
/// # Returns
/// The run's totals, or the number of records found when the import was skipped.
pub async fn preload_with_progress(
    container: &Container,
    config: ImportConfig,
    policy: ReimportPolicy,
    progress: Option<mpsc::Sender<BatchCommitted>>,
) -> Result<PreloadOutcome, ImportError> {
    if policy == ReimportPolicy::SkipIfPopulated {
        let existing = container
            .new_context()
            .fetch_count()
            .await
            .map_err(ImportError::Precheck)?;

        if existing > 0 {
            log::info!("preload: store already holds {} records, skipping", existing);
            return Ok(PreloadOutcome::Skipped { existing });
        }
    }

    let mut importer = BulkImporter::new(container.clone(), config);
    if let Some(progress) = progress {
        importer = importer.with_progress(progress);
    }
    let stats = importer.spawn().wait().await?;

    Ok(PreloadOutcome::Imported(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_preload_is_skipped() {
        let container = Container::in_memory();
        let config = ImportConfig::new(200, 50);

        let first = preload(&container, config.clone(), ReimportPolicy::SkipIfPopulated)
            .await
            .unwrap();
        assert!(matches!(first, PreloadOutcome::Imported(ref stats) if stats.records == 200));

        let second = preload(&container, config, ReimportPolicy::SkipIfPopulated)
            .await
            .unwrap();
        assert_eq!(second, PreloadOutcome::Skipped { existing: 200 });
        assert_eq!(container.new_context().fetch_count().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn always_policy_duplicates_the_dataset() {
        let container = Container::in_memory();
        let config = ImportConfig::new(100, 100);

        preload(&container, config.clone(), ReimportPolicy::Always)
            .await
            .unwrap();
        preload(&container, config, ReimportPolicy::Always)
            .await
            .unwrap();

        assert_eq!(container.new_context().fetch_count().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn guarded_preload_reports_checkpoints() {
        let container = Container::in_memory();
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = preload_with_progress(
            &container,
            ImportConfig::new(300, 100),
            ReimportPolicy::SkipIfPopulated,
            Some(tx),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, PreloadOutcome::Imported(_)));

        let mut batches = Vec::new();
        while let Some(report) = rx.recv().await {
            batches.push(report.batch);
        }
        assert_eq!(batches, vec![1, 2, 3]);

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = preload_with_progress(
            &container,
            ImportConfig::new(300, 100),
            ReimportPolicy::SkipIfPopulated,
            Some(tx),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PreloadOutcome::Skipped { existing: 300 });
        assert!(rx.recv().await.is_none());
    }
}
