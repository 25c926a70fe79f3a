use record_store::import::{BatchCommitted, ImportError, PreloadOutcome, ReimportPolicy, preload};
use record_store::{BulkImporter, Container, ImportConfig, RecordInspector, StoreError};
use tokio::sync::mpsc;

#[tokio::test]
async fn hundred_thousand_records_in_hundred_checkpoints() {
    let container = Container::in_memory();
    let (tx, mut rx) = mpsc::channel::<BatchCommitted>(128);

    let handle = BulkImporter::new(container.clone(), ImportConfig::new(100_000, 1_000))
        .with_progress(tx)
        .spawn();

    let mut checkpoints = 0;
    let mut last_committed = 0;
    while let Some(report) = rx.recv().await {
        checkpoints += 1;
        assert_eq!(report.batch, checkpoints);
        assert_eq!(report.ids.len(), 1_000);
        assert_eq!(report.committed, last_committed + 1_000);
        last_committed = report.committed;
    }

    let stats = handle.wait().await.unwrap();
    assert_eq!(checkpoints, 100);
    assert_eq!(stats.batches, 100);
    assert_eq!(container.new_context().fetch_count().await.unwrap(), 100_000);
}

#[tokio::test]
async fn failure_on_batch_37_keeps_36_batches() {
    let container = Container::in_memory_with_capacity(Some(36_000));

    let err = BulkImporter::new(container.clone(), ImportConfig::new(100_000, 1_000))
        .spawn()
        .wait()
        .await
        .unwrap_err();

    match err {
        ImportError::Checkpoint {
            batch,
            committed,
            source,
        } => {
            assert_eq!(batch, 37);
            assert_eq!(committed, 36_000);
            assert!(matches!(source, StoreError::CapacityExceeded { .. }));
        }
        other => panic!("expected checkpoint failure, got {other:?}"),
    }

    assert_eq!(container.new_context().fetch_count().await.unwrap(), 36_000);
}

#[tokio::test]
async fn totals_that_are_multiples_of_the_batch_size() {
    for (total, batch_size) in [(0, 10), (10, 10), (120, 40), (1_000, 1), (3_000, 250)] {
        let container = Container::in_memory();
        let stats = BulkImporter::new(container.clone(), ImportConfig::new(total, batch_size))
            .run()
            .await
            .unwrap();

        assert_eq!(stats.records, total);
        assert_eq!(stats.batches, total / batch_size);
        assert_eq!(container.new_context().fetch_count().await.unwrap(), total);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_readers_only_see_whole_batches() {
    let container = Container::in_memory();
    let batch_size = 500;
    let handle =
        BulkImporter::new(container.clone(), ImportConfig::new(20_000, batch_size)).spawn();

    let reader = container.new_context();
    let mut last_seen = 0;
    while !handle.is_finished() {
        let count = reader.fetch_count().await.unwrap();
        assert_eq!(count % batch_size, 0, "saw a partial batch: {count}");
        assert!(count >= last_seen, "count went backwards");
        last_seen = count;
        tokio::task::yield_now().await;
    }

    handle.wait().await.unwrap();
    assert_eq!(reader.fetch_count().await.unwrap(), 20_000);
}

#[tokio::test]
async fn committed_ids_resolve_on_another_task() {
    let container = Container::in_memory();
    let inspector = RecordInspector::spawn(container.clone());
    let (tx, mut rx) = mpsc::channel::<BatchCommitted>(4);

    let handle = BulkImporter::new(container.clone(), ImportConfig::new(300, 100))
        .with_progress(tx)
        .spawn();

    while let Some(report) = rx.recv().await {
        let first = report.ids[0];
        let summary = inspector.inspect(first).await.unwrap().expect("committed");
        assert_eq!(summary.title, format!("Movie {}", (report.first_batch - 1) * 100));
    }

    handle.wait().await.unwrap();
}

#[tokio::test]
async fn guarded_preload_runs_once() {
    let container = Container::in_memory();
    let config = ImportConfig::new(1_000, 100);

    let outcome = preload(&container, config.clone(), ReimportPolicy::SkipIfPopulated)
        .await
        .unwrap();
    assert!(matches!(outcome, PreloadOutcome::Imported(_)));

    let outcome = preload(&container, config, ReimportPolicy::SkipIfPopulated)
        .await
        .unwrap();
    assert_eq!(outcome, PreloadOutcome::Skipped { existing: 1_000 });
}
