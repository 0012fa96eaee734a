use assert_matches::assert_matches;
use tempfile::TempDir;

use sdapi_core::job::{JobStatus, JobType, ProgressEvent};
use sdapi_db::repositories::JobRecordRepo;
use sdapi_db::{DbPool, StoreError};

const T2I: JobType = JobType::TextToImage;

/// Fresh migrated store in a temp directory. Keep the `TempDir` alive for
/// the duration of the test.
async fn store() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = sdapi_db::create_pool(&dir.path().join(".database")).await.unwrap();
    sdapi_db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

#[tokio::test]
async fn test_bootstrap() {
    let (_dir, pool) = store().await;
    sdapi_db::health_check(&pool).await.unwrap();
    // Migrations are idempotent.
    sdapi_db::run_migrations(&pool).await.unwrap();
}

#[tokio::test]
async fn test_create_and_get() {
    let (_dir, pool) = store().await;

    let created = JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(created.result_endpoint, "text-to-image/abc");
    assert!(created.images.is_empty());

    let fetched = JobRecordRepo::get(&pool, T2I, "abc").await.unwrap();
    assert_eq!(fetched, Some(created));
    assert_eq!(JobRecordRepo::get(&pool, T2I, "missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_create_twice_fails() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();

    let err = JobRecordRepo::create(&pool, T2I, "abc").await.unwrap_err();
    assert_matches!(err, StoreError::AlreadyExists { key } if key == "text-to-image/abc");

    // Same id under another type is a different job.
    JobRecordRepo::create(&pool, JobType::InpaintImage, "abc").await.unwrap();
}

#[tokio::test]
async fn test_first_progress_allocates_images() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();

    let record = JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(1, 0.0, 3))
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::InProgress);
    let urls: Vec<_> = record.images.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["text-to-image/abc/1.png", "text-to-image/abc/2.png", "text-to-image/abc/3.png"]
    );

    // A later event claiming a different total does not resize the list.
    let record = JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(2, 0.5, 5))
        .await
        .unwrap();
    assert_eq!(record.images.len(), 3);
    assert_eq!(record.images[1].progress, 0.5);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();

    for progress in [0.0, 0.6, 0.3, 1.0, 0.2] {
        JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(1, progress, 1))
            .await
            .unwrap();
    }
    let record = JobRecordRepo::get(&pool, T2I, "abc").await.unwrap().unwrap();
    assert_eq!(record.images[0].progress, 1.0);
}

#[tokio::test]
async fn test_progress_outside_image_list_is_rejected() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();
    JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(1, 0.0, 2))
        .await
        .unwrap();

    let err = JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(3, 0.5, 2))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::InvalidProgress { index: 3, total: 2, .. });

    // The failed update was rolled back.
    let record = JobRecordRepo::get(&pool, T2I, "abc").await.unwrap().unwrap();
    assert!(record.images.iter().all(|i| i.progress == 0.0));
}

#[tokio::test]
async fn test_advance_missing_record() {
    let (_dir, pool) = store().await;

    let err = JobRecordRepo::advance_to_in_progress(&pool, T2I, "nope", &ProgressEvent::new(1, 0.0, 1))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::NotFound { .. });

    let err = JobRecordRepo::advance_to_complete(&pool, T2I, "nope").await.unwrap_err();
    assert_matches!(err, StoreError::NotFound { .. });
}

#[tokio::test]
async fn test_transitions_only_move_forward() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();

    let err = JobRecordRepo::advance_to_complete(&pool, T2I, "abc").await.unwrap_err();
    assert_matches!(
        err,
        StoreError::InvalidTransition { from: JobStatus::Queued, to: JobStatus::Complete, .. }
    );

    JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(1, 1.0, 1))
        .await
        .unwrap();
    let record = JobRecordRepo::advance_to_complete(&pool, T2I, "abc").await.unwrap();
    assert_eq!(record.status, JobStatus::Complete);

    let err = JobRecordRepo::advance_to_complete(&pool, T2I, "abc").await.unwrap_err();
    assert_matches!(
        err,
        StoreError::InvalidTransition { from: JobStatus::Complete, to: JobStatus::Complete, .. }
    );

    let err = JobRecordRepo::advance_to_in_progress(&pool, T2I, "abc", &ProgressEvent::new(1, 1.0, 1))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::InvalidTransition { from: JobStatus::Complete, .. });
}

#[tokio::test]
async fn test_delete_all_incomplete_keeps_complete() {
    let (_dir, pool) = store().await;

    JobRecordRepo::create(&pool, T2I, "queued").await.unwrap();
    JobRecordRepo::create(&pool, T2I, "running").await.unwrap();
    JobRecordRepo::advance_to_in_progress(&pool, T2I, "running", &ProgressEvent::new(1, 0.4, 1))
        .await
        .unwrap();
    JobRecordRepo::create(&pool, JobType::ImageToImage, "done").await.unwrap();
    JobRecordRepo::advance_to_in_progress(&pool, JobType::ImageToImage, "done", &ProgressEvent::new(1, 1.0, 1))
        .await
        .unwrap();
    JobRecordRepo::advance_to_complete(&pool, JobType::ImageToImage, "done").await.unwrap();

    let deleted = JobRecordRepo::delete_all_incomplete(&pool).await.unwrap();
    assert_eq!(deleted, 2);

    assert_eq!(JobRecordRepo::get(&pool, T2I, "queued").await.unwrap(), None);
    assert_eq!(JobRecordRepo::get(&pool, T2I, "running").await.unwrap(), None);
    let done = JobRecordRepo::get(&pool, JobType::ImageToImage, "done").await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Complete);

    let counts = JobRecordRepo::count_by_status(&pool).await.unwrap();
    assert_eq!(counts, vec![("COMPLETE".to_string(), 1)]);

    // A recovered id can be submitted again.
    JobRecordRepo::create(&pool, T2I, "running").await.unwrap();
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join(".database");
    {
        let pool = sdapi_db::create_pool(&db_dir).await.unwrap();
        sdapi_db::run_migrations(&pool).await.unwrap();
        JobRecordRepo::create(&pool, T2I, "abc").await.unwrap();
        pool.close().await;
    }

    let pool = sdapi_db::create_pool(&db_dir).await.unwrap();
    sdapi_db::run_migrations(&pool).await.unwrap();
    let record = JobRecordRepo::get(&pool, T2I, "abc").await.unwrap();
    assert_eq!(record.map(|r| r.status), Some(JobStatus::Queued));
}

#[tokio::test]
async fn test_concurrent_updates_to_different_keys() {
    let (_dir, pool) = store().await;
    let ids: Vec<String> = (0..8).map(|i| format!("job{i}")).collect();
    for id in &ids {
        JobRecordRepo::create(&pool, T2I, id).await.unwrap();
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            for step in 0..=10 {
                let event = ProgressEvent::new(1, f64::from(step) / 10.0, 1);
                JobRecordRepo::advance_to_in_progress(&pool, T2I, &id, &event).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in &ids {
        let record = JobRecordRepo::get(&pool, T2I, id).await.unwrap().unwrap();
        assert_eq!(record.images[0].progress, 1.0);
    }
}

#[tokio::test]
async fn test_abandoned_update_releases_write_lock() {
    let (_dir, pool) = store().await;
    JobRecordRepo::create(&pool, T2I, "abandoned").await.unwrap();
    JobRecordRepo::create(&pool, T2I, "next").await.unwrap();

    // Drop updates at varying points, some of them inside the transaction.
    for step in 0..20u64 {
        let event = ProgressEvent::new(1, 0.5, 1);
        let update = JobRecordRepo::advance_to_in_progress(&pool, T2I, "abandoned", &event);
        let _ = tokio::time::timeout(std::time::Duration::from_micros(step * 50), update).await;
    }

    let updated = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        JobRecordRepo::advance_to_in_progress(&pool, T2I, "next", &ProgressEvent::new(1, 1.0, 1)),
    )
    .await
    .expect("no connection is left holding the write lock")
    .unwrap();
    assert_eq!(updated.status, JobStatus::InProgress);
}
