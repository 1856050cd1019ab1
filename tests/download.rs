//! Download coordinator: streaming, integrity, atomic install, batch
//! partial failure, and cancellation.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use modeldock::cache::ModelCache;
use modeldock::catalog::ModelVersion;
use modeldock::download::{ArtifactStore, DownloadCoordinator, DownloadStatus};
use modeldock::ModelError;

use common::{descriptor, temp_dir, Behavior, MemoryTransport};

fn coordinator(dir: &std::path::Path, transport: Arc<MemoryTransport>) -> DownloadCoordinator {
    DownloadCoordinator::new(transport, ArtifactStore::new(dir.to_path_buf()), 3)
}

#[tokio::test]
async fn successful_download_installs_canonical_artifact() {
    let dir = temp_dir("dl-ok");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 64);
    let bytes: Vec<u8> = (0..64u8).collect();

    let transport = Arc::new(MemoryTransport::new(16));
    transport.insert("det", bytes.clone(), Behavior::Ok);
    let downloads = coordinator(&dir, transport);

    let seen = Arc::new(AtomicU64::new(0));
    let seen_cb = seen.clone();
    let task = downloads
        .download(
            &d,
            Some(Arc::new(move |downloaded, total| {
                assert!(downloaded <= total);
                seen_cb.store(downloaded, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

    assert_eq!(task.status, DownloadStatus::Completed);
    assert_eq!(task.downloaded, 64);
    assert_eq!(task.total_size, 64);
    assert!(task.speed_bps > 0.0);
    assert_eq!(seen.load(Ordering::SeqCst), 64);

    let installed = std::fs::read(dir.join(d.artifact_filename())).unwrap();
    assert_eq!(installed, bytes);
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn failed_download_leaves_no_canonical_artifact() {
    let dir = temp_dir("dl-fail");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 64);

    let transport = Arc::new(MemoryTransport::new(16));
    transport.insert("det", (0..64u8).collect(), Behavior::FailMidStream);
    let downloads = coordinator(&dir, transport);

    let err = downloads.download(&d, None).await.unwrap_err();
    assert!(matches!(err, ModelError::DownloadFailed(_)));

    let task = downloads.latest_task("det").unwrap();
    assert!(matches!(task.status, DownloadStatus::Failed(_)));

    // No canonical artifact, no stray temp files, and load reports NotFound
    // rather than loading a truncated model.
    assert!(!dir.join(d.artifact_filename()).exists());
    assert_no_partials(&dir);
    let cache = ModelCache::new(dir.clone(), 1024);
    assert!(matches!(cache.load(&d).await, Err(ModelError::NotFound(_))));
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn checksum_mismatch_is_a_verification_failure() {
    let dir = temp_dir("dl-sum");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 64);

    let transport = Arc::new(MemoryTransport::new(16));
    transport.insert("det", (0..64u8).collect(), Behavior::BadChecksum);
    let downloads = coordinator(&dir, transport);

    let err = downloads.download(&d, None).await.unwrap_err();
    assert!(matches!(err, ModelError::VerificationFailed(id) if id == "det"));
    assert!(!dir.join(d.artifact_filename()).exists());
    assert_no_partials(&dir);
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn batch_collects_individual_failures() {
    let dir = temp_dir("dl-batch");
    let good1 = descriptor("alpha", ModelVersion::new(1, 0, 0), 32);
    let bad = descriptor("beta", ModelVersion::new(1, 0, 0), 32);
    let good2 = descriptor("gamma", ModelVersion::new(1, 0, 0), 32);

    let transport = Arc::new(MemoryTransport::new(8));
    transport.insert("alpha", vec![1u8; 32], Behavior::Ok);
    transport.insert("beta", vec![2u8; 32], Behavior::FailFetch);
    transport.insert("gamma", vec![3u8; 32], Behavior::Ok);
    let downloads = coordinator(&dir, transport);

    let result = downloads
        .download_many(vec![good1.clone(), bad.clone(), good2.clone()])
        .await
        .unwrap();

    assert_eq!(result.requested, 3);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.failed_ids, vec!["beta".to_string()]);
    assert_eq!(result.downloaded_bytes, 64);

    // Siblings were unaffected by beta's failure.
    assert!(dir.join(good1.artifact_filename()).exists());
    assert!(dir.join(good2.artifact_filename()).exists());
    assert!(!dir.join(bad.artifact_filename()).exists());
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn duplicate_ids_in_a_batch_collapse_into_one_task() {
    let dir = temp_dir("dl-dup");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 32);

    let transport = Arc::new(MemoryTransport::new(8));
    transport.insert("det", vec![5u8; 32], Behavior::Ok);
    let downloads = coordinator(&dir, transport);

    let result = downloads
        .download_many(vec![d.clone(), d.clone(), d.clone()])
        .await
        .unwrap();

    // One model, one task, one cancel flag.
    assert_eq!(result.requested, 1);
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 0);
    assert_eq!(downloads.history().len(), 1);
    assert!(dir.join(d.artifact_filename()).exists());
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let dir = temp_dir("dl-empty");
    let transport = Arc::new(MemoryTransport::new(8));
    let downloads = coordinator(&dir, transport);

    assert!(matches!(
        downloads.download_many(Vec::new()).await,
        Err(ModelError::InvalidInput(_))
    ));
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn cancel_discards_partial_artifact() {
    let dir = temp_dir("dl-cancel");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 64);

    // Many small chunks so cancellation lands mid-transfer.
    let transport = Arc::new(MemoryTransport::new(4));
    transport.insert("det", (0..64u8).collect(), Behavior::Ok);
    let downloads = coordinator(&dir, transport);

    // Cancel from the progress callback after the first chunk arrives.
    let canceller = downloads.clone();
    let err = downloads
        .download(
            &d,
            Some(Arc::new(move |_, _| {
                canceller.cancel("det");
            })),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::Cancelled));
    let task = downloads.latest_task("det").unwrap();
    assert_eq!(task.status, DownloadStatus::Cancelled);
    assert!(task.downloaded < 64);

    assert!(!dir.join(d.artifact_filename()).exists());
    assert_no_partials(&dir);
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn retry_creates_a_fresh_task_and_terminal_tasks_stay_frozen() {
    let dir = temp_dir("dl-retry");
    let d = descriptor("det", ModelVersion::new(1, 0, 0), 32);

    let transport = Arc::new(MemoryTransport::new(8));
    transport.insert("det", vec![9u8; 32], Behavior::FailFetch);
    let downloads = coordinator(&dir, transport.clone());

    downloads.download(&d, None).await.unwrap_err();
    let failed = downloads.latest_task("det").unwrap();

    transport.insert("det", vec![9u8; 32], Behavior::Ok);
    let completed = downloads.download(&d, None).await.unwrap();

    assert_ne!(failed.id, completed.id);
    // The failed task is retained in history, untouched by the retry.
    let frozen = downloads.task(&failed.id).unwrap();
    assert!(matches!(frozen.status, DownloadStatus::Failed(_)));
    assert_eq!(downloads.history().len(), 2);
    std::fs::remove_dir_all(dir).ok();
}

fn assert_no_partials(dir: &std::path::Path) {
    let partials: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(partials.is_empty(), "leftover temp artifacts: {:?}", partials);
}
