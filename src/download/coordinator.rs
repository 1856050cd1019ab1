use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::ModelDescriptor;
use crate::download::{ArtifactStore, BlobTransport};
use crate::error::{ModelError, Result};

/// Lifecycle of a download task.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; a task is never
/// mutated after reaching one of them, and a retry creates a new task.
/// `Paused` is part of the task vocabulary for callers that suspend the
/// transport; the coordinator itself never pauses a transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed(String),
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed(_) | DownloadStatus::Cancelled
        )
    }
}

/// One download attempt for one model.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub id: String,
    pub model_id: String,
    pub total_size: u64,
    pub downloaded: u64,
    pub status: DownloadStatus,
    /// Average bytes per second since the transfer started, updated at
    /// chunk granularity.
    pub speed_bps: f64,
    pub started_at: DateTime<Utc>,
}

/// Progress observer: receives `(downloaded, total)` after each chunk.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Outcome of a `download_many` batch.
///
/// Byte totals are aggregated only over tasks that were actually
/// dispatched, so a batch with many still-queued items never overstates
/// completion; `requested` carries the full requested count for callers
/// that want whole-set progress.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDownloadResult {
    pub requested: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failed_ids: Vec<String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
}

impl BatchDownloadResult {
    /// Fraction of dispatched bytes downloaded, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.downloaded_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Streams model bytes from the transport to local storage with bounded
/// batch concurrency, integrity verification, and atomic installation.
///
/// A transfer writes to a temp path and only renames to the canonical path
/// after size and checksum verification, so a failed or cancelled transfer
/// leaves no canonical artifact and a later `load` correctly reports
/// `NotFound`.
#[derive(Clone)]
pub struct DownloadCoordinator {
    transport: Arc<dyn BlobTransport>,
    store: ArtifactStore,
    max_parallel: usize,
    /// Task history by task id; terminal tasks are retained for queries.
    tasks: Arc<RwLock<HashMap<String, DownloadTask>>>,
    /// Most recent task id per model id.
    latest_by_model: Arc<RwLock<HashMap<String, String>>>,
    /// Cancel flag of the current attempt per model id.
    cancels: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
}

impl DownloadCoordinator {
    pub fn new(transport: Arc<dyn BlobTransport>, store: ArtifactStore, max_parallel: usize) -> Self {
        Self {
            transport,
            store,
            max_parallel: max_parallel.max(1),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            latest_by_model: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Downloads one model artifact, reporting progress per chunk.
    ///
    /// On success the canonical artifact is in place and the completed task
    /// is returned. Transport errors surface as `DownloadFailed`, integrity
    /// mismatches as `VerificationFailed`, cancellation as `Cancelled`; in
    /// every failure case the temp artifact is discarded.
    pub async fn download(
        &self,
        descriptor: &ModelDescriptor,
        progress: Option<ProgressFn>,
    ) -> Result<DownloadTask> {
        let (task_id, cancel) = self.register_task(&descriptor.id);
        self.run_transfer(descriptor.clone(), task_id, cancel, progress)
            .await
    }

    /// Downloads several models concurrently, at most `max_parallel` at a
    /// time. Each individual failure lands in `failed_ids`; siblings are
    /// unaffected. Duplicate model ids in the batch collapse into a single
    /// task, keeping `cancel` unambiguous per model.
    pub async fn download_many(
        &self,
        mut descriptors: Vec<ModelDescriptor>,
    ) -> Result<BatchDownloadResult> {
        if descriptors.is_empty() {
            return Err(ModelError::InvalidInput(
                "download_many requires at least one model".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        descriptors.retain(|d| seen.insert(d.id.clone()));

        let requested = descriptors.len();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        // Register every task up front so cancel() works while an item is
        // still queued behind the semaphore.
        let mut scheduled = Vec::with_capacity(requested);
        for descriptor in descriptors {
            let (task_id, cancel) = self.register_task(&descriptor.id);
            scheduled.push((descriptor, task_id, cancel));
        }

        let mut handles = Vec::with_capacity(requested);
        for (descriptor, task_id, cancel) in scheduled {
            let coordinator = self.clone();
            let semaphore = semaphore.clone();
            let tid = task_id.clone();
            handles.push((descriptor.id.clone(), tid.clone(), tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
                if cancel.load(Ordering::SeqCst) {
                    coordinator.update_task(&task_id, |t| t.status = DownloadStatus::Cancelled);
                    return Err(ModelError::Cancelled);
                }
                coordinator
                    .run_transfer(descriptor, task_id, cancel, None)
                    .await
            })));
        }

        let mut result = BatchDownloadResult {
            requested,
            success_count: 0,
            failure_count: 0,
            failed_ids: Vec::new(),
            total_bytes: 0,
            downloaded_bytes: 0,
        };

        for (model_id, task_id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => result.success_count += 1,
                Ok(Err(e)) => {
                    debug!("Batch download of '{}' failed: {}", model_id, e);
                    result.failure_count += 1;
                    result.failed_ids.push(model_id);
                }
                Err(e) => {
                    warn!("Batch download task for '{}' panicked: {}", model_id, e);
                    result.failure_count += 1;
                    result.failed_ids.push(model_id);
                }
            }
            if let Some(task) = self.task(&task_id) {
                result.total_bytes += task.total_size;
                result.downloaded_bytes += task.downloaded;
            }
        }

        info!(
            "Batch download finished: {}/{} succeeded, {} bytes of {}",
            result.success_count, result.requested, result.downloaded_bytes, result.total_bytes
        );
        Ok(result)
    }

    /// Cancels the current download attempt for a model. The in-flight
    /// transfer notices at the next chunk boundary and discards its temp
    /// artifact. Returns false if no attempt is tracked for the model.
    pub fn cancel(&self, model_id: &str) -> bool {
        match self.cancels.read().get(model_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("Cancellation requested for model '{}'", model_id);
                true
            }
            None => false,
        }
    }

    /// Task snapshot by task id.
    pub fn task(&self, task_id: &str) -> Option<DownloadTask> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Most recent task snapshot for a model id.
    pub fn latest_task(&self, model_id: &str) -> Option<DownloadTask> {
        let task_id = self.latest_by_model.read().get(model_id).cloned()?;
        self.task(&task_id)
    }

    /// All tasks, newest first.
    pub fn history(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
    }

    fn register_task(&self, model_id: &str) -> (String, Arc<AtomicBool>) {
        let task_id = Uuid::new_v4().to_string();
        let task = DownloadTask {
            id: task_id.clone(),
            model_id: model_id.to_string(),
            total_size: 0,
            downloaded: 0,
            status: DownloadStatus::Pending,
            speed_bps: 0.0,
            started_at: Utc::now(),
        };
        self.tasks.write().insert(task_id.clone(), task);
        self.latest_by_model
            .write()
            .insert(model_id.to_string(), task_id.clone());

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels
            .write()
            .insert(model_id.to_string(), cancel.clone());
        (task_id, cancel)
    }

    /// Applies a mutation unless the task is already terminal.
    fn update_task(&self, task_id: &str, f: impl FnOnce(&mut DownloadTask)) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.get_mut(task_id) {
            if !task.status.is_terminal() {
                f(task);
            }
        }
    }

    async fn run_transfer(
        &self,
        descriptor: ModelDescriptor,
        task_id: String,
        cancel: Arc<AtomicBool>,
        progress: Option<ProgressFn>,
    ) -> Result<DownloadTask> {
        let model_id = descriptor.id.clone();

        let fetched = match self.transport.fetch(&model_id).await {
            Ok(f) => f,
            Err(e) => {
                let reason = format!("transport: {}", e);
                self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
                return Err(ModelError::DownloadFailed(reason));
            }
        };

        let total = fetched.total_size;
        self.update_task(&task_id, |t| {
            t.total_size = total;
            t.status = DownloadStatus::Downloading;
        });

        if cancel.load(Ordering::SeqCst) {
            self.update_task(&task_id, |t| t.status = DownloadStatus::Cancelled);
            return Err(ModelError::Cancelled);
        }

        let temp = self.store.temp_path(&model_id);
        let mut file = match tokio::fs::File::create(&temp).await {
            Ok(f) => f,
            Err(e) => {
                let reason = format!("temp file: {}", e);
                self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
                return Err(ModelError::DownloadFailed(reason));
            }
        };

        let mut stream = fetched.stream;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let started = Instant::now();

        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                drop(file);
                self.store.discard(&temp).await;
                self.update_task(&task_id, |t| t.status = DownloadStatus::Cancelled);
                info!("Download of '{}' cancelled after {} bytes", model_id, downloaded);
                return Err(ModelError::Cancelled);
            }

            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    drop(file);
                    self.store.discard(&temp).await;
                    let reason = format!("stream: {}", e);
                    self.update_task(&task_id, |t| {
                        t.status = DownloadStatus::Failed(reason.clone())
                    });
                    return Err(ModelError::DownloadFailed(reason));
                }
            };

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                self.store.discard(&temp).await;
                let reason = format!("write: {}", e);
                self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
                return Err(ModelError::DownloadFailed(reason));
            }

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            // Speed and progress are updated once per chunk, never per byte.
            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            self.update_task(&task_id, |t| {
                t.downloaded = downloaded;
                t.speed_bps = speed;
            });
            if let Some(cb) = &progress {
                cb(downloaded, total);
            }
        }

        if let Err(e) = file.flush().await {
            self.store.discard(&temp).await;
            let reason = format!("flush: {}", e);
            self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
            return Err(ModelError::DownloadFailed(reason));
        }
        drop(file);

        if total > 0 && downloaded != total {
            self.store.discard(&temp).await;
            let reason = format!("size mismatch: expected {} bytes, got {}", total, downloaded);
            self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
            return Err(ModelError::VerificationFailed(model_id));
        }

        if !fetched.checksum.is_empty() {
            let digest = hasher
                .finalize()
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>();
            if digest != fetched.checksum {
                self.store.discard(&temp).await;
                let reason = "checksum mismatch".to_string();
                self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
                return Err(ModelError::VerificationFailed(model_id));
            }
        }

        let canonical = self.store.canonical_path(&descriptor);
        if let Err(e) = self.store.promote(&temp, &canonical).await {
            self.store.discard(&temp).await;
            let reason = format!("install: {}", e);
            self.update_task(&task_id, |t| t.status = DownloadStatus::Failed(reason.clone()));
            return Err(ModelError::DownloadFailed(reason));
        }

        self.update_task(&task_id, |t| t.status = DownloadStatus::Completed);
        info!(
            "Downloaded model '{}' ({} bytes) to {}",
            model_id,
            downloaded,
            canonical.display()
        );

        // The task is terminal now, so the snapshot is stable.
        self.task(&task_id)
            .ok_or_else(|| ModelError::DownloadFailed(format!("task record lost for '{}'", model_id)))
    }
}
