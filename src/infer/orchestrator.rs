use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cache::{ModelArtifact, ModelCache};
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::error::{ModelError, Result};
use crate::infer::postprocess::{self, PostprocessConfig, Prediction};
use crate::infer::{ComputeBackend, ComputeOptimizer, ImageFrame};

/// Executes a loaded model against one frame.
///
/// Runs on a blocking thread; implementations are synchronous compute.
/// Raw predictions come back unranked and unfiltered; the orchestrator
/// owns postprocessing.
pub trait InferenceBackend: Send + Sync {
    fn run(
        &self,
        artifact: &ModelArtifact,
        frame: &ImageFrame,
        units: ComputeBackend,
    ) -> anyhow::Result<Vec<Prediction>>;
}

/// Cancels an outstanding batch as a unit.
///
/// Cancelling stops scheduling new items; in-flight items run to completion
/// and report their outcome. A dispatched single inference is never aborted
/// mid-run.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progression of one inference call, traced for observability.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Requested,
    ModelResolving,
    Loaded,
    LoadFailed,
    Inferring,
    Succeeded,
    Failed,
}

fn trace_phase(model_id: &str, phase: Phase) {
    debug!("infer '{}': {:?}", model_id, phase);
}

/// Runs single and batch inference: resolves a cache handle, executes the
/// backend on a blocking thread, records latency, and postprocesses raw
/// predictions into ranked, filtered results.
#[derive(Clone)]
pub struct InferenceOrchestrator {
    cache: Arc<ModelCache>,
    catalog: Arc<ModelCatalog>,
    backend: Arc<dyn InferenceBackend>,
    optimizer: Arc<ComputeOptimizer>,
    post: PostprocessConfig,
    workers: usize,
}

impl InferenceOrchestrator {
    pub fn new(
        cache: Arc<ModelCache>,
        catalog: Arc<ModelCatalog>,
        backend: Arc<dyn InferenceBackend>,
        optimizer: Arc<ComputeOptimizer>,
        post: PostprocessConfig,
        workers: usize,
    ) -> Self {
        Self {
            cache,
            catalog,
            backend,
            optimizer,
            post,
            workers: workers.max(1),
        }
    }

    pub fn optimizer(&self) -> &Arc<ComputeOptimizer> {
        &self.optimizer
    }

    /// Runs one inference call end to end.
    ///
    /// Fails with `NotFound` when the model has no local artifact; the
    /// caller drives the download path and retries.
    pub async fn infer(&self, frame: &ImageFrame, model_id: &str) -> Result<Vec<Prediction>> {
        trace_phase(model_id, Phase::Requested);
        let descriptor = self.resolve(model_id)?;
        self.infer_resolved(&descriptor, frame.clone()).await
    }

    /// Runs inference over a batch of frames with bounded concurrency.
    ///
    /// The result vector corresponds one-to-one with the input order
    /// regardless of completion order, and a single item's failure never
    /// aborts its siblings. Items not yet scheduled when `cancel` fires
    /// report `Err(Cancelled)` at their index.
    pub async fn infer_batch(
        &self,
        frames: Vec<ImageFrame>,
        model_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Result<Vec<Prediction>>>> {
        if frames.is_empty() {
            return Err(ModelError::InvalidInput(
                "infer_batch requires at least one frame".to_string(),
            ));
        }

        let descriptor = self.resolve(model_id)?;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let total = frames.len();

        let mut handles = Vec::with_capacity(total);
        for frame in frames {
            let orchestrator = self.clone();
            let descriptor = descriptor.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ModelError::InferenceFailed(e.to_string()))?;
                if cancel.is_cancelled() {
                    return Err(ModelError::Cancelled);
                }
                orchestrator.infer_resolved(&descriptor, frame).await
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(Err(ModelError::InferenceFailed(format!(
                    "inference task panicked: {}",
                    e
                )))),
            }
        }

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(
            "Batch inference on '{}' finished: {}/{} items succeeded",
            model_id, succeeded, total
        );
        Ok(results)
    }

    fn resolve(&self, model_id: &str) -> Result<ModelDescriptor> {
        trace_phase(model_id, Phase::ModelResolving);
        self.catalog
            .descriptor(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))
    }

    /// Loads a handle, runs the backend, records latency, postprocesses.
    /// The handle stays live for the duration of the call, pinning the
    /// cache entry against eviction.
    async fn infer_resolved(
        &self,
        descriptor: &ModelDescriptor,
        frame: ImageFrame,
    ) -> Result<Vec<Prediction>> {
        let handle = match self.cache.load(descriptor).await {
            Ok(h) => {
                trace_phase(&descriptor.id, Phase::Loaded);
                h
            }
            Err(e) => {
                trace_phase(&descriptor.id, Phase::LoadFailed);
                return Err(e);
            }
        };

        let units = self.optimizer.optimal_compute_units(descriptor);
        trace_phase(&descriptor.id, Phase::Inferring);

        let backend = self.backend.clone();
        let artifact = handle.artifact().clone();
        let started = Instant::now();
        let raw = tokio::task::spawn_blocking(move || backend.run(&artifact, &frame, units))
            .await
            .map_err(|e| ModelError::InferenceFailed(format!("inference task: {}", e)))?;

        let raw = match raw {
            Ok(r) => r,
            Err(e) => {
                trace_phase(&descriptor.id, Phase::Failed);
                return Err(ModelError::InferenceFailed(e.to_string()));
            }
        };

        self.optimizer
            .record_inference(started.elapsed(), &descriptor.model_type);
        trace_phase(&descriptor.id, Phase::Succeeded);

        Ok(postprocess::run(raw, &self.post))
    }
}
