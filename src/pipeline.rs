//! Composition root: explicitly constructed, dependency-injected wiring of
//! the catalog, cache, download, update, and inference components.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::ModelCache;
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::config::Settings;
use crate::download::{
    ArtifactStore, BatchDownloadResult, BlobTransport, DownloadCoordinator, DownloadTask,
    ProgressFn,
};
use crate::error::{ModelError, Result};
use crate::infer::{
    CancelToken, ComputeOptimizer, ImageFrame, InferenceBackend, InferenceOrchestrator,
    PlatformCapabilities, PostprocessConfig, Prediction,
};
use crate::update::{CatalogProvider, UpdateCoordinator};

/// The assembled model pipeline.
///
/// Owns all subsystem state; collaborators (transport, catalog feed,
/// inference backend, platform probe) are injected once at construction.
/// There are no ambient singletons; embedders hold the pipeline and pass
/// it where needed.
pub struct ModelPipeline {
    settings: Settings,
    catalog: Arc<ModelCatalog>,
    cache: Arc<ModelCache>,
    provider: Arc<dyn CatalogProvider>,
    downloads: DownloadCoordinator,
    updates: UpdateCoordinator,
    orchestrator: InferenceOrchestrator,
}

impl ModelPipeline {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn BlobTransport>,
        provider: Arc<dyn CatalogProvider>,
        backend: Arc<dyn InferenceBackend>,
        platform: Arc<dyn PlatformCapabilities>,
    ) -> Result<Self> {
        let models_dir = settings.models.directory.clone();

        let store = ArtifactStore::new(models_dir.clone());
        store.ensure_dir()?;

        let catalog = Arc::new(ModelCatalog::new(models_dir.clone()));
        catalog.load_or_create_registry()?;
        catalog.sync_artifacts()?;

        let cache = Arc::new(ModelCache::new(models_dir, settings.cache.budget_bytes));

        let downloads = DownloadCoordinator::new(
            transport,
            store.clone(),
            settings.download.max_parallel,
        );

        let optimizer = Arc::new(ComputeOptimizer::new(platform));
        let post = PostprocessConfig {
            confidence_threshold: settings.inference.confidence_threshold,
            iou_threshold: settings.inference.iou_threshold,
            top_k: settings.inference.top_k,
        };
        let orchestrator = InferenceOrchestrator::new(
            cache.clone(),
            catalog.clone(),
            backend,
            optimizer,
            post,
            settings.inference.workers,
        );

        let updates = UpdateCoordinator::new(
            catalog.clone(),
            provider.clone(),
            downloads.clone(),
            cache.clone(),
            store,
            settings.download.max_parallel,
        );

        info!(
            "Model pipeline ready: {} registered models, {} byte cache budget",
            catalog.all().len(),
            settings.cache.budget_bytes
        );

        Ok(Self {
            settings,
            catalog,
            cache,
            provider,
            downloads,
            updates,
            orchestrator,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    pub fn updates(&self) -> &UpdateCoordinator {
        &self.updates
    }

    pub fn orchestrator(&self) -> &InferenceOrchestrator {
        &self.orchestrator
    }

    /// Registers a descriptor from an external catalog feed.
    pub fn register_model(&self, descriptor: ModelDescriptor) -> Result<()> {
        self.catalog.register(descriptor)
    }

    /// Runs inference, downloading the model first if it has no local
    /// artifact yet.
    pub async fn infer(&self, frame: &ImageFrame, model_id: &str) -> Result<Vec<Prediction>> {
        match self.orchestrator.infer(frame, model_id).await {
            Err(ModelError::NotFound(_)) => {
                debug!("Model '{}' not local; driving download path", model_id);
                self.ensure_local(model_id).await?;
                self.orchestrator.infer(frame, model_id).await
            }
            other => other,
        }
    }

    /// Batch inference over frames, downloading the model first if needed.
    pub async fn infer_batch(
        &self,
        frames: Vec<ImageFrame>,
        model_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Result<Vec<Prediction>>>> {
        self.ensure_local(model_id).await?;
        self.orchestrator.infer_batch(frames, model_id, cancel).await
    }

    /// Downloads one model by id, registering its descriptor on success.
    pub async fn download(
        &self,
        model_id: &str,
        progress: Option<ProgressFn>,
    ) -> Result<DownloadTask> {
        let descriptor = self.resolve_descriptor(model_id).await?;
        let task = self.downloads.download(&descriptor, progress).await?;
        if !self.catalog.contains(model_id) {
            self.catalog.register(descriptor)?;
        }
        Ok(task)
    }

    /// Downloads several models by id with bounded concurrency. Duplicate
    /// ids collapse into one download; ids that cannot be resolved against
    /// the catalog feed count as failures in the result alongside transfer
    /// failures.
    pub async fn download_many(&self, model_ids: &[String]) -> Result<BatchDownloadResult> {
        if model_ids.is_empty() {
            return Err(ModelError::InvalidInput(
                "download_many requires at least one model id".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut descriptors = Vec::new();
        let mut unresolved = Vec::new();
        for id in model_ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.resolve_descriptor(id).await {
                Ok(d) => descriptors.push(d),
                Err(_) => unresolved.push(id.clone()),
            }
        }

        let mut result = if descriptors.is_empty() {
            BatchDownloadResult {
                requested: 0,
                success_count: 0,
                failure_count: 0,
                failed_ids: Vec::new(),
                total_bytes: 0,
                downloaded_bytes: 0,
            }
        } else {
            self.downloads.download_many(descriptors.clone()).await?
        };

        for descriptor in descriptors {
            let succeeded = !result.failed_ids.contains(&descriptor.id);
            if succeeded && !self.catalog.contains(&descriptor.id) {
                self.catalog.register(descriptor)?;
            }
        }

        result.requested = seen.len();
        result.failure_count += unresolved.len();
        result.failed_ids.extend(unresolved);
        Ok(result)
    }

    /// Cancels the in-flight download attempt for a model, if any.
    pub fn cancel_download(&self, model_id: &str) -> bool {
        self.downloads.cancel(model_id)
    }

    /// Makes sure the model's canonical artifact exists locally,
    /// downloading it when absent.
    pub async fn ensure_local(&self, model_id: &str) -> Result<ModelDescriptor> {
        let descriptor = self.resolve_descriptor(model_id).await?;
        let path = self.catalog.artifact_path(&descriptor);
        if !path.exists() {
            self.downloads.download(&descriptor, None).await?;
        }
        if !self.catalog.contains(model_id) {
            self.catalog.register(descriptor.clone())?;
        }
        Ok(descriptor)
    }

    /// Looks up a descriptor locally first, then in the catalog feed.
    async fn resolve_descriptor(&self, model_id: &str) -> Result<ModelDescriptor> {
        if let Some(descriptor) = self.catalog.descriptor(model_id) {
            return Ok(descriptor);
        }
        let entry = self
            .provider
            .latest(model_id)
            .await
            .map_err(|e| ModelError::DownloadFailed(format!("catalog: {}", e)))?;
        entry
            .map(|e| e.descriptor)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))
    }
}
