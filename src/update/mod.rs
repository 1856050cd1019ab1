//! Model updates: catalog comparison and atomic swap-then-delete installs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::{ModelArtifact, ModelCache};
use crate::catalog::{ModelCatalog, ModelDescriptor, ModelVersion};
use crate::download::{ArtifactStore, DownloadCoordinator};
use crate::error::{ModelError, Result};

/// One entry of the remote catalog feed: the latest descriptor for a model
/// plus release metadata.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: ModelDescriptor,
    pub release_date: DateTime<Utc>,
    pub change_notes: String,
    pub is_security_update: bool,
}

/// Read side of the backend catalog: the latest known descriptor per model.
/// The wire format behind this is the provider's concern.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn latest(&self, model_id: &str) -> anyhow::Result<Option<CatalogEntry>>;
}

/// An available update, derived by comparing the catalog feed against the
/// locally registered descriptor. Recomputed on demand, never persisted.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub model_id: String,
    pub current_version: ModelVersion,
    pub new_version: ModelVersion,
    pub release_date: DateTime<Utc>,
    pub change_notes: String,
    pub byte_size: u64,
    pub is_security_update: bool,
    /// Descriptor of the new version, used to drive the install.
    pub descriptor: ModelDescriptor,
}

/// Outcome of `install_all`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateInstallationResult {
    pub attempted: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub updated_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

/// Compares registered models against the catalog feed and installs new
/// versions with rollback safety: the old artifact is deleted only after
/// the new one is downloaded, verified, and registered.
#[derive(Clone)]
pub struct UpdateCoordinator {
    catalog: Arc<ModelCatalog>,
    provider: Arc<dyn CatalogProvider>,
    downloads: DownloadCoordinator,
    cache: Arc<ModelCache>,
    store: ArtifactStore,
    max_parallel: usize,
}

impl UpdateCoordinator {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        provider: Arc<dyn CatalogProvider>,
        downloads: DownloadCoordinator,
        cache: Arc<ModelCache>,
        store: ArtifactStore,
        max_parallel: usize,
    ) -> Self {
        Self {
            catalog,
            provider,
            downloads,
            cache,
            store,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Returns the available update for a model, or `None` when the local
    /// version is current or newer.
    pub async fn check_for_update(&self, model_id: &str) -> Result<Option<UpdateInfo>> {
        let local = self
            .catalog
            .descriptor(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        let entry = self
            .provider
            .latest(model_id)
            .await
            .map_err(|e| ModelError::DownloadFailed(format!("catalog: {}", e)))?;

        Ok(entry.and_then(|entry| {
            if entry.descriptor.version > local.version {
                Some(UpdateInfo {
                    model_id: model_id.to_string(),
                    current_version: local.version,
                    new_version: entry.descriptor.version,
                    release_date: entry.release_date,
                    change_notes: entry.change_notes,
                    byte_size: entry.descriptor.byte_size,
                    is_security_update: entry.is_security_update,
                    descriptor: entry.descriptor,
                })
            } else {
                None
            }
        }))
    }

    /// Checks every registered model. Per-model catalog failures are logged
    /// and skipped so one flaky feed entry cannot hide the rest.
    pub async fn check_all_updates(&self) -> Result<Vec<UpdateInfo>> {
        let mut updates = Vec::new();
        for descriptor in self.catalog.all() {
            match self.check_for_update(&descriptor.id).await {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e) => warn!("Update check for '{}' failed: {}", descriptor.id, e),
            }
        }
        Ok(updates)
    }

    /// Installs an update atomically.
    ///
    /// Downloads the new artifact under its versioned name, verifies it is
    /// loadable, swaps the registered descriptor, and only then deletes the
    /// old artifact. If verification fails the old descriptor and artifact
    /// remain fully active and `VerificationFailed` is returned.
    pub async fn install(&self, update: &UpdateInfo) -> Result<ModelDescriptor> {
        let old = self
            .catalog
            .descriptor(&update.model_id)
            .ok_or_else(|| ModelError::NotFound(update.model_id.clone()))?;

        info!(
            "Installing update for '{}': {} -> {}",
            update.model_id, update.current_version, update.new_version
        );

        self.downloads.download(&update.descriptor, None).await?;

        let new_path = self.store.canonical_path(&update.descriptor);
        let declared = update.descriptor.byte_size;
        let verify_path = new_path.clone();
        let verified = tokio::task::spawn_blocking(move || {
            let artifact = ModelArtifact::open(&verify_path)?;
            if declared > 0 && artifact.len() != declared {
                return Err(ModelError::VerificationFailed(String::new()));
            }
            Ok(())
        })
        .await
        .map_err(|e| ModelError::LoadFailed(format!("verify task: {}", e)))?;

        if verified.is_err() {
            // Roll back: drop the new artifact, leave the old mapping alone.
            self.store.remove(&new_path).await.ok();
            warn!(
                "Update verification failed for '{}'; keeping version {}",
                update.model_id, old.version
            );
            return Err(ModelError::VerificationFailed(update.model_id.clone()));
        }

        self.catalog.register(update.descriptor.clone())?;

        // Drop the stale cache entry so the next load sees the new version.
        // A pinned entry stays resident until its handles are released.
        match self.cache.unload(&update.model_id) {
            Ok(()) => {}
            Err(ModelError::InUse(_)) => {
                debug!(
                    "Model '{}' still referenced; old version stays resident until released",
                    update.model_id
                );
            }
            Err(e) => return Err(e),
        }

        let old_path = self.store.canonical_path(&old);
        if old_path != new_path {
            if let Err(e) = self.store.remove(&old_path).await {
                warn!(
                    "Failed to delete old artifact {}: {}",
                    old_path.display(),
                    e
                );
            }
        }

        info!(
            "Model '{}' updated to {}",
            update.model_id, update.new_version
        );
        Ok(update.descriptor.clone())
    }

    /// Checks and installs all available updates with bounded concurrency.
    /// Individual failures are collected, not propagated.
    pub async fn install_all(&self) -> Result<UpdateInstallationResult> {
        let updates = self.check_all_updates().await?;
        let attempted = updates.len();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(attempted);
        for update in updates {
            let coordinator = self.clone();
            let semaphore = semaphore.clone();
            let model_id = update.model_id.clone();
            handles.push((
                model_id,
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
                    coordinator.install(&update).await
                }),
            ));
        }

        let mut result = UpdateInstallationResult {
            attempted,
            success_count: 0,
            failure_count: 0,
            updated_ids: Vec::new(),
            failed_ids: Vec::new(),
        };

        for (model_id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => {
                    result.success_count += 1;
                    result.updated_ids.push(model_id);
                }
                Ok(Err(e)) => {
                    warn!("Update install for '{}' failed: {}", model_id, e);
                    result.failure_count += 1;
                    result.failed_ids.push(model_id);
                }
                Err(e) => {
                    warn!("Update install task for '{}' panicked: {}", model_id, e);
                    result.failure_count += 1;
                    result.failed_ids.push(model_id);
                }
            }
        }

        info!(
            "Update run finished: {}/{} installed",
            result.success_count, result.attempted
        );
        Ok(result)
    }
}
