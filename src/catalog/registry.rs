use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ModelDescriptor;
use crate::error::{ModelError, Result};

/// Name of the JSON registry file kept next to the model artifacts.
pub const REGISTRY_FILENAME: &str = "model_registry.json";

/// A locally installed model and when it was registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub descriptor: ModelDescriptor,
    pub installed_at: DateTime<Utc>,
}

/// Tracks which models are installed locally and persists that set as a
/// JSON file in the models directory.
///
/// The registry is the source of truth for "registered local descriptor":
/// the update coordinator compares these versions against the catalog feed,
/// and the cache resolves artifact paths through the descriptors held here.
pub struct ModelCatalog {
    /// Directory where model artifacts are stored
    models_dir: PathBuf,
    /// Registry of all installed models keyed by model id
    registry: RwLock<HashMap<String, RegisteredModel>>,
}

impl ModelCatalog {
    /// Creates a new catalog for the specified models directory.
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Loads the registry file if present, otherwise starts empty.
    pub fn load_or_create_registry(&self) -> Result<()> {
        let registry_path = self.models_dir.join(REGISTRY_FILENAME);
        let mut registry = self.registry.write();

        if registry_path.exists() {
            let content = fs::read_to_string(&registry_path)?;
            *registry = serde_json::from_str(&content)
                .map_err(|e| ModelError::LoadFailed(format!("corrupt model registry: {}", e)))?;
            info!(
                "Loaded model registry with {} entries from {}",
                registry.len(),
                registry_path.display()
            );
        } else {
            debug!("No registry file at {}", registry_path.display());
        }

        Ok(())
    }

    /// Drops registry entries whose canonical artifact file no longer
    /// exists, then saves. Run at startup so a stale registry never makes
    /// `load` succeed against a missing file.
    pub fn sync_artifacts(&self) -> Result<()> {
        let removed: Vec<String> = {
            let mut registry = self.registry.write();
            let models_dir = self.models_dir.clone();
            let before: Vec<String> = registry.keys().cloned().collect();
            registry.retain(|_, entry| {
                models_dir.join(entry.descriptor.artifact_filename()).exists()
            });
            before
                .into_iter()
                .filter(|id| !registry.contains_key(id))
                .collect()
        };

        for id in &removed {
            warn!("Pruned registry entry '{}': artifact file missing", id);
        }
        if !removed.is_empty() {
            self.save_registry()?;
        }
        Ok(())
    }

    /// Registers (or replaces) a descriptor and persists the registry.
    pub fn register(&self, descriptor: ModelDescriptor) -> Result<()> {
        {
            let mut registry = self.registry.write();
            registry.insert(
                descriptor.id.clone(),
                RegisteredModel {
                    descriptor,
                    installed_at: Utc::now(),
                },
            );
        }
        self.save_registry()
    }

    /// Removes a model from the registry and persists the change.
    pub fn deregister(&self, model_id: &str) -> Result<Option<ModelDescriptor>> {
        let removed = {
            let mut registry = self.registry.write();
            registry.remove(model_id).map(|e| e.descriptor)
        };
        if removed.is_some() {
            self.save_registry()?;
        }
        Ok(removed)
    }

    /// Returns the registered descriptor for a model id, if any.
    pub fn descriptor(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.registry
            .read()
            .get(model_id)
            .map(|e| e.descriptor.clone())
    }

    /// All registered descriptors, newest registration first.
    pub fn all(&self) -> Vec<ModelDescriptor> {
        let registry = self.registry.read();
        let mut entries: Vec<&RegisteredModel> = registry.values().collect();
        entries.sort_by(|a, b| b.installed_at.cmp(&a.installed_at));
        entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.registry.read().contains_key(model_id)
    }

    /// Full path of the canonical artifact for a descriptor.
    pub fn artifact_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.artifact_filename())
    }

    /// Saves the registry to disk as pretty-printed JSON.
    pub fn save_registry(&self) -> Result<()> {
        let registry = self.registry.read();
        let registry_path = self.models_dir.join(REGISTRY_FILENAME);
        let content = serde_json::to_string_pretty(&*registry)
            .map_err(|e| ModelError::LoadFailed(format!("registry serialization: {}", e)))?;
        fs::write(registry_path, content)?;
        Ok(())
    }
}
