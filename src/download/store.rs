use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::ModelDescriptor;
use crate::error::Result;

/// Minimal file-system capability set for artifacts: write bytes to a temp
/// path, atomically rename temp to canonical, delete canonical, read back.
///
/// Downloads always land in a temp file first; the canonical path only ever
/// holds a fully verified artifact.
#[derive(Clone)]
pub struct ArtifactStore {
    models_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Ensures the models directory exists.
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.models_dir.exists() {
            std::fs::create_dir_all(&self.models_dir)?;
            debug!("Created models directory: {}", self.models_dir.display());
        }
        Ok(())
    }

    /// Canonical on-disk location of a descriptor's artifact.
    pub fn canonical_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.artifact_filename())
    }

    pub fn exists(&self, descriptor: &ModelDescriptor) -> bool {
        self.canonical_path(descriptor).exists()
    }

    /// A fresh temp path for an in-flight download. The random suffix keeps
    /// concurrent downloads of the same model from clobbering each other.
    pub fn temp_path(&self, model_id: &str) -> PathBuf {
        self.models_dir
            .join(format!(".{}.{:08x}.part", model_id, rand::random::<u32>()))
    }

    /// Atomically promotes a verified temp file to the canonical path.
    pub async fn promote(&self, temp: &Path, canonical: &Path) -> Result<()> {
        tokio::fs::rename(temp, canonical).await?;
        Ok(())
    }

    /// Removes a partial temp artifact. Missing files are fine.
    pub async fn discard(&self, temp: &Path) {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Failed to discard temp artifact {}: {}", temp.display(), e);
            }
        }
    }

    /// Deletes a canonical artifact. Missing files are fine.
    pub async fn remove(&self, canonical: &Path) -> Result<()> {
        match tokio::fs::remove_file(canonical).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
