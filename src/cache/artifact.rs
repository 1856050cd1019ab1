use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{ModelError, Result};

/// A loaded model artifact, memory-mapped read-only from its canonical path.
///
/// This is the opaque handle the inference backend consumes. Resident size
/// for cache accounting is the mapped length, not the descriptor's declared
/// size, so a truncated or padded file is accounted as it actually is.
pub struct ModelArtifact {
    path: PathBuf,
    map: Mmap,
}

impl ModelArtifact {
    /// Maps the artifact at `path`. Blocking; call from a blocking context.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ModelError::LoadFailed(format!("open {}: {}", path.display(), e))
        })?;
        // Safety: the mapping is read-only and the canonical artifact is
        // never written in place (updates install under a new versioned
        // name and swap).
        let map = unsafe {
            Mmap::map(&file).map_err(|e| {
                ModelError::LoadFailed(format!("mmap {}: {}", path.display(), e))
            })?
        };
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}
