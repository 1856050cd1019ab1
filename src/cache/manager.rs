use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::ModelArtifact;
use crate::catalog::{ModelDescriptor, ModelVersion};
use crate::error::{ModelError, Result};

/// A resident cache entry.
///
/// Destroyed only when its reference count is zero and it is chosen for
/// eviction, or on explicit unload.
struct CacheEntry {
    descriptor: ModelDescriptor,
    artifact: Arc<ModelArtifact>,
    loaded_at: DateTime<Utc>,
    last_access: Instant,
    refcount: usize,
    resident_bytes: u64,
}

/// All mutable cache state. Admit, evict, and refcount changes happen under
/// one lock so check-then-evict-then-admit is atomic as a unit.
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Entries whose version was replaced while still pinned. They keep
    /// counting against the budget and are dropped at the last handle
    /// release.
    superseded: Vec<CacheEntry>,
    resident_total: u64,
}

/// Checked-out reference to a resident model.
///
/// Holding a handle pins the entry: it cannot be evicted or unloaded until
/// every handle is dropped. Dropping the handle releases the reference;
/// eviction stays lazy and happens on the next admission that needs room.
pub struct ModelHandle {
    model_id: String,
    descriptor: ModelDescriptor,
    artifact: Arc<ModelArtifact>,
    state: Arc<Mutex<CacheState>>,
}

impl ModelHandle {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn artifact(&self) -> &Arc<ModelArtifact> {
        &self.artifact
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&self.model_id) {
            if entry.descriptor.version == self.descriptor.version {
                entry.refcount = entry.refcount.saturating_sub(1);
                return;
            }
        }

        // The entry this handle pinned was superseded by a newer version;
        // the last release drops it for good.
        if let Some(pos) = state.superseded.iter().position(|e| {
            e.descriptor.id == self.model_id && e.descriptor.version == self.descriptor.version
        }) {
            let entry = &mut state.superseded[pos];
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                let retired = state.superseded.swap_remove(pos);
                state.resident_total -= retired.resident_bytes;
            }
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Model cache with a resident byte budget and LRU eviction among
/// unreferenced entries.
///
/// Loading an already-resident model bumps its recency and reference count.
/// Loading a new model mmaps the canonical artifact, then evicts
/// least-recently-used zero-refcount entries until the budget holds the new
/// entry; if eviction cannot free enough (everything resident is pinned)
/// the load is rejected with `InsufficientCapacity` rather than admitted
/// over budget.
///
/// Entries are keyed by model id but matched by version: a load whose
/// descriptor carries a different version than the resident entry (an
/// update installed in between) is a miss. The stale entry is retired on
/// the spot when unreferenced, or parked until its last handle drops when
/// pinned, so the new version is admitted immediately either way.
pub struct ModelCache {
    models_dir: PathBuf,
    budget_bytes: u64,
    state: Arc<Mutex<CacheState>>,
}

impl ModelCache {
    pub fn new(models_dir: PathBuf, budget_bytes: u64) -> Self {
        Self {
            models_dir,
            budget_bytes,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                superseded: Vec::new(),
                resident_total: 0,
            })),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Returns a handle for the model, materializing it from local storage
    /// if it is not already resident.
    ///
    /// Fails with `NotFound` if there is no canonical artifact on disk;
    /// the caller must drive the download path first.
    pub async fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        if let Some(handle) = self.checkout(descriptor) {
            return Ok(handle);
        }

        let path = self.models_dir.join(descriptor.artifact_filename());
        if !path.exists() {
            return Err(ModelError::NotFound(descriptor.id.clone()));
        }

        // mmap off the async workers; admission happens afterwards under
        // the state lock.
        let artifact = tokio::task::spawn_blocking(move || ModelArtifact::open(&path))
            .await
            .map_err(|e| ModelError::LoadFailed(format!("load task: {}", e)))??;

        self.admit(descriptor, Arc::new(artifact))
    }

    /// Fast path: bump recency and refcount of a resident entry with the
    /// same version. A resident entry at a different version was replaced
    /// by an update; it gets retired and the call is a miss so the new
    /// version is materialized.
    fn checkout(&self, descriptor: &ModelDescriptor) -> Option<ModelHandle> {
        let mut state = self.state.lock();
        let version_matches = match state.entries.get(&descriptor.id) {
            None => return None,
            Some(entry) => entry.descriptor.version == descriptor.version,
        };
        if !version_matches {
            Self::retire(&mut state, &descriptor.id);
            return None;
        }

        let entry = state.entries.get_mut(&descriptor.id)?;
        entry.last_access = Instant::now();
        entry.refcount += 1;
        Some(ModelHandle {
            model_id: descriptor.id.clone(),
            descriptor: entry.descriptor.clone(),
            artifact: entry.artifact.clone(),
            state: self.state.clone(),
        })
    }

    /// Removes the resident entry for a model id after its version was
    /// replaced. Unreferenced entries free their bytes immediately; pinned
    /// ones are parked and freed at the last handle drop.
    fn retire(state: &mut CacheState, model_id: &str) {
        if let Some(stale) = state.entries.remove(model_id) {
            if stale.refcount == 0 {
                state.resident_total -= stale.resident_bytes;
                debug!(
                    "Retired stale model '{}' {} ({} bytes)",
                    model_id, stale.descriptor.version, stale.resident_bytes
                );
            } else {
                debug!(
                    "Model '{}' {} superseded while pinned; retiring at last release",
                    model_id, stale.descriptor.version
                );
                state.superseded.push(stale);
            }
        }
    }

    /// Registers a freshly materialized artifact, evicting as needed first.
    fn admit(
        &self,
        descriptor: &ModelDescriptor,
        artifact: Arc<ModelArtifact>,
    ) -> Result<ModelHandle> {
        let size = artifact.len();
        let mut state = self.state.lock();

        // Another load may have admitted this model while we were mapping.
        let resident = state
            .entries
            .get(&descriptor.id)
            .map(|e| e.descriptor.version == descriptor.version);
        match resident {
            Some(true) => {
                if let Some(entry) = state.entries.get_mut(&descriptor.id) {
                    entry.last_access = Instant::now();
                    entry.refcount += 1;
                    return Ok(ModelHandle {
                        model_id: descriptor.id.clone(),
                        descriptor: entry.descriptor.clone(),
                        artifact: entry.artifact.clone(),
                        state: self.state.clone(),
                    });
                }
            }
            Some(false) => Self::retire(&mut state, &descriptor.id),
            None => {}
        }

        while state.resident_total + size > self.budget_bytes {
            let victim = state
                .entries
                .iter()
                .filter(|(_, e)| e.refcount == 0)
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    if let Some(evicted) = state.entries.remove(&id) {
                        state.resident_total -= evicted.resident_bytes;
                        debug!(
                            "Evicted model '{}' ({} bytes) from cache",
                            id, evicted.resident_bytes
                        );
                    }
                }
                None => {
                    return Err(ModelError::InsufficientCapacity {
                        requested: size,
                        budget: self.budget_bytes,
                    });
                }
            }
        }

        info!(
            "Admitted model '{}' ({} bytes, resident total {} bytes)",
            descriptor.id,
            size,
            state.resident_total + size
        );

        state.entries.insert(
            descriptor.id.clone(),
            CacheEntry {
                descriptor: descriptor.clone(),
                artifact: artifact.clone(),
                loaded_at: Utc::now(),
                last_access: Instant::now(),
                refcount: 1,
                resident_bytes: size,
            },
        );
        state.resident_total += size;

        Ok(ModelHandle {
            model_id: descriptor.id.clone(),
            descriptor: descriptor.clone(),
            artifact,
            state: self.state.clone(),
        })
    }

    /// Explicitly removes a resident entry.
    ///
    /// Fails with `InUse` while any handle is live. Unloading a model that
    /// is not resident is a no-op.
    pub fn unload(&self, model_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.entries.get(model_id) {
            None => Ok(()),
            Some(entry) if entry.refcount > 0 => Err(ModelError::InUse(model_id.to_string())),
            Some(_) => {
                if let Some(removed) = state.entries.remove(model_id) {
                    state.resident_total -= removed.resident_bytes;
                    info!(
                        "Unloaded model '{}' ({} bytes)",
                        model_id, removed.resident_bytes
                    );
                }
                Ok(())
            }
        }
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.state.lock().entries.contains_key(model_id)
    }

    /// Total resident bytes across all entries.
    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().resident_total
    }

    /// Current reference count of a resident entry, for observability.
    pub fn refcount(&self, model_id: &str) -> usize {
        self.state
            .lock()
            .entries
            .get(model_id)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    /// Snapshot of all resident entries, superseded-but-pinned ones
    /// included.
    pub fn status(&self) -> Vec<ResidentModel> {
        let state = self.state.lock();
        let mut entries: Vec<ResidentModel> = state
            .entries
            .values()
            .chain(state.superseded.iter())
            .map(|e| ResidentModel {
                model_id: e.descriptor.id.clone(),
                version: e.descriptor.version,
                resident_bytes: e.resident_bytes,
                refcount: e.refcount,
                loaded_at: e.loaded_at,
            })
            .collect();
        entries.sort_by(|a, b| a.model_id.cmp(&b.model_id).then(a.version.cmp(&b.version)));
        entries
    }
}

/// Point-in-time view of a resident cache entry.
#[derive(Debug, Clone)]
pub struct ResidentModel {
    pub model_id: String,
    pub version: ModelVersion,
    pub resident_bytes: u64,
    pub refcount: usize,
    pub loaded_at: DateTime<Utc>,
}
