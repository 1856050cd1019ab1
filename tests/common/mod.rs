//! Shared fixtures: scripted in-memory transport, catalog feed, and
//! inference backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use modeldock::cache::ModelArtifact;
use modeldock::catalog::{ModelDescriptor, ModelType, ModelVersion};
use modeldock::download::{BlobTransport, FetchResponse};
use modeldock::infer::{ComputeBackend, ImageFrame, InferenceBackend, Prediction};
use modeldock::update::{CatalogEntry, CatalogProvider};

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "modeldock-it-{}-{}-{:08x}",
        tag,
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn descriptor(id: &str, version: ModelVersion, byte_size: u64) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        name: format!("{} model", id),
        version,
        model_type: ModelType::Detection,
        input_shape: vec![1, 1, 1].into(),
        output_shape: vec![4].into(),
        byte_size,
        accuracy: Some(0.9),
        min_platform_version: None,
    }
}

/// Writes a canonical artifact for a descriptor directly into the models
/// directory, bypassing the download path.
pub fn write_artifact(dir: &PathBuf, descriptor: &ModelDescriptor, bytes: &[u8]) {
    std::fs::write(dir.join(descriptor.artifact_filename()), bytes).unwrap();
}

/// A frame whose single pixel carries a marker value the stub backend
/// echoes back, so tests can correlate inputs to outputs.
pub fn marker_frame(marker: f32) -> ImageFrame {
    ImageFrame::new(
        ndarray::Array3::from_elem((1, 1, 1), marker),
        modeldock::infer::ColorSpace::Grayscale,
    )
}

/// How the in-memory transport should behave for one model id.
#[derive(Clone)]
pub enum Behavior {
    /// Stream the blob in chunks with a correct checksum.
    Ok,
    /// Fail the initial fetch.
    FailFetch,
    /// Stream one chunk, then fail mid-stream.
    FailMidStream,
    /// Stream correctly but declare a wrong checksum.
    BadChecksum,
}

/// In-memory blob transport with scripted per-model behavior.
pub struct MemoryTransport {
    blobs: Mutex<HashMap<String, (Vec<u8>, Behavior)>>,
    chunk_size: usize,
}

impl MemoryTransport {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn insert(&self, model_id: &str, bytes: Vec<u8>, behavior: Behavior) {
        self.blobs
            .lock()
            .insert(model_id.to_string(), (bytes, behavior));
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    async fn fetch(&self, model_id: &str) -> anyhow::Result<FetchResponse> {
        let (bytes, behavior) = self
            .blobs
            .lock()
            .get(model_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown model '{}'", model_id))?;

        if matches!(behavior, Behavior::FailFetch) {
            anyhow::bail!("transport refused '{}'", model_id);
        }

        let total_size = bytes.len() as u64;
        let checksum = match behavior {
            Behavior::BadChecksum => "0".repeat(64),
            _ => sha256_hex(&bytes),
        };

        let chunks: Vec<anyhow::Result<Vec<u8>>> = match behavior {
            Behavior::FailMidStream => {
                let first = bytes[..self.chunk_size.min(bytes.len())].to_vec();
                vec![Ok(first), Err(anyhow::anyhow!("connection reset"))]
            }
            _ => bytes
                .chunks(self.chunk_size)
                .map(|c| Ok(c.to_vec()))
                .collect(),
        };

        Ok(FetchResponse {
            stream: futures::stream::iter(chunks).boxed(),
            total_size,
            checksum,
        })
    }
}

/// In-memory catalog feed.
pub struct MemoryProvider {
    entries: Mutex<HashMap<String, CatalogEntry>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, descriptor: ModelDescriptor, notes: &str, security: bool) {
        self.entries.lock().insert(
            descriptor.id.clone(),
            CatalogEntry {
                descriptor,
                release_date: Utc::now(),
                change_notes: notes.to_string(),
                is_security_update: security,
            },
        );
    }
}

#[async_trait]
impl CatalogProvider for MemoryProvider {
    async fn latest(&self, model_id: &str) -> anyhow::Result<Option<CatalogEntry>> {
        Ok(self.entries.lock().get(model_id).cloned())
    }
}

/// Stub backend: echoes each frame's marker back as a prediction label.
/// Negative markers are rigged to fail.
pub struct StubBackend;

impl InferenceBackend for StubBackend {
    fn run(
        &self,
        _artifact: &ModelArtifact,
        frame: &ImageFrame,
        _units: ComputeBackend,
    ) -> anyhow::Result<Vec<Prediction>> {
        let marker = frame.pixels()[[0, 0, 0]];
        if marker < 0.0 {
            anyhow::bail!("backend rejected frame with marker {}", marker);
        }
        Ok(vec![
            Prediction::new(format!("frame-{}", marker as i64), 0.9),
            Prediction::new("noise", 0.05),
        ])
    }
}

pub fn transport_with(models: &[(&ModelDescriptor, Vec<u8>, Behavior)]) -> Arc<MemoryTransport> {
    let transport = MemoryTransport::new(16);
    for (descriptor, bytes, behavior) in models {
        transport.insert(&descriptor.id, bytes.clone(), behavior.clone());
    }
    Arc::new(transport)
}
