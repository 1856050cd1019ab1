//! On-device model lifecycle and inference pipeline.
//!
//! modeldock loads, caches, evicts, downloads, updates, and invokes
//! machine-learning models, and post-processes their raw outputs into
//! ranked, filtered predictions. The crate is organized around a few
//! stateful leaves and stateless logic on top of them:
//!
//! - [`catalog`]: immutable model metadata and the persisted local registry
//! - [`cache`]: byte-budgeted model cache with LRU eviction
//! - [`download`]: bounded-concurrency artifact downloads with integrity checks
//! - [`update`]: version comparison and atomic install/rollback
//! - [`infer`]: batch inference orchestration and confidence/NMS postprocessing
//! - [`pipeline`]: the composition root wiring the above together
//!
//! All collaborators (blob transport, catalog feed, inference backend,
//! platform capabilities) are injected as trait objects; the crate holds no
//! global mutable state.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod infer;
pub mod pipeline;
pub mod telemetry;
pub mod update;

pub use error::{ModelError, Result};
pub use pipeline::ModelPipeline;
