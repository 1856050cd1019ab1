//! Inference: input frames, orchestration, backend selection, and
//! postprocessing of raw predictions.

mod frame;
mod optimizer;
mod orchestrator;
pub mod postprocess;

pub use frame::{ColorSpace, ImageFrame};
pub use optimizer::{
    ComputeBackend, ComputeOptimizer, DefaultPlatform, PerformanceStats, PlatformCapabilities,
};
pub use orchestrator::{CancelToken, InferenceBackend, InferenceOrchestrator};
pub use postprocess::{BoundingBox, PostprocessConfig, Prediction};
