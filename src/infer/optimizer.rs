use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::{ModelDescriptor, ModelType, TensorShape};

/// Execution backend preference, most capable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBackend {
    AcceleratorPreferred,
    CpuAndAccelerator,
    CpuOnly,
}

/// What the platform reports about its accelerator.
///
/// The default implementation claims full support; embedders plug in the
/// real capability probe for their hardware.
pub trait PlatformCapabilities: Send + Sync {
    fn accelerator_supports(&self, model_type: &ModelType, input_shape: &TensorShape) -> bool;
}

/// Platform stub that reports the accelerator as fully capable.
#[derive(Debug, Default)]
pub struct DefaultPlatform;

impl PlatformCapabilities for DefaultPlatform {
    fn accelerator_supports(&self, _model_type: &ModelType, _input_shape: &TensorShape) -> bool {
        true
    }
}

/// Rolling latency statistic for one model type.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceStats {
    pub count: u64,
    pub mean_latency: Duration,
}

struct RunningStat {
    count: u64,
    mean_ms: f64,
}

/// Picks the execution backend per model type and accumulates latency
/// telemetry. The statistics are observability only; they never gate
/// correctness.
pub struct ComputeOptimizer {
    platform: Arc<dyn PlatformCapabilities>,
    stats: Mutex<HashMap<ModelType, RunningStat>>,
}

impl ComputeOptimizer {
    pub fn new(platform: Arc<dyn PlatformCapabilities>) -> Self {
        Self {
            platform,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Preferred backend for a model: the most capable one, degrading to
    /// CPU-only when the platform reports the accelerator unsupported for
    /// the model's declared input shape. Custom models default to the
    /// mixed backend since their op set is unknown.
    pub fn optimal_compute_units(&self, descriptor: &ModelDescriptor) -> ComputeBackend {
        if !self
            .platform
            .accelerator_supports(&descriptor.model_type, &descriptor.input_shape)
        {
            debug!(
                "Accelerator unsupported for '{}' ({}); falling back to CPU",
                descriptor.id, descriptor.model_type
            );
            return ComputeBackend::CpuOnly;
        }

        match descriptor.model_type {
            ModelType::Detection | ModelType::Classification | ModelType::Segmentation => {
                ComputeBackend::AcceleratorPreferred
            }
            ModelType::Custom(_) => ComputeBackend::CpuAndAccelerator,
        }
    }

    /// Folds one observed latency into the running mean for the type.
    pub fn record_inference(&self, duration: Duration, model_type: &ModelType) {
        let mut stats = self.stats.lock();
        let stat = stats.entry(model_type.clone()).or_insert(RunningStat {
            count: 0,
            mean_ms: 0.0,
        });
        stat.count += 1;
        let sample_ms = duration.as_secs_f64() * 1000.0;
        stat.mean_ms += (sample_ms - stat.mean_ms) / stat.count as f64;
    }

    /// Current statistics for a model type, if any samples were recorded.
    pub fn performance_stats(&self, model_type: &ModelType) -> Option<PerformanceStats> {
        let stats = self.stats.lock();
        stats.get(model_type).map(|s| PerformanceStats {
            count: s.count,
            mean_latency: Duration::from_secs_f64(s.mean_ms / 1000.0),
        })
    }
}
