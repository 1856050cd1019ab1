//! Model metadata: descriptors, versions, and the persisted local registry.

mod registry;
mod types;

pub use registry::{ModelCatalog, RegisteredModel, REGISTRY_FILENAME};
pub use types::{ModelDescriptor, ModelType, ModelVersion, TensorShape};
