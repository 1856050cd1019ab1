//! Byte-budgeted model cache with LRU eviction.

mod artifact;
mod manager;

pub use artifact::ModelArtifact;
pub use manager::{ModelCache, ModelHandle, ResidentModel};
