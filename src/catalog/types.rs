use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Semantic version of a model artifact (`major.minor.patch`).
///
/// Ordering is derived from field order, so catalog comparisons are plain
/// `>` / `<` on the struct.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = |name: &str| -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {} component in version '{}'", name, s))?
                .parse::<u32>()
                .map_err(|e| format!("invalid {} component in version '{}': {}", name, s, e))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        Ok(ModelVersion::new(major, minor, patch))
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelVersion> for String {
    fn from(v: ModelVersion) -> Self {
        v.to_string()
    }
}

/// The kind of task a model performs.
///
/// Capability dispatch (compute backend selection, shape handling) switches
/// on this tag; `Custom` is the open extension case for models outside the
/// built-in families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Detection,
    Classification,
    Segmentation,
    Custom(String),
}

impl ModelType {
    pub fn label(&self) -> &str {
        match self {
            ModelType::Detection => "detection",
            ModelType::Classification => "classification",
            ModelType::Segmentation => "segmentation",
            ModelType::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Declared tensor shape, e.g. `[3, 640, 640]` for a CHW image input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape(pub Vec<usize>);

impl TensorShape {
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        TensorShape(dims)
    }
}

/// Immutable metadata for a known model.
///
/// Created once from a catalog feed and never mutated; an updated model is a
/// new descriptor with a higher version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub version: ModelVersion,
    pub model_type: ModelType,
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub byte_size: u64,
    pub accuracy: Option<f32>,
    pub min_platform_version: Option<ModelVersion>,
}

impl ModelDescriptor {
    /// Canonical artifact filename. The version is part of the name so an
    /// update can install the new artifact next to the old one and swap
    /// atomically.
    pub fn artifact_filename(&self) -> String {
        format!("{}-{}.model", self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parses_and_orders() {
        let a: ModelVersion = "1.2.3".parse().unwrap();
        let b: ModelVersion = "1.10.0".parse().unwrap();
        assert_eq!(a, ModelVersion::new(1, 2, 3));
        assert!(b > a);
        assert!(ModelVersion::new(2, 0, 0) > b);
        assert_eq!(b.to_string(), "1.10.0");
    }

    #[test]
    fn version_rejects_garbage() {
        assert!("".parse::<ModelVersion>().is_err());
        assert!("1.2".parse::<ModelVersion>().is_err());
        assert!("a.b.c".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn model_type_roundtrips_through_json() {
        let custom = ModelType::Custom("pose".to_string());
        let json = serde_json::to_string(&custom).unwrap();
        let back: ModelType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
        assert_eq!(back.label(), "pose");

        let det: ModelType = serde_json::from_str("\"detection\"").unwrap();
        assert_eq!(det, ModelType::Detection);
    }

    #[test]
    fn artifact_filename_is_versioned() {
        let d = ModelDescriptor {
            id: "scene-seg".to_string(),
            name: "Scene Segmenter".to_string(),
            version: ModelVersion::new(2, 1, 0),
            model_type: ModelType::Segmentation,
            input_shape: vec![3, 512, 512].into(),
            output_shape: vec![21, 512, 512].into(),
            byte_size: 1024,
            accuracy: Some(0.91),
            min_platform_version: None,
        };
        assert_eq!(d.artifact_filename(), "scene-seg-2.1.0.model");
    }
}
