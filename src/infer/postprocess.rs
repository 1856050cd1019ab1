//! Postprocessing of raw model outputs: confidence thresholding, stable
//! top-k ranking, and greedy non-max suppression.

use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in normalized [0, 1] coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with another box. Zero-area boxes (and any
    /// pair with zero union) contribute 0 by convention.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A single model prediction.
///
/// Confidence is clamped to [0, 1] at construction, so downstream stages
/// may rely on the range invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub class_id: Option<usize>,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub metadata: Option<serde_json::Value>,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            label: label.into(),
            class_id: None,
            confidence,
            bbox: None,
            metadata: None,
        }
    }

    pub fn with_class_id(mut self, class_id: usize) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Pipeline configuration: threshold, then suppress, then cap.
#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub top_k: Option<usize>,
}

/// Keeps predictions with confidence at or above the threshold.
pub fn filter_by_confidence(predictions: Vec<Prediction>, threshold: f32) -> Vec<Prediction> {
    predictions
        .into_iter()
        .filter(|p| p.confidence >= threshold)
        .collect()
}

/// Returns the k highest-confidence predictions. The sort is stable, so
/// ties keep their original order and the output is deterministic.
pub fn top_k(mut predictions: Vec<Prediction>, k: usize) -> Vec<Prediction> {
    predictions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions.truncate(k);
    predictions
}

/// Classic greedy non-max suppression over predictions carrying a bounding
/// box; predictions without one pass through unfiltered.
///
/// Boxed predictions are visited in descending confidence order; each
/// survivor suppresses every remaining box whose IoU with it exceeds
/// `iou_threshold`. Output preserves the original input order, which makes
/// the operation idempotent.
pub fn apply_nms(predictions: Vec<Prediction>, iou_threshold: f32) -> Vec<Prediction> {
    // Indices of boxed predictions, ranked by descending confidence.
    let mut ranked: Vec<usize> = (0..predictions.len())
        .filter(|&i| predictions[i].bbox.is_some())
        .collect();
    ranked.sort_by(|&a, &b| {
        predictions[b]
            .confidence
            .partial_cmp(&predictions[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; predictions.len()];
    for (rank, &i) in ranked.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        let Some(anchor) = predictions[i].bbox else {
            continue;
        };
        for &j in &ranked[rank + 1..] {
            if suppressed[j] {
                continue;
            }
            let Some(other) = predictions[j].bbox else {
                continue;
            };
            if anchor.iou(&other) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    predictions
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !suppressed[*i])
        .map(|(_, p)| p)
        .collect()
}

/// Runs the full pipeline: confidence filter, NMS, optional top-k cap.
pub fn run(predictions: Vec<Prediction>, config: &PostprocessConfig) -> Vec<Prediction> {
    let filtered = filter_by_confidence(predictions, config.confidence_threshold);
    let kept = apply_nms(filtered, config.iou_threshold);
    match config.top_k {
        Some(k) => top_k(kept, k),
        None => kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(label: &str, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Prediction {
        Prediction::new(label, confidence).with_bbox(BoundingBox::new(x1, y1, x2, y2))
    }

    #[test]
    fn confidence_is_clamped_at_construction() {
        assert_eq!(Prediction::new("hot", 1.5).confidence, 1.0);
        assert_eq!(Prediction::new("cold", -0.2).confidence, 0.0);
        assert_eq!(Prediction::new("nan", f32::NAN).confidence, 0.0);
        assert_eq!(Prediction::new("ok", 0.37).confidence, 0.37);
    }

    #[test]
    fn iou_matches_hand_computation() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::new(0.25, 0.25, 0.75, 0.75);
        // intersection 0.0625, union 0.25 + 0.25 - 0.0625
        assert!((a.iou(&b) - 0.0625 / 0.4375).abs() < 1e-6);
    }

    #[test]
    fn iou_of_zero_area_box_is_zero() {
        let degenerate = BoundingBox::new(0.3, 0.3, 0.3, 0.3);
        let normal = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(degenerate.iou(&degenerate), 0.0);
        // Degenerate against a real box intersects with zero area.
        assert_eq!(degenerate.iou(&normal), 0.0);
    }

    #[test]
    fn filter_keeps_threshold_boundary() {
        let preds = vec![
            Prediction::new("a", 0.5),
            Prediction::new("b", 0.49),
            Prediction::new("c", 0.9),
        ];
        let kept = filter_by_confidence(preds, 0.5);
        let labels: Vec<&str> = kept.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "c"]);
    }

    #[test]
    fn top_k_is_stable_on_ties() {
        let preds = vec![
            Prediction::new("first", 0.8),
            Prediction::new("second", 0.8),
            Prediction::new("third", 0.9),
            Prediction::new("fourth", 0.8),
        ];
        let top = top_k(preds, 3);
        let labels: Vec<&str> = top.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["third", "first", "second"]);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence_boxes() {
        let preds = vec![
            boxed("dog", 0.9, 0.1, 0.1, 0.5, 0.5),
            boxed("dog-dup", 0.7, 0.12, 0.12, 0.52, 0.52),
            boxed("cat", 0.8, 0.6, 0.6, 0.9, 0.9),
        ];
        let kept = apply_nms(preds, 0.45);
        let labels: Vec<&str> = kept.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["dog", "cat"]);
    }

    #[test]
    fn nms_is_idempotent() {
        let preds = vec![
            boxed("a", 0.95, 0.0, 0.0, 0.4, 0.4),
            boxed("b", 0.9, 0.05, 0.05, 0.45, 0.45),
            boxed("c", 0.85, 0.5, 0.5, 0.9, 0.9),
            boxed("d", 0.6, 0.55, 0.55, 0.95, 0.95),
            Prediction::new("no-box", 0.5),
        ];
        let once = apply_nms(preds, 0.4);
        let twice = apply_nms(once.clone(), 0.4);
        let labels = |v: &[Prediction]| v.iter().map(|p| p.label.clone()).collect::<Vec<_>>();
        assert_eq!(labels(&once), labels(&twice));
    }

    #[test]
    fn predictions_without_boxes_pass_through_nms() {
        let preds = vec![
            Prediction::new("scene", 0.3),
            boxed("obj", 0.9, 0.0, 0.0, 0.5, 0.5),
            boxed("obj-dup", 0.8, 0.0, 0.0, 0.5, 0.5),
        ];
        let kept = apply_nms(preds, 0.5);
        let labels: Vec<&str> = kept.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["scene", "obj"]);
    }

    #[test]
    fn full_pipeline_applies_all_stages() {
        let preds = vec![
            boxed("strong", 0.9, 0.0, 0.0, 0.4, 0.4),
            boxed("dup", 0.8, 0.02, 0.02, 0.42, 0.42),
            boxed("weak", 0.1, 0.6, 0.6, 0.9, 0.9),
            boxed("other", 0.7, 0.5, 0.0, 0.9, 0.4),
        ];
        let config = PostprocessConfig {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            top_k: Some(1),
        };
        let out = run(preds, &config);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "strong");
    }
}
