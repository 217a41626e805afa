//! Detection and bounding-box value types fed into the tracker.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Axis-aligned bounding box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge, pixels.
    pub x: f64,
    /// Top edge, pixels.
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box.
    pub fn centroid(&self) -> Point2<f64> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.width * self.height
    }

    /// Geometric-mean side length, sqrt(width * height).
    ///
    /// Used as the single size proxy for both the distance model and the
    /// flock small-member rule. Zero for degenerate boxes.
    pub fn size(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        (self.width * self.height).sqrt()
    }

    /// A box with non-positive width or height carries no usable geometry.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersection over Union with another box.
    ///
    /// Returns a value in [0, 1]; 0 when either box is degenerate or the
    /// boxes are disjoint.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter_x1 = self.x.max(other.x);
        let inter_y1 = self.y.max(other.y);
        let inter_x2 = (self.x + self.width).min(other.x + other.width);
        let inter_y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// One detected object in one frame, as reported by the external detector.
///
/// Detections are fixed-shape records validated at the boundary and never
/// mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label, e.g. "seagull".
    pub label: String,
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
    /// Index of the frame this detection belongs to.
    pub frame_index: usize,
}

impl Detection {
    /// Create a validated detection.
    ///
    /// # Arguments
    /// * `label` - Class label (must be non-empty)
    /// * `bbox` - Bounding box (coordinates must be finite)
    /// * `confidence` - Detector confidence in [0, 1]
    /// * `frame_index` - Frame the detection was produced for
    pub fn new(
        label: impl Into<String>,
        bbox: BoundingBox,
        confidence: f64,
        frame_index: usize,
    ) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::InvalidDetection("empty class label".to_string()));
        }

        let coords = [bbox.x, bbox.y, bbox.width, bbox.height];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidDetection(format!(
                "non-finite bounding box {:?} for '{}'",
                bbox, label
            )));
        }

        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }

        Ok(Self {
            label,
            bbox,
            confidence,
            frame_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bbox(x: f64, y: f64, w: f64, h: f64) -> BoundingBox {
        BoundingBox::new(x, y, w, h)
    }

    #[test]
    fn test_centroid_and_area() {
        let b = bbox(10.0, 20.0, 40.0, 10.0);
        let c = b.centroid();
        assert_relative_eq!(c.x, 30.0, epsilon = 1e-10);
        assert_relative_eq!(c.y, 25.0, epsilon = 1e-10);
        assert_relative_eq!(b.area(), 400.0, epsilon = 1e-10);
    }

    #[test]
    fn test_size_geometric_mean() {
        let b = bbox(0.0, 0.0, 4.0, 9.0);
        assert_relative_eq!(b.size(), 6.0, epsilon = 1e-10);
    }

    #[test]
    fn test_degenerate_box() {
        assert!(bbox(0.0, 0.0, 0.0, 10.0).is_degenerate());
        assert!(bbox(0.0, 0.0, 10.0, -1.0).is_degenerate());
        assert_eq!(bbox(0.0, 0.0, 0.0, 10.0).size(), 0.0);
        assert_eq!(bbox(0.0, 0.0, 0.0, 10.0).area(), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let b = bbox(10.0, 10.0, 20.0, 20.0);
        assert_relative_eq!(b.iou(&b), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(100.0, 100.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // Two 10x10 boxes shifted by 5 in x: intersection 50, union 150
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        assert_relative_eq!(a.iou(&b), 1.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_iou_degenerate_is_zero() {
        let a = bbox(0.0, 0.0, 0.0, 10.0);
        let b = bbox(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_detection_valid() {
        let det = Detection::new("seagull", bbox(0.0, 0.0, 10.0, 10.0), 0.9, 3).unwrap();
        assert_eq!(det.label, "seagull");
        assert_eq!(det.frame_index, 3);
    }

    #[test]
    fn test_detection_rejects_bad_confidence() {
        assert!(Detection::new("seagull", bbox(0.0, 0.0, 1.0, 1.0), 1.5, 0).is_err());
        assert!(Detection::new("seagull", bbox(0.0, 0.0, 1.0, 1.0), -0.1, 0).is_err());
    }

    #[test]
    fn test_detection_rejects_empty_label() {
        assert!(Detection::new("", bbox(0.0, 0.0, 1.0, 1.0), 0.5, 0).is_err());
    }

    #[test]
    fn test_detection_rejects_non_finite_bbox() {
        assert!(Detection::new("seagull", bbox(f64::NAN, 0.0, 1.0, 1.0), 0.5, 0).is_err());
    }

    #[test]
    fn test_detection_allows_degenerate_bbox() {
        // Degenerate boxes are valid detections; they only skip distance sampling.
        assert!(Detection::new("seagull", bbox(5.0, 5.0, 0.0, 3.0), 0.5, 0).is_ok());
    }
}
