//! Detection post-processing: YOLO output decoding, non-maximum suppression
//! and geometric filtering of person boxes.

use crate::letterbox::Letterbox;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// COCO and CrowdHuman exports both put "person" at class 0.
pub const PERSON_CLASS: usize = 0;

fn by_confidence_desc(a: &BoundingBox, b: &BoundingBox) -> std::cmp::Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Non-Maximum Suppression: remove detections overlapping a more confident one
/// by more than `iou_threshold`. Output is sorted by confidence.
pub fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(by_confidence_desc);

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Second overlap pass over already-filtered person boxes.
///
/// Stricter than [`nms`]: a box is dropped as soon as its IoU with a kept box
/// reaches `iou_threshold`.
pub fn suppress_overlaps(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(by_confidence_desc);

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| k.iou(&det) < iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Geometric plausibility limits for a person box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonFilter {
    pub min_width: f32,
    pub min_height: f32,
    /// Largest allowed box size as a fraction of the frame, per axis.
    pub max_frame_fraction: f32,
    /// Allowed height / width range. People are taller than wide.
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    /// Box centers closer than this fraction to a frame edge are treated as partial.
    pub edge_margin: f32,
}

impl Default for PersonFilter {
    fn default() -> Self {
        Self {
            min_width: 12.0,
            min_height: 24.0,
            max_frame_fraction: 0.95,
            min_aspect_ratio: 0.8,
            max_aspect_ratio: 6.0,
            edge_margin: 0.02,
        }
    }
}

impl PersonFilter {
    pub fn accepts(&self, b: &BoundingBox, frame_width: u32, frame_height: u32, min_confidence: f32) -> bool {
        let fw = frame_width as f32;
        let fh = frame_height as f32;

        if b.width < self.min_width || b.height < self.min_height {
            return false;
        }
        if b.width > fw * self.max_frame_fraction || b.height > fh * self.max_frame_fraction {
            return false;
        }

        let aspect = if b.width > 0.0 { b.height / b.width } else { 0.0 };
        if aspect < self.min_aspect_ratio || aspect > self.max_aspect_ratio {
            return false;
        }

        let (cx, cy) = b.center();
        if cx < fw * self.edge_margin
            || cx > fw * (1.0 - self.edge_margin)
            || cy < fh * self.edge_margin
            || cy > fh * (1.0 - self.edge_margin)
        {
            return false;
        }

        b.confidence >= min_confidence
    }

    pub fn apply(
        &self,
        detections: Vec<BoundingBox>,
        frame_width: u32,
        frame_height: u32,
        min_confidence: f32,
    ) -> Vec<BoundingBox> {
        detections
            .into_iter()
            .filter(|b| self.accepts(b, frame_width, frame_height, min_confidence))
            .collect()
    }
}

/// Decode a YOLOv8-style detection head for a single class.
///
/// Accepts `[1, 4 + nc, N]` or the transposed `[1, N, 4 + nc]` layout; rows are
/// `cx, cy, w, h` in letterboxed model space followed by per-class scores.
/// Boxes are mapped back to frame space and returned unsuppressed.
pub fn decode_yolo(
    data: &[f32],
    shape: &[usize],
    class_id: usize,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<BoundingBox>, String> {
    let (rows, anchors, transposed) = match *shape {
        [1, a, b] if a <= b => (a, b, false),
        [1, a, b] => (b, a, true),
        _ => return Err(format!("expected [1, 4 + classes, anchors] output, got {shape:?}")),
    };
    if rows < 5 || 4 + class_id >= rows {
        return Err(format!("output has {rows} rows, cannot hold class {class_id}"));
    }
    if data.len() < rows * anchors {
        return Err(format!(
            "output buffer has {} values, shape {shape:?} needs {}",
            data.len(),
            rows * anchors
        ));
    }

    let at = |row: usize, anchor: usize| -> f32 {
        if transposed {
            data[anchor * rows + row]
        } else {
            data[row * anchors + anchor]
        }
    };

    let mut detections = Vec::new();
    for i in 0..anchors {
        let score = at(4 + class_id, i);
        if score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        detections.push(BoundingBox::from_corners(x1, y1, x2, y2, score));
    }

    Ok(detections)
}
