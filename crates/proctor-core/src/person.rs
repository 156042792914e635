//! Multi-person detection with YOLOv8 ONNX exports.
//!
//! A CrowdHuman-trained model is preferred; the generic COCO model takes over
//! when the custom one is missing or fails on a frame. Raw detections go
//! through geometric filtering and a second overlap pass before counting.

use crate::config::PersonThresholds;
use crate::frame::Frame;
use crate::letterbox::letterbox_rgb;
use crate::postprocess::{decode_yolo, nms, suppress_overlaps, PERSON_CLASS};
use crate::types::{BoundingBox, MultiPersonVerdict, PersonDebugInfo, PersonLocation, PersonModelKind};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PAD: [u8; 3] = [114, 114, 114];

#[derive(Error, Debug)]
pub enum PersonError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that returns person boxes for a frame.
///
/// Boxes are in frame coordinates, already past confidence thresholding and
/// model-level NMS, but not yet geometrically filtered.
pub trait PersonModel: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, PersonError>;
}

/// YOLOv8 person detector backed by an ONNX session.
pub struct YoloPersonDetector {
    session: Session,
    input_size: u32,
    confidence: f32,
    nms_iou: f32,
}

impl YoloPersonDetector {
    pub fn load(model_path: &Path, thresholds: &PersonThresholds) -> Result<Self, PersonError> {
        if !model_path.exists() {
            return Err(PersonError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded person detector"
        );

        Ok(Self {
            session,
            input_size: YOLO_INPUT_SIZE,
            confidence: thresholds.confidence,
            nms_iou: thresholds.nms_iou,
        })
    }
}

impl PersonModel for YoloPersonDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, PersonError> {
        let (canvas, letterbox) = letterbox_rgb(&frame.rgb, self.input_size, YOLO_PAD);
        let input = to_nchw(&canvas);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PersonError::InferenceFailed(format!("detections: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let boxes = decode_yolo(data, &dims, PERSON_CLASS, self.confidence, &letterbox)
            .map_err(PersonError::InferenceFailed)?;
        Ok(nms(boxes, self.nms_iou))
    }
}

/// Scale an RGB canvas to `[0, 1]` in NCHW layout.
fn to_nchw(canvas: &image::RgbImage) -> Array4<f32> {
    let (w, h) = canvas.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Counts people in a frame using the best available person model.
pub struct MultiPersonDetector {
    custom: Option<Box<dyn PersonModel>>,
    generic: Option<Box<dyn PersonModel>>,
    thresholds: PersonThresholds,
}

impl MultiPersonDetector {
    pub fn new(
        custom: Option<Box<dyn PersonModel>>,
        generic: Option<Box<dyn PersonModel>>,
        thresholds: PersonThresholds,
    ) -> Self {
        Self {
            custom,
            generic,
            thresholds,
        }
    }

    /// The model a frame would be run through first.
    pub fn model_in_use(&self) -> Option<PersonModelKind> {
        if self.custom.is_some() {
            Some(PersonModelKind::Custom)
        } else if self.generic.is_some() {
            Some(PersonModelKind::Generic)
        } else {
            None
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model_in_use().is_some()
    }

    /// Run the preferred model, falling back to the generic one on failure.
    ///
    /// Returns the accepted boxes alongside the verdict so callers can reuse them.
    pub fn detect(&mut self, frame: &Frame) -> (MultiPersonVerdict, Vec<BoundingBox>) {
        let mut last_error = None;

        if let Some(custom) = self.custom.as_mut() {
            match custom.detect(frame) {
                Ok(raw) => return self.verdict(frame, raw, PersonModelKind::Custom),
                Err(e) => {
                    tracing::warn!(error = %e, "custom person model failed, trying generic model");
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(generic) = self.generic.as_mut() {
            match generic.detect(frame) {
                Ok(raw) => return self.verdict(frame, raw, PersonModelKind::Generic),
                Err(e) => {
                    tracing::warn!(error = %e, "generic person model failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let error = last_error.unwrap_or_else(|| "no person detection model loaded".to_string());
        (MultiPersonVerdict::empty(error), Vec::new())
    }

    /// Run `frame` through each loaded model, not just the preferred one.
    ///
    /// Returns how many models completed an inference.
    pub fn warmup(&mut self, frame: &Frame) -> usize {
        let mut warmed = 0;
        for (kind, model) in [
            (PersonModelKind::Custom, self.custom.as_mut()),
            (PersonModelKind::Generic, self.generic.as_mut()),
        ] {
            let Some(model) = model else { continue };
            match model.detect(frame) {
                Ok(_) => warmed += 1,
                Err(e) => tracing::warn!(model = kind.label(), error = %e, "person model warmup failed"),
            }
        }
        warmed
    }

    fn verdict(
        &self,
        frame: &Frame,
        raw: Vec<BoundingBox>,
        kind: PersonModelKind,
    ) -> (MultiPersonVerdict, Vec<BoundingBox>) {
        let raw_count = raw.len();
        let filtered = self
            .thresholds
            .filter
            .apply(raw, frame.width, frame.height, self.thresholds.confidence);
        let people = suppress_overlaps(filtered, self.thresholds.overlap_iou);

        let locations: Vec<PersonLocation> = people
            .iter()
            .enumerate()
            .map(|(i, b)| PersonLocation::from_box(i + 1, b))
            .collect();
        let confidence = people.iter().map(|b| b.confidence).fold(0.0, f32::max);

        tracing::debug!(
            model = kind.label(),
            raw = raw_count,
            kept = people.len(),
            "person detection"
        );

        let verdict = MultiPersonVerdict {
            num_people: people.len(),
            confidence,
            violation: people.len() > 1,
            using_custom: kind == PersonModelKind::Custom,
            model_type: Some(kind),
            people_locations: locations,
            debug_info: Some(PersonDebugInfo {
                confidence_threshold: self.thresholds.confidence,
                raw_detections: raw_count,
                filtered_detections: people.len(),
            }),
            error: None,
        };
        (verdict, people)
    }
}
