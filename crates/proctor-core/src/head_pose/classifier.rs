//! Trained head pose classifier (MobileNetV2 export) via ONNX Runtime.
//!
//! The network takes a face crop scaled to `[0, 1]` and returns one probability
//! per direction class. Class order and input size come from a JSON sidecar
//! written at training time.

use crate::frame::Frame;
use crate::types::{BoundingBox, Direction};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CLASSES: [&str; 5] = ["forward", "left", "right", "down", "up"];
const DEFAULT_IMG_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid model info {path}: {reason}")]
    InvalidInfo { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Result of classifying one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub direction: Direction,
    pub confidence: f32,
}

/// Anything that maps a face crop to a head direction.
pub trait PoseClassifier: Send {
    fn classify(&mut self, crop: &RgbImage) -> Result<Classification, ClassifierError>;
}

/// Input tensor memory layout. Keras exports are channels-last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

/// Sidecar metadata describing the classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub classes: Vec<String>,
    pub img_size: u32,
    pub layout: TensorLayout,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            classes: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),
            img_size: DEFAULT_IMG_SIZE,
            layout: TensorLayout::Nhwc,
        }
    }
}

impl ModelInfo {
    /// Read the sidecar at `info_path`, then `<model>_info.json`; defaults if neither exists.
    pub fn locate(info_path: &Path, model_path: &Path) -> Result<Self, ClassifierError> {
        let sibling = sidecar_path(model_path);
        let Some(path) = [info_path, sibling.as_path()].into_iter().find(|p| p.exists()) else {
            tracing::info!(
                classes = ?DEFAULT_CLASSES,
                img_size = DEFAULT_IMG_SIZE,
                "no head pose model info found, using defaults"
            );
            return Ok(Self::default());
        };

        let invalid = |reason: String| ClassifierError::InvalidInfo {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let info: ModelInfo = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
        info.directions().map_err(invalid)?;
        if info.img_size == 0 {
            return Err(invalid("img_size must be positive".into()));
        }
        Ok(info)
    }

    /// Parse class names into directions, rejecting unknown labels.
    pub fn directions(&self) -> Result<Vec<Direction>, String> {
        if self.classes.is_empty() {
            return Err("classes must not be empty".into());
        }
        self.classes.iter().map(|c| c.parse()).collect()
    }
}

/// `head_pose.onnx` → `head_pose_info.json`
fn sidecar_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    model_path.with_file_name(format!("{stem}_info.json"))
}

/// ONNX-backed head pose classifier.
pub struct HeadPoseClassifier {
    session: Session,
    classes: Vec<Direction>,
    img_size: u32,
    layout: TensorLayout,
}

impl HeadPoseClassifier {
    pub fn load(model_path: &Path, info_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let info = ModelInfo::locate(info_path, model_path)?;
        let classes = info.directions().map_err(|reason| ClassifierError::InvalidInfo {
            path: info_path.display().to_string(),
            reason,
        })?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            classes = ?classes,
            img_size = info.img_size,
            layout = ?info.layout,
            "loaded head pose classifier"
        );

        Ok(Self {
            session,
            classes,
            img_size: info.img_size,
            layout: info.layout,
        })
    }

    pub fn classes(&self) -> &[Direction] {
        &self.classes
    }

    pub fn img_size(&self) -> u32 {
        self.img_size
    }
}

impl PoseClassifier for HeadPoseClassifier {
    fn classify(&mut self, crop: &RgbImage) -> Result<Classification, ClassifierError> {
        let input = preprocess(crop, self.img_size, self.layout);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("class scores: {e}")))?;

        pick_class(raw, &self.classes)
    }
}

/// Resize a crop to `size × size` and scale to `[0, 1]` in the requested layout.
fn preprocess(crop: &RgbImage, size: u32, layout: TensorLayout) -> Array4<f32> {
    let resized = imageops::resize(crop, size, size, FilterType::Triangle);
    let s = size as usize;

    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, s, s)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    tensor
}

/// Argmax over class scores. Raw logits are passed through softmax first.
fn pick_class(scores: &[f32], classes: &[Direction]) -> Result<Classification, ClassifierError> {
    if scores.len() != classes.len() {
        return Err(ClassifierError::InferenceFailed(format!(
            "expected {} class scores, got {}",
            classes.len(),
            scores.len()
        )));
    }

    let sum: f32 = scores.iter().sum();
    let is_distribution = scores.iter().all(|&p| (0.0..=1.0).contains(&p)) && (sum - 1.0).abs() < 1e-3;
    let probs: Vec<f32> = if is_distribution {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let (idx, &confidence) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| ClassifierError::InferenceFailed("empty class scores".into()))?;

    Ok(Classification {
        direction: classes[idx],
        confidence,
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Crop the face region expanded by `margin` of its size on every side,
/// clamped to the frame. Returns `None` if nothing is left after clamping.
pub fn crop_face(frame: &Frame, face: &BoundingBox, margin: f32) -> Option<RgbImage> {
    let pad_x = (margin * face.width).trunc();
    let pad_y = (margin * face.height).trunc();

    let x0 = (face.x - pad_x).max(0.0) as u32;
    let y0 = (face.y - pad_y).max(0.0) as u32;
    let x1 = ((face.x + face.width + pad_x).max(0.0) as u32).min(frame.width);
    let y1 = ((face.y + face.height + pad_y).max(0.0) as u32).min(frame.height);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(&frame.rgb, x0, y0, x1 - x0, y1 - y0).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_classes() -> Vec<Direction> {
        ModelInfo::default().directions().unwrap()
    }

    #[test]
    fn test_default_info() {
        let info = ModelInfo::default();
        assert_eq!(info.img_size, 160);
        assert_eq!(info.layout, TensorLayout::Nhwc);
        assert_eq!(
            default_classes(),
            vec![Direction::Forward, Direction::Left, Direction::Right, Direction::Down, Direction::Up]
        );
    }

    #[test]
    fn test_info_json_partial() {
        let info: ModelInfo =
            serde_json::from_str(r#"{"classes": ["up", "down"], "num_classes": 2}"#).unwrap();
        assert_eq!(info.img_size, 160);
        assert_eq!(info.directions().unwrap(), vec![Direction::Up, Direction::Down]);
    }

    #[test]
    fn test_info_rejects_unknown_class() {
        let info: ModelInfo = serde_json::from_str(r#"{"classes": ["forward", "sideways"]}"#).unwrap();
        assert!(info.directions().is_err());
    }

    #[test]
    fn test_locate_missing_files_uses_defaults() {
        let info = ModelInfo::locate(
            Path::new("/nonexistent/info.json"),
            Path::new("/nonexistent/model.onnx"),
        )
        .unwrap();
        assert_eq!(info.classes.len(), 5);
    }

    #[test]
    fn test_locate_reads_sibling_sidecar() {
        let dir = std::env::temp_dir().join(format!("proctor-info-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let model = dir.join("pose.onnx");
        std::fs::write(dir.join("pose_info.json"), r#"{"classes": ["left", "right"], "img_size": 96}"#)
            .unwrap();

        let info = ModelInfo::locate(&dir.join("absent.json"), &model).unwrap();
        assert_eq!(info.img_size, 96);
        assert_eq!(info.directions().unwrap(), vec![Direction::Left, Direction::Right]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/m/head_pose.onnx")),
            PathBuf::from("/m/head_pose_info.json")
        );
    }

    #[test]
    fn test_pick_class_probabilities() {
        let c = pick_class(&[0.1, 0.05, 0.7, 0.1, 0.05], &default_classes()).unwrap();
        assert_eq!(c.direction, Direction::Right);
        assert!((c.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_pick_class_logits_go_through_softmax() {
        let c = pick_class(&[0.0, 0.0, 0.0, 5.0, 0.0], &default_classes()).unwrap();
        assert_eq!(c.direction, Direction::Down);
        assert!(c.confidence > 0.9 && c.confidence < 1.0);
    }

    #[test]
    fn test_pick_class_length_mismatch() {
        assert!(pick_class(&[0.5, 0.5], &default_classes()).is_err());
    }

    #[test]
    fn test_preprocess_layouts() {
        let crop = RgbImage::from_pixel(40, 30, image::Rgb([255, 0, 51]));

        let nhwc = preprocess(&crop, 16, TensorLayout::Nhwc);
        assert_eq!(nhwc.shape(), &[1, 16, 16, 3]);
        assert!((nhwc[[0, 5, 5, 0]] - 1.0).abs() < 0.01);
        assert!((nhwc[[0, 5, 5, 2]] - 0.2).abs() < 0.01);

        let nchw = preprocess(&crop, 16, TensorLayout::Nchw);
        assert_eq!(nchw.shape(), &[1, 3, 16, 16]);
        assert!(nchw[[0, 1, 5, 5]].abs() < 0.01);
    }

    #[test]
    fn test_crop_face_adds_margin() {
        let frame = Frame::solid(200, 100, [0, 0, 0]).unwrap();
        let face = BoundingBox::from_corners(50.0, 20.0, 90.0, 60.0, 0.9);
        let crop = crop_face(&frame, &face, 0.15).unwrap();
        // 40px face + 6px on each side
        assert_eq!(crop.dimensions(), (52, 52));
    }

    #[test]
    fn test_crop_face_clamps_to_frame() {
        let frame = Frame::solid(100, 100, [0, 0, 0]).unwrap();
        let face = BoundingBox::from_corners(-10.0, 80.0, 30.0, 120.0, 0.9);
        let crop = crop_face(&frame, &face, 0.15).unwrap();
        assert_eq!(crop.dimensions(), (36, 26));
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = Frame::solid(100, 100, [0, 0, 0]).unwrap();
        let face = BoundingBox::from_corners(150.0, 150.0, 180.0, 180.0, 0.9);
        assert!(crop_face(&frame, &face, 0.15).is_none());
    }
}
