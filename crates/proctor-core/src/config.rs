//! Detector configuration: model locations and tunable thresholds.

use crate::postprocess::PersonFilter;
use crate::types::BodyMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory searched after the configured model directory.
const LOCAL_MODEL_DIR: &str = "models";

/// Default model directory: `$XDG_DATA_HOME/proctor/models`, or
/// `~/.local/share/proctor/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("proctor/models")
}

/// ONNX model file names, resolved against the model directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFiles {
    /// SCRFD face detector.
    pub face: String,
    /// Trained head pose classifier.
    pub head_pose: String,
    /// Classifier metadata (`classes`, `img_size`, `layout`).
    pub head_pose_info: String,
    /// CrowdHuman-trained person detector.
    pub person_custom: String,
    /// Generic COCO person detector.
    pub person_generic: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            face: "det_10g.onnx".into(),
            head_pose: "head_pose_mobilenet.onnx".into(),
            head_pose_info: "head_pose_mobilenet_info.json".into(),
            person_custom: "crowdhuman_custom.onnx".into(),
            person_generic: "yolov8n.onnx".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseThresholds {
    /// Minimum classifier confidence for a looking-away class to count as a violation.
    pub classifier_confidence: f32,
    /// |yaw| in degrees at which the solver reports left/right.
    pub yaw_degrees: f32,
    /// |pitch| in degrees at which the solver reports up/down.
    pub pitch_degrees: f32,
    /// Fraction of the face box added on every side before classification.
    pub crop_margin: f32,
}

impl Default for HeadPoseThresholds {
    fn default() -> Self {
        Self {
            classifier_confidence: 0.6,
            yaw_degrees: 20.0,
            pitch_degrees: 15.0,
            crop_margin: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonThresholds {
    pub confidence: f32,
    /// IoU for the model-level NMS right after decoding.
    pub nms_iou: f32,
    /// IoU for the overlap pass after geometric filtering.
    pub overlap_iou: f32,
    pub filter: PersonFilter,
}

impl Default for PersonThresholds {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            nms_iou: 0.4,
            overlap_iou: 0.5,
            filter: PersonFilter::default(),
        }
    }
}

/// Everything the detection pipeline needs to load and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    pub models: ModelFiles,
    pub head_pose: HeadPoseThresholds,
    pub person: PersonThresholds,
    pub body_mode: BodyMode,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            models: ModelFiles::default(),
            head_pose: HeadPoseThresholds::default(),
            person: PersonThresholds::default(),
            body_mode: BodyMode::Simple,
        }
    }
}

impl DetectorConfig {
    /// Resolve a model file name to an existing path.
    ///
    /// Absolute names are used as-is. Relative names are looked up in the
    /// configured model directory, then in `./models`. Returns the first
    /// candidate when none exists so errors name the preferred location.
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.resolve_with_fallback(name, Path::new(LOCAL_MODEL_DIR))
    }

    fn resolve_with_fallback(&self, name: &str, fallback: &Path) -> PathBuf {
        let name = Path::new(name);
        if name.is_absolute() {
            return name.to_path_buf();
        }
        let candidates = [self.model_dir.join(name), fallback.join(name)];
        candidates
            .iter()
            .find(|p| p.exists())
            .unwrap_or(&candidates[0])
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.head_pose.classifier_confidence, 0.6);
        assert_eq!(cfg.head_pose.yaw_degrees, 20.0);
        assert_eq!(cfg.head_pose.pitch_degrees, 15.0);
        assert_eq!(cfg.person.confidence, 0.25);
        assert_eq!(cfg.person.overlap_iou, 0.5);
        assert_eq!(cfg.body_mode, BodyMode::Simple);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: DetectorConfig = toml::from_str(
            r#"
            model_dir = "/opt/proctor/models"
            body_mode = "positional"

            [person]
            confidence = 0.4

            [person.filter]
            edge_margin = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(cfg.model_dir, PathBuf::from("/opt/proctor/models"));
        assert_eq!(cfg.body_mode, BodyMode::Positional);
        assert_eq!(cfg.person.confidence, 0.4);
        assert_eq!(cfg.person.nms_iou, 0.4);
        assert_eq!(cfg.person.filter.edge_margin, 0.05);
        assert_eq!(cfg.person.filter.min_width, 12.0);
        assert_eq!(cfg.models.face, "det_10g.onnx");
    }

    #[test]
    fn test_resolve_absolute_and_missing() {
        let cfg = DetectorConfig {
            model_dir: PathBuf::from("/nonexistent/proctor"),
            ..DetectorConfig::default()
        };
        assert_eq!(cfg.resolve("/abs/model.onnx"), PathBuf::from("/abs/model.onnx"));
        assert_eq!(
            cfg.resolve("missing.onnx"),
            PathBuf::from("/nonexistent/proctor/missing.onnx")
        );
    }

    #[test]
    fn test_resolve_prefers_model_dir_then_fallback() {
        let root = std::env::temp_dir().join(format!("proctor-resolve-{}", std::process::id()));
        let primary = root.join("primary");
        let local = root.join("models");
        std::fs::create_dir_all(&primary).unwrap();
        std::fs::create_dir_all(&local).unwrap();
        std::fs::write(local.join("face.onnx"), b"").unwrap();
        std::fs::write(local.join("person.onnx"), b"").unwrap();
        std::fs::write(primary.join("person.onnx"), b"").unwrap();

        let cfg = DetectorConfig {
            model_dir: primary.clone(),
            ..DetectorConfig::default()
        };
        assert_eq!(cfg.resolve_with_fallback("face.onnx", &local), local.join("face.onnx"));
        assert_eq!(cfg.resolve_with_fallback("person.onnx", &local), primary.join("person.onnx"));
        assert_eq!(cfg.resolve_with_fallback("none.onnx", &local), primary.join("none.onnx"));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
