//! The full detection pipeline: model loading, per-capability analysis and
//! the merged unified verdict.

use crate::body;
use crate::config::DetectorConfig;
use crate::detector::{FaceDetector, FaceLocator};
use crate::frame::{Frame, FrameError};
use crate::head_pose::{HeadPoseClassifier, HeadPoseEstimator, PoseClassifier};
use crate::person::{MultiPersonDetector, PersonModel, YoloPersonDetector};
use crate::types::{
    BodyMode, BodyVisibilityVerdict, BoundingBox, Direction, HeadPoseMethod, HeadPoseVerdict, MultiPersonVerdict,
    PersonLocation, PersonModelKind,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const WARMUP_SIZE: u32 = 64;
/// Fraction of near-black pixels above which a frame is logged as dark.
const DARK_FRAME_FRACTION: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MultiplePersons,
    HeadPose,
    BodyVisibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplePersonsDetail {
    pub detected: usize,
    pub confidence: f32,
    pub locations: Vec<PersonLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadPoseDetail {
    pub direction: Direction,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyVisibilityDetail {
    pub issue: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_persons: Option<MultiplePersonsDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_pose: Option<HeadPoseDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_visibility: Option<BodyVisibilityDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationReport {
    pub has_violations: bool,
    pub violation_types: Vec<ViolationKind>,
    pub details: ViolationDetails,
    pub total_violations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detections {
    pub multi_person: MultiPersonVerdict,
    pub head_pose: HeadPoseVerdict,
    pub body_visibility: BodyVisibilityVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsUsed {
    /// Person model label, or `"unknown"` when none ran.
    pub multi_person: String,
    pub head_pose: HeadPoseMethod,
    pub body_visibility: BodyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_people: usize,
    pub head_direction: Direction,
    pub body_visible: bool,
    pub overall_violation: bool,
    pub models_used: ModelsUsed,
}

/// Every detector's verdict for one frame plus the merged violation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedVerdict {
    /// RFC 3339, local time.
    pub timestamp: String,
    pub detections: Detections,
    pub violations: ViolationReport,
    pub summary: Summary,
}

impl UnifiedVerdict {
    fn merge(
        multi_person: MultiPersonVerdict,
        head_pose: HeadPoseVerdict,
        body_visibility: BodyVisibilityVerdict,
    ) -> Self {
        let mut types = Vec::new();
        let mut details = ViolationDetails::default();

        if multi_person.violation {
            types.push(ViolationKind::MultiplePersons);
            details.multiple_persons = Some(MultiplePersonsDetail {
                detected: multi_person.num_people,
                confidence: multi_person.confidence,
                locations: multi_person.people_locations.clone(),
            });
        }
        if head_pose.violation {
            types.push(ViolationKind::HeadPose);
            details.head_pose = Some(HeadPoseDetail {
                direction: head_pose.direction,
                confidence: head_pose.confidence,
            });
        }
        if body_visibility.violation {
            types.push(ViolationKind::BodyVisibility);
            details.body_visibility = Some(BodyVisibilityDetail {
                issue: body_visibility.reason.clone(),
                confidence: body_visibility.confidence,
            });
        }

        let total = types.len();
        let summary = Summary {
            total_people: multi_person.num_people,
            head_direction: head_pose.direction,
            body_visible: !body_visibility.violation,
            overall_violation: total > 0,
            models_used: ModelsUsed {
                multi_person: multi_person
                    .model_type
                    .map(|k| k.label().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                head_pose: head_pose.method,
                body_visibility: body_visibility.method,
            },
        };

        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            detections: Detections {
                multi_person,
                head_pose,
                body_visibility,
            },
            violations: ViolationReport {
                has_violations: total > 0,
                violation_types: types,
                details,
                total_violations: total,
            },
            summary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonModelStatus {
    pub custom_model_loaded: bool,
    pub fallback_model_loaded: bool,
    pub currently_using: Option<PersonModelKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadPoseStatus {
    pub classifier_loaded: bool,
    pub classes: Vec<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_size: Option<u32>,
}

/// Which models loaded and what the pipeline falls back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub face_detector_loaded: bool,
    pub multi_person: PersonModelStatus,
    pub head_pose: HeadPoseStatus,
    pub body_mode: BodyMode,
    /// Most recent model load failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupReport {
    pub models_warmed: usize,
    pub elapsed_ms: u64,
}

/// Owns every loaded model. Not `Sync`: callers serialize access, typically
/// from a single inference thread.
pub struct Pipeline {
    config: DetectorConfig,
    faces: Option<Box<dyn FaceLocator>>,
    head_pose: HeadPoseEstimator,
    persons: MultiPersonDetector,
    /// Classes and input size of the loaded classifier.
    classifier_info: Option<(Vec<Direction>, u32)>,
    custom_loaded: bool,
    generic_loaded: bool,
    last_error: Option<String>,
}

impl Pipeline {
    /// Load every model named by `config`.
    ///
    /// Never fails: a model that is missing or broken is logged and its slot
    /// left empty, and the detectors fall back accordingly.
    pub fn load(config: &DetectorConfig) -> Self {
        let mut last_error = None;
        let mut record = |what: &str, e: String| {
            tracing::warn!(model = what, error = %e, "model unavailable");
            last_error = Some(format!("{what}: {e}"));
        };

        let faces: Option<Box<dyn FaceLocator>> = match FaceDetector::load(&config.resolve(&config.models.face)) {
            Ok(d) => Some(Box::new(d)),
            Err(e) => {
                record("face detector", e.to_string());
                None
            }
        };

        let mut classifier_info = None;
        let mut classifier_error = None;
        let classifier: Option<Box<dyn PoseClassifier>> = match HeadPoseClassifier::load(
            &config.resolve(&config.models.head_pose),
            &config.resolve(&config.models.head_pose_info),
        ) {
            Ok(c) => {
                classifier_info = Some((c.classes().to_vec(), c.img_size()));
                Some(Box::new(c))
            }
            Err(e) => {
                classifier_error = Some(e.to_string());
                record("head pose classifier", e.to_string());
                None
            }
        };

        let custom: Option<Box<dyn PersonModel>> =
            match YoloPersonDetector::load(&config.resolve(&config.models.person_custom), &config.person) {
                Ok(d) => Some(Box::new(d)),
                Err(e) => {
                    record("custom person detector", e.to_string());
                    None
                }
            };
        let generic: Option<Box<dyn PersonModel>> =
            match YoloPersonDetector::load(&config.resolve(&config.models.person_generic), &config.person) {
                Ok(d) => Some(Box::new(d)),
                Err(e) => {
                    record("generic person detector", e.to_string());
                    None
                }
            };

        let mut pipeline = Self::from_parts(config.clone(), faces, classifier, custom, generic);
        if let Some(e) = classifier_error {
            pipeline.head_pose = pipeline.head_pose.with_load_error(e);
        }
        pipeline.classifier_info = classifier_info;
        pipeline.last_error = last_error;

        tracing::info!(
            face_detector = pipeline.faces.is_some(),
            head_pose_classifier = pipeline.head_pose.has_classifier(),
            person_model = ?pipeline.persons.model_in_use(),
            body_mode = ?config.body_mode,
            "pipeline ready"
        );
        pipeline
    }

    /// Assemble a pipeline from already-constructed models.
    pub fn from_parts(
        config: DetectorConfig,
        faces: Option<Box<dyn FaceLocator>>,
        classifier: Option<Box<dyn PoseClassifier>>,
        custom: Option<Box<dyn PersonModel>>,
        generic: Option<Box<dyn PersonModel>>,
    ) -> Self {
        let custom_loaded = custom.is_some();
        let generic_loaded = generic.is_some();
        Self {
            head_pose: HeadPoseEstimator::new(classifier, config.head_pose.clone()),
            persons: MultiPersonDetector::new(custom, generic, config.person.clone()),
            config,
            faces,
            classifier_info: None,
            custom_loaded,
            generic_loaded,
            last_error: None,
        }
    }

    /// Run the face locator. `None` when there is none or it failed.
    fn locate_faces(&mut self, frame: &Frame) -> Option<Vec<BoundingBox>> {
        let locator = self.faces.as_mut()?;
        match locator.locate(frame) {
            Ok(faces) => Some(faces),
            Err(e) => {
                tracing::warn!(error = %e, "face location failed");
                None
            }
        }
    }

    pub fn head_pose(&mut self, frame: &Frame) -> HeadPoseVerdict {
        let faces = self.locate_faces(frame);
        self.head_pose.estimate(frame, faces.as_deref())
    }

    pub fn multi_person(&mut self, frame: &Frame) -> MultiPersonVerdict {
        self.persons.detect(frame).0
    }

    pub fn body_visibility(&mut self, frame: &Frame) -> BodyVisibilityVerdict {
        let faces = self.locate_faces(frame);
        let persons = match self.config.body_mode {
            BodyMode::Positional => self.persons.detect(frame).1,
            BodyMode::Simple => Vec::new(),
        };
        body::assess(frame, faces.as_deref(), &persons, self.config.body_mode)
    }

    /// Run every detector on one frame, locating faces only once.
    pub fn analyze(&mut self, frame: &Frame) -> UnifiedVerdict {
        let start = Instant::now();
        if frame.is_dark(DARK_FRAME_FRACTION) {
            tracing::debug!(mean = frame.avg_brightness(), "frame is mostly dark");
        }
        let faces = self.locate_faces(frame);

        let (multi_person, persons) = self.persons.detect(frame);
        let head_pose = self.head_pose.estimate(frame, faces.as_deref());
        let body_visibility = body::assess(frame, faces.as_deref(), &persons, self.config.body_mode);

        let verdict = UnifiedVerdict::merge(multi_person, head_pose, body_visibility);
        tracing::info!(
            people = verdict.summary.total_people,
            head = %verdict.summary.head_direction,
            violations = ?verdict.violations.violation_types,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "frame analyzed"
        );
        verdict
    }

    /// Push a small black frame through every loaded model so the first real
    /// request does not pay for session initialization.
    pub fn warmup(&mut self) -> Result<WarmupReport, FrameError> {
        let start = Instant::now();
        let frame = Frame::solid(WARMUP_SIZE, WARMUP_SIZE, [0, 0, 0])?;

        let mut warmed = 0;
        let faces = self.locate_faces(&frame);
        if faces.is_some() {
            warmed += 1;
        }
        if self.head_pose.has_classifier() {
            warmed += 1;
        }
        self.head_pose.estimate(&frame, faces.as_deref());
        warmed += self.persons.warmup(&frame);

        let report = WarmupReport {
            models_warmed: warmed,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(models = report.models_warmed, elapsed_ms = report.elapsed_ms, "warmup complete");
        Ok(report)
    }

    pub fn status(&self) -> ModelStatus {
        let (classes, img_size) = match &self.classifier_info {
            Some((classes, size)) => (classes.clone(), Some(*size)),
            None => (Vec::new(), None),
        };
        ModelStatus {
            face_detector_loaded: self.faces.is_some(),
            multi_person: PersonModelStatus {
                custom_model_loaded: self.custom_loaded,
                fallback_model_loaded: self.generic_loaded,
                currently_using: self.persons.model_in_use(),
            },
            head_pose: HeadPoseStatus {
                classifier_loaded: self.head_pose.has_classifier(),
                classes,
                img_size,
            },
            body_mode: self.config.body_mode,
            last_error: self.last_error.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
