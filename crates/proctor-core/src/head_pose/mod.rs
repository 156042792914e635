//! Head pose estimation with a three-tier fallback chain.
//!
//! 1. Trained classifier on the face crop (or the whole frame without a face).
//! 2. Weak-perspective solve over the five face landmarks.
//! 3. Position of the face box relative to the frame center.
//!
//! A tier that is unavailable or fails hands over to the next one; the first
//! error encountered is carried on the verdict as `model_error`.

pub mod classifier;
pub mod heuristic;
pub mod landmark;

use crate::config::HeadPoseThresholds;
use crate::frame::Frame;
use crate::types::{largest, BoundingBox, Direction, HeadPoseMethod, HeadPoseVerdict};
pub use classifier::{Classification, ClassifierError, HeadPoseClassifier, PoseClassifier};
use image::RgbImage;

/// Confidence reported when no face locator is available to inspect the frame.
const NO_LOCATOR_CONFIDENCE: f32 = 0.3;

pub struct HeadPoseEstimator {
    classifier: Option<Box<dyn PoseClassifier>>,
    thresholds: HeadPoseThresholds,
    /// Why the classifier is missing, if it failed to load.
    load_error: Option<String>,
}

impl HeadPoseEstimator {
    pub fn new(classifier: Option<Box<dyn PoseClassifier>>, thresholds: HeadPoseThresholds) -> Self {
        Self {
            classifier,
            thresholds,
            load_error: None,
        }
    }

    /// Record why the classifier could not be loaded. Reported on verdicts
    /// produced by the lower tiers.
    pub fn with_load_error(mut self, error: impl Into<String>) -> Self {
        self.load_error = Some(error.into());
        self
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Estimate head pose for one frame.
    ///
    /// `faces` is `None` when no face locator is loaded, and `Some(&[])` when
    /// one ran and found nothing.
    pub fn estimate(&mut self, frame: &Frame, faces: Option<&[BoundingBox]>) -> HeadPoseVerdict {
        let face = faces.and_then(largest).cloned();
        let mut model_error = self.load_error.clone();

        if let Some(classifier) = self.classifier.as_mut() {
            match classify_frame(classifier.as_mut(), frame, face.as_ref(), self.thresholds.crop_margin) {
                Ok(c) => {
                    let mut verdict = HeadPoseVerdict::new(c.direction, c.confidence, HeadPoseMethod::TrainedClassifier);
                    verdict.violation =
                        c.direction.is_looking_away() && c.confidence >= self.thresholds.classifier_confidence;
                    verdict.face = face;
                    tracing::debug!(
                        direction = %verdict.direction,
                        confidence = verdict.confidence,
                        violation = verdict.violation,
                        "head pose from classifier"
                    );
                    return verdict;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "head pose classifier failed, falling back");
                    model_error = Some(e.to_string());
                }
            }
        }

        let mut verdict = self.fallback(frame, faces.is_some(), face);
        verdict.model_error = model_error;
        verdict
    }

    /// Tiers two and three, then the terminal defaults.
    fn fallback(&self, frame: &Frame, has_locator: bool, face: Option<BoundingBox>) -> HeadPoseVerdict {
        let Some(face) = face else {
            return if has_locator {
                HeadPoseVerdict::new(Direction::Unknown, 0.0, HeadPoseMethod::Default)
            } else {
                HeadPoseVerdict::new(Direction::Forward, NO_LOCATOR_CONFIDENCE, HeadPoseMethod::Default)
            };
        };

        if let Some(angles) = face.landmarks.as_ref().and_then(landmark::solve_pose) {
            let (direction, confidence) = landmark::classify_angles(angles, &self.thresholds);
            let mut verdict = HeadPoseVerdict::new(direction, confidence, HeadPoseMethod::LandmarkSolver);
            verdict.violation = direction.is_looking_away();
            verdict.yaw = Some(angles.yaw);
            verdict.pitch = Some(angles.pitch);
            verdict.face = Some(face);
            tracing::debug!(
                yaw = angles.yaw,
                pitch = angles.pitch,
                direction = %direction,
                "head pose from landmarks"
            );
            return verdict;
        }

        let (direction, confidence) = heuristic::position_heuristic(&face, frame.width, frame.height);
        let mut verdict = HeadPoseVerdict::new(direction, confidence, HeadPoseMethod::PositionHeuristic);
        verdict.violation = direction.is_looking_away();
        verdict.face = Some(face);
        verdict
    }
}

fn classify_frame(
    classifier: &mut dyn PoseClassifier,
    frame: &Frame,
    face: Option<&BoundingBox>,
    margin: f32,
) -> Result<Classification, ClassifierError> {
    let crop: Option<RgbImage> = face.and_then(|f| classifier::crop_face(frame, f, margin));
    match crop {
        Some(crop) => classifier.classify(&crop),
        None => classifier.classify(&frame.rgb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Returns a fixed classification and remembers the crop sizes it saw.
    struct FixedClassifier {
        result: Result<Classification, String>,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl PoseClassifier for FixedClassifier {
        fn classify(&mut self, crop: &RgbImage) -> Result<Classification, ClassifierError> {
            self.seen.lock().unwrap().push(crop.dimensions());
            self.result.clone().map_err(ClassifierError::InferenceFailed)
        }
    }

    fn classifier(direction: Direction, confidence: f32) -> (Box<dyn PoseClassifier>, Arc<Mutex<Vec<(u32, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let c = FixedClassifier {
            result: Ok(Classification { direction, confidence }),
            seen: seen.clone(),
        };
        (Box::new(c), seen)
    }

    fn failing_classifier() -> Box<dyn PoseClassifier> {
        Box::new(FixedClassifier {
            result: Err("shape mismatch".into()),
            seen: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn frame() -> Frame {
        Frame::solid(640, 480, [90, 90, 90]).unwrap()
    }

    fn face_at(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::from_corners(cx - 50.0, cy - 50.0, cx + 50.0, cy + 50.0, 0.9)
    }

    fn frontal_landmarks(cx: f32, cy: f32) -> [(f32, f32); 5] {
        [
            (cx - 30.0, cy - 33.0),
            (cx + 30.0, cy - 33.0),
            (cx, cy),
            (cx - 29.0, cy + 29.0),
            (cx + 29.0, cy + 29.0),
        ]
    }

    #[test]
    fn test_classifier_violation_needs_confidence() {
        let (c, _) = classifier(Direction::Left, 0.55);
        let mut est = HeadPoseEstimator::new(Some(c), HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[face_at(320.0, 240.0)]));
        assert_eq!(v.method, HeadPoseMethod::TrainedClassifier);
        assert_eq!(v.direction, Direction::Left);
        assert!(!v.violation);

        let (c, _) = classifier(Direction::Down, 0.8);
        let mut est = HeadPoseEstimator::new(Some(c), HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[face_at(320.0, 240.0)]));
        assert!(v.violation);

        let (c, _) = classifier(Direction::Up, 0.99);
        let mut est = HeadPoseEstimator::new(Some(c), HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[face_at(320.0, 240.0)]));
        assert!(!v.violation);
    }

    #[test]
    fn test_classifier_sees_largest_face_crop() {
        let (c, seen) = classifier(Direction::Forward, 0.9);
        let mut est = HeadPoseEstimator::new(Some(c), HeadPoseThresholds::default());
        let small = BoundingBox::from_corners(10.0, 10.0, 30.0, 30.0, 0.99);
        est.estimate(&frame(), Some(&[small, face_at(320.0, 240.0)]));
        // 100px face + 15px margin each side
        assert_eq!(seen.lock().unwrap().as_slice(), &[(130, 130)]);
    }

    #[test]
    fn test_classifier_uses_whole_frame_without_face() {
        let (c, seen) = classifier(Direction::Forward, 0.9);
        let mut est = HeadPoseEstimator::new(Some(c), HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[]));
        assert_eq!(v.method, HeadPoseMethod::TrainedClassifier);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(640, 480)]);
    }

    #[test]
    fn test_classifier_failure_falls_back_to_landmarks() {
        let mut est = HeadPoseEstimator::new(Some(failing_classifier()), HeadPoseThresholds::default());
        let mut face = face_at(320.0, 240.0);
        face.landmarks = Some(frontal_landmarks(320.0, 240.0));
        let v = est.estimate(&frame(), Some(&[face]));
        assert_eq!(v.method, HeadPoseMethod::LandmarkSolver);
        assert_eq!(v.direction, Direction::Forward);
        assert!(v.yaw.is_some());
        assert!(v.model_error.as_deref().unwrap().contains("shape mismatch"));
    }

    #[test]
    fn test_landmark_tier_without_classifier() {
        let mut est = HeadPoseEstimator::new(None, HeadPoseThresholds::default())
            .with_load_error("model file not found: head_pose.onnx");
        let mut face = face_at(320.0, 240.0);
        face.landmarks = Some(frontal_landmarks(320.0, 240.0));
        let v = est.estimate(&frame(), Some(&[face]));
        assert_eq!(v.method, HeadPoseMethod::LandmarkSolver);
        assert!(!v.violation);
        assert_eq!(v.model_error.as_deref(), Some("model file not found: head_pose.onnx"));
    }

    #[test]
    fn test_heuristic_when_landmarks_missing() {
        let mut est = HeadPoseEstimator::new(None, HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[face_at(400.0, 240.0)]));
        assert_eq!(v.method, HeadPoseMethod::PositionHeuristic);
        assert_eq!(v.direction, Direction::Left);
        assert!(v.violation);
        assert!(v.face.is_some());
    }

    #[test]
    fn test_heuristic_when_landmarks_degenerate() {
        let mut est = HeadPoseEstimator::new(None, HeadPoseThresholds::default());
        let mut face = face_at(320.0, 240.0);
        face.landmarks = Some([(320.0, 240.0); 5]);
        let v = est.estimate(&frame(), Some(&[face]));
        assert_eq!(v.method, HeadPoseMethod::PositionHeuristic);
        assert_eq!(v.direction, Direction::Forward);
    }

    #[test]
    fn test_no_face_found_is_unknown() {
        let mut est = HeadPoseEstimator::new(None, HeadPoseThresholds::default());
        let v = est.estimate(&frame(), Some(&[]));
        assert_eq!(v.direction, Direction::Unknown);
        assert_eq!(v.confidence, 0.0);
        assert_eq!(v.method, HeadPoseMethod::Default);
        assert!(!v.violation);
    }

    #[test]
    fn test_no_locator_defaults_forward() {
        let mut est = HeadPoseEstimator::new(None, HeadPoseThresholds::default());
        let v = est.estimate(&frame(), None);
        assert_eq!(v.direction, Direction::Forward);
        assert_eq!(v.confidence, 0.3);
        assert!(!v.violation);
    }
}
