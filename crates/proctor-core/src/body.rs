//! Body visibility assessment.
//!
//! Deliberately lenient: a frame is only flagged when there is clear evidence
//! the candidate is out of position, or nothing is visible at all.

use crate::frame::Frame;
use crate::types::{largest, BodyMode, BodyVisibilityVerdict, BoundingBox};

const MIN_FACE_SIDE: f32 = 20.0;
const MIN_MEAN_BRIGHTNESS: f32 = 10.0;
const MIN_BRIGHTNESS_STDDEV: f32 = 5.0;
/// Face area above this fraction of the frame means the candidate is too close.
const MAX_FACE_AREA_FRACTION: f32 = 0.5;
/// Face center at or below this fraction of the frame height hides the torso.
const LOW_FACE_FRACTION: f32 = 0.6;

/// Judge whether the upper body is in frame.
///
/// `faces` is `None` when no face locator is loaded, in which case only image
/// content (simple) or person boxes (positional) are considered.
pub fn assess(
    frame: &Frame,
    faces: Option<&[BoundingBox]>,
    persons: &[BoundingBox],
    mode: BodyMode,
) -> BodyVisibilityVerdict {
    let faces = faces.unwrap_or(&[]);
    let mean_brightness = frame.avg_brightness();

    let (visible, confidence, reason) = match mode {
        BodyMode::Simple => simple(frame, faces, mean_brightness),
        BodyMode::Positional => positional(frame, faces, persons),
    };

    tracing::debug!(
        mode = ?mode,
        visible,
        reason,
        faces = faces.len(),
        "body visibility"
    );

    BodyVisibilityVerdict {
        upper_body_visible: visible,
        confidence,
        violation: !visible,
        method: mode,
        reason: reason.to_string(),
        faces_detected: faces.len(),
        mean_brightness,
    }
}

fn simple(frame: &Frame, faces: &[BoundingBox], mean: f32) -> (bool, f32, &'static str) {
    let max_w = frame.width as f32 / 2.0;
    let max_h = frame.height as f32 / 2.0;
    let plausible_face = faces.iter().any(|f| {
        f.width >= MIN_FACE_SIDE && f.height >= MIN_FACE_SIDE && f.width <= max_w && f.height <= max_h
    });
    if plausible_face {
        return (true, 0.95, "face_detected");
    }

    if mean > MIN_MEAN_BRIGHTNESS && frame.brightness_stddev() > MIN_BRIGHTNESS_STDDEV {
        return (true, 0.7, "image_content");
    }

    (false, 0.8, "no_content")
}

fn positional(frame: &Frame, faces: &[BoundingBox], persons: &[BoundingBox]) -> (bool, f32, &'static str) {
    if let Some(face) = largest(faces) {
        let frame_area = (frame.width * frame.height) as f32;
        if face.area() / frame_area > MAX_FACE_AREA_FRACTION {
            return (false, 0.7, "face_too_large");
        }
        let (_, cy) = face.center();
        if cy >= frame.height as f32 * LOW_FACE_FRACTION {
            return (false, 0.6, "face_positioned_low");
        }
        return (true, 0.9, "face_detected_well_positioned");
    }

    if !persons.is_empty() {
        return (true, 0.8, "upper_body_detected");
    }

    (true, 0.5, "no_detection_lenient")
}
