//! Last-resort head pose from where the face sits in the frame.
//!
//! A candidate looking away tends to drift the face off-center, so the
//! offset of the face center from the frame center, measured in half face
//! sizes, stands in for the head angle.

use crate::types::{BoundingBox, Direction};

const HORIZONTAL_OFFSET: f32 = 0.4;
const VERTICAL_OFFSET: f32 = 0.3;
const BASE_CONFIDENCE: f32 = 0.5;
const MAX_CONFIDENCE: f32 = 0.9;

/// Classify head direction from the face box position.
///
/// A face right of center reads as looking left and vice versa.
pub fn position_heuristic(face: &BoundingBox, frame_width: u32, frame_height: u32) -> (Direction, f32) {
    let (face_cx, face_cy) = face.center();
    let dx = face_cx - frame_width as f32 / 2.0;
    let dy = face_cy - frame_height as f32 / 2.0;

    let dx_norm = if face.width > 0.0 { dx / (face.width / 2.0) } else { 0.0 };
    let dy_norm = if face.height > 0.0 { dy / (face.height / 2.0) } else { 0.0 };

    if dx_norm.abs() > dy_norm.abs() {
        let confidence = MAX_CONFIDENCE.min(BASE_CONFIDENCE + dx_norm.abs() * 0.4);
        if dx_norm > HORIZONTAL_OFFSET {
            return (Direction::Left, confidence);
        }
        if dx_norm < -HORIZONTAL_OFFSET {
            return (Direction::Right, confidence);
        }
    } else {
        let confidence = MAX_CONFIDENCE.min(BASE_CONFIDENCE + dy_norm.abs() * 0.5);
        if dy_norm > VERTICAL_OFFSET {
            return (Direction::Down, confidence);
        }
        if dy_norm < -VERTICAL_OFFSET {
            return (Direction::Up, confidence);
        }
    }

    (Direction::Forward, BASE_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(cx: f32, cy: f32, size: f32) -> BoundingBox {
        BoundingBox::from_corners(cx - size / 2.0, cy - size / 2.0, cx + size / 2.0, cy + size / 2.0, 0.9)
    }

    #[test]
    fn test_centered_face_is_forward() {
        let (d, c) = position_heuristic(&face_at(320.0, 240.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Forward);
        assert_eq!(c, 0.5);
    }

    #[test]
    fn test_face_right_of_center_reads_left() {
        // dx = 30 → dx_norm = 0.6
        let (d, c) = position_heuristic(&face_at(350.0, 240.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Left);
        assert!((c - 0.74).abs() < 1e-5);
    }

    #[test]
    fn test_face_left_of_center_reads_right() {
        let (d, _) = position_heuristic(&face_at(250.0, 240.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Right);
    }

    #[test]
    fn test_face_low_reads_down() {
        // dy = 25 → dy_norm = 0.5
        let (d, c) = position_heuristic(&face_at(320.0, 265.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Down);
        assert!((c - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_face_high_reads_up() {
        let (d, _) = position_heuristic(&face_at(320.0, 200.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Up);
    }

    #[test]
    fn test_small_offset_stays_forward() {
        // dx_norm = 0.3, below the horizontal cutoff
        let (d, c) = position_heuristic(&face_at(335.0, 240.0, 100.0), 640, 480);
        assert_eq!(d, Direction::Forward);
        assert_eq!(c, 0.5);
    }

    #[test]
    fn test_confidence_is_capped() {
        let (d, c) = position_heuristic(&face_at(600.0, 240.0, 40.0), 640, 480);
        assert_eq!(d, Direction::Left);
        assert_eq!(c, 0.9);
    }
}
