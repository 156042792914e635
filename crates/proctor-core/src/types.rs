use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned detection box in frame pixel coordinates, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    /// Only face detections carry these.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_w = (x2 - x1).max(0.0);
        let inter_h = (y2 - y1).max(0.0);
        let inter_area = inter_w * inter_h;

        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Pick the box with the largest area.
pub fn largest(boxes: &[BoundingBox]) -> Option<&BoundingBox> {
    boxes.iter().max_by(|a, b| {
        a.area()
            .partial_cmp(&b.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Head orientation in image space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Left,
    Right,
    Down,
    Up,
    Unknown,
}

impl Direction {
    /// Looking left, right or down counts against the candidate. Looking up does not.
    pub fn is_looking_away(self) -> bool {
        matches!(self, Direction::Left | Direction::Right | Direction::Down)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Down => "down",
            Direction::Up => "up",
            Direction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "down" => Ok(Direction::Down),
            "up" => Ok(Direction::Up),
            "unknown" => Ok(Direction::Unknown),
            other => Err(format!("unknown head pose class: {other}")),
        }
    }
}

/// Which tier of the head pose chain produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPoseMethod {
    TrainedClassifier,
    LandmarkSolver,
    PositionHeuristic,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadPoseVerdict {
    pub direction: Direction,
    pub confidence: f32,
    pub violation: bool,
    pub method: HeadPoseMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<BoundingBox>,
    /// Error from a higher tier that was skipped on the way to this verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_error: Option<String>,
}

impl HeadPoseVerdict {
    pub(crate) fn new(direction: Direction, confidence: f32, method: HeadPoseMethod) -> Self {
        Self {
            direction,
            confidence,
            violation: false,
            method,
            yaw: None,
            pitch: None,
            face: None,
            model_error: None,
        }
    }
}

/// Which person model produced a multi-person verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonModelKind {
    /// CrowdHuman-trained detector.
    Custom,
    /// Generic COCO-trained detector.
    Generic,
}

impl PersonModelKind {
    pub fn label(self) -> &'static str {
        match self {
            PersonModelKind::Custom => "CrowdHuman Custom",
            PersonModelKind::Generic => "YOLOv8n Fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corners {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// One accepted person detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonLocation {
    pub person_id: usize,
    pub bbox: Corners,
    pub center: Point,
    pub size: Size,
    pub confidence: f32,
    pub aspect_ratio: f32,
}

impl PersonLocation {
    pub fn from_box(person_id: usize, b: &BoundingBox) -> Self {
        let (cx, cy) = b.center();
        Self {
            person_id,
            bbox: Corners {
                x1: b.x,
                y1: b.y,
                x2: b.x + b.width,
                y2: b.y + b.height,
            },
            center: Point { x: cx, y: cy },
            size: Size {
                width: b.width,
                height: b.height,
            },
            confidence: b.confidence,
            aspect_ratio: if b.width > 0.0 { b.height / b.width } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonDebugInfo {
    pub confidence_threshold: f32,
    pub raw_detections: usize,
    pub filtered_detections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPersonVerdict {
    pub num_people: usize,
    pub confidence: f32,
    pub violation: bool,
    pub using_custom: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<PersonModelKind>,
    pub people_locations: Vec<PersonLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<PersonDebugInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MultiPersonVerdict {
    pub(crate) fn empty(error: impl Into<String>) -> Self {
        Self {
            num_people: 0,
            confidence: 0.0,
            violation: false,
            using_custom: false,
            model_type: None,
            people_locations: Vec::new(),
            debug_info: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyMode {
    /// Face or any image content counts as visible; only blank frames are flagged.
    Simple,
    /// Also flags faces that are too large or too low in the frame.
    Positional,
}

impl FromStr for BodyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(BodyMode::Simple),
            "positional" => Ok(BodyMode::Positional),
            other => Err(format!("unknown body visibility mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyVisibilityVerdict {
    pub upper_body_visible: bool,
    pub confidence: f32,
    pub violation: bool,
    pub method: BodyMode,
    pub reason: String,
    pub faces_detected: usize,
    pub mean_brightness: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area() {
        let a = make_bbox(0.0, 0.0, 0.0, 0.0, 1.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_largest_picks_biggest_area() {
        let boxes = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            make_bbox(0.0, 0.0, 30.0, 20.0, 0.5),
            make_bbox(0.0, 0.0, 20.0, 20.0, 0.8),
        ];
        let big = largest(&boxes).unwrap();
        assert_eq!(big.width, 30.0);
        assert!(largest(&[]).is_none());
    }

    #[test]
    fn test_direction_parse_and_display() {
        assert_eq!("Left".parse::<Direction>().unwrap(), Direction::Left);
        assert_eq!(" down ".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Forward.to_string(), "forward");
    }

    #[test]
    fn test_looking_away() {
        assert!(Direction::Left.is_looking_away());
        assert!(Direction::Right.is_looking_away());
        assert!(Direction::Down.is_looking_away());
        assert!(!Direction::Up.is_looking_away());
        assert!(!Direction::Forward.is_looking_away());
        assert!(!Direction::Unknown.is_looking_away());
    }

    #[test]
    fn test_person_location_geometry() {
        let b = BoundingBox::from_corners(10.0, 20.0, 50.0, 100.0, 0.8);
        let loc = PersonLocation::from_box(1, &b);
        assert_eq!(loc.bbox.x2, 50.0);
        assert_eq!(loc.center, Point { x: 30.0, y: 60.0 });
        assert_eq!(loc.size, Size { width: 40.0, height: 80.0 });
        assert!((loc.aspect_ratio - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_verdict_serializes_snake_case() {
        let v = HeadPoseVerdict::new(Direction::Left, 0.7, HeadPoseMethod::LandmarkSolver);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["direction"], "left");
        assert_eq!(json["method"], "landmark_solver");
        assert!(json.get("yaw").is_none());
    }
}
