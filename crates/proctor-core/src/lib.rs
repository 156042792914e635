//! proctor-core — exam-proctoring frame analysis.
//!
//! Locates faces with SCRFD, estimates head pose through a classifier →
//! landmark solver → position heuristic chain, counts people with YOLOv8 and
//! judges upper-body visibility. All models run via ONNX Runtime on the CPU.

pub mod body;
pub mod config;
pub mod detector;
pub mod frame;
pub mod head_pose;
pub mod letterbox;
pub mod person;
pub mod postprocess;
pub mod types;
pub mod unified;

pub use config::DetectorConfig;
pub use frame::{Frame, FrameError};
pub use types::{
    BodyMode, BodyVisibilityVerdict, BoundingBox, Direction, HeadPoseMethod, HeadPoseVerdict, MultiPersonVerdict,
    PersonModelKind,
};
pub use unified::{ModelStatus, Pipeline, UnifiedVerdict, WarmupReport};
