//! JSON-lines request handling.
//!
//! One request object per line in, one response object per line out. Image
//! capabilities carry a base64 frame; responses echo `id` and `user_id`.

use crate::engine::{EngineError, EngineHandle};
use proctor_core::{Frame, FrameError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    HeadPose,
    MultiPerson,
    BodyVisibility,
    Unified,
    Status,
    Warmup,
}

impl Capability {
    fn needs_image(self) -> bool {
        matches!(
            self,
            Capability::HeadPose | Capability::MultiPerson | Capability::BodyVisibility | Capability::Unified
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub capability: Capability,
    #[serde(default)]
    pub image_b64: Option<String>,
    /// Echoed back unchanged, whatever its JSON type.
    #[serde(default)]
    pub user_id: Option<Value>,
}

/// Why a request could not be answered. The message is sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("image_b64 required")]
    MissingImage,
    #[error("invalid base64 image")]
    InvalidBase64,
    #[error("invalid image")]
    InvalidImage,
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<FrameError> for DispatchError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::MissingPayload => DispatchError::MissingImage,
            FrameError::InvalidBase64(_) => DispatchError::InvalidBase64,
            FrameError::InvalidImage(_) | FrameError::EmptyImage => DispatchError::InvalidImage,
        }
    }
}

/// Answers requests against a running engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: EngineHandle,
    timeout: Duration,
    /// Bounds image requests between decode and reply, so queued requests
    /// do not each hold a decoded frame.
    frames: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(engine: EngineHandle, timeout: Duration, max_frames: usize) -> Self {
        Self {
            engine,
            timeout,
            frames: Arc::new(Semaphore::new(max_frames.max(1))),
        }
    }

    /// Handle one input line. Always produces a response object.
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                // Salvage the id so the client can match the error.
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").cloned());
                tracing::debug!(error = %e, "unparseable request");
                return error_response(id, &DispatchError::BadRequest(e.to_string()));
            }
        };

        let id = request.id.clone();
        let capability = request.capability;
        match tokio::time::timeout(self.timeout, self.handle(request)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                tracing::warn!(?capability, error = %e, "request failed");
                error_response(id, &e)
            }
            Err(_) => error_response(id, &DispatchError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn handle(&self, request: Request) -> Result<Value, DispatchError> {
        let Request {
            id,
            capability,
            image_b64,
            user_id,
        } = request;

        let (frame, _permit) = if capability.needs_image() {
            let payload = image_b64.ok_or(DispatchError::MissingImage)?;
            let permit = self
                .frames
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            (Some(decode_frame(payload).await?), Some(permit))
        } else {
            (None, None)
        };

        let body = match (capability, frame) {
            (Capability::HeadPose, Some(frame)) => serde_json::to_value(self.engine.head_pose(frame).await?)?,
            (Capability::MultiPerson, Some(frame)) => {
                serde_json::to_value(self.engine.multi_person(frame).await?)?
            }
            (Capability::BodyVisibility, Some(frame)) => {
                serde_json::to_value(self.engine.body_visibility(frame).await?)?
            }
            (Capability::Unified, Some(frame)) => serde_json::to_value(self.engine.unified(frame).await?)?,
            (Capability::Status, _) => serde_json::to_value(self.engine.status().await?)?,
            (Capability::Warmup, _) => serde_json::to_value(self.engine.warmup().await?)?,
            (_, None) => return Err(DispatchError::MissingImage),
        };

        Ok(with_envelope(body, id, user_id))
    }
}

/// Decode off the async runtime; large JPEGs take a while.
async fn decode_frame(payload: String) -> Result<Frame, DispatchError> {
    tokio::task::spawn_blocking(move || Frame::from_base64(&payload))
        .await
        .map_err(|_| DispatchError::InvalidImage)?
        .map_err(DispatchError::from)
}

fn with_envelope(body: Value, id: Option<Value>, user_id: Option<Value>) -> Value {
    let mut obj = match body {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    };
    if let Some(user_id) = user_id {
        obj.insert("user_id".into(), user_id);
    }
    if let Some(id) = id {
        obj.insert("id".into(), id);
    }
    Value::Object(obj)
}

fn error_response(id: Option<Value>, error: &DispatchError) -> Value {
    json!({
        "id": id.unwrap_or(Value::Null),
        "error": error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use proctor_core::person::{PersonError, PersonModel};
    use proctor_core::{BoundingBox, DetectorConfig, Pipeline};

    fn dispatcher() -> Dispatcher {
        let pipeline = Pipeline::from_parts(DetectorConfig::default(), None, None, None, None);
        Dispatcher::new(spawn_engine(pipeline, false).unwrap(), Duration::from_secs(10), 8)
    }

    /// Person model that holds the engine thread for a while.
    struct SlowPersons(Duration);

    impl PersonModel for SlowPersons {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, PersonError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    fn slow_dispatcher(timeout: Duration, max_frames: usize) -> Dispatcher {
        let pipeline = Pipeline::from_parts(
            DetectorConfig::default(),
            None,
            None,
            Some(Box::new(SlowPersons(Duration::from_secs(1)))),
            None,
        );
        Dispatcher::new(spawn_engine(pipeline, false).unwrap(), timeout, max_frames)
    }

    fn png_b64() -> String {
        use base64::Engine;
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
    }

    #[tokio::test]
    async fn test_unified_echoes_ids() {
        let d = dispatcher();
        let line = json!({
            "id": 7,
            "capability": "unified",
            "image_b64": format!("data:image/png;base64,{}", png_b64()),
            "user_id": "student-42",
        })
        .to_string();
        let resp = d.handle_line(&line).await;
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["user_id"], "student-42");
        assert!(resp["violations"]["has_violations"].as_bool().unwrap());
        assert_eq!(resp["violations"]["violation_types"], json!(["body_visibility"]));
    }

    #[tokio::test]
    async fn test_head_pose_without_face_locator() {
        let d = dispatcher();
        let line = json!({"capability": "head_pose", "image_b64": png_b64()}).to_string();
        let resp = d.handle_line(&line).await;
        assert_eq!(resp["direction"], "forward");
        assert_eq!(resp["method"], "default");
        assert!(resp.get("id").is_none());
    }

    #[tokio::test]
    async fn test_missing_image() {
        let d = dispatcher();
        let resp = d.handle_line(r#"{"id": "a", "capability": "multi_person"}"#).await;
        assert_eq!(resp["id"], "a");
        assert_eq!(resp["error"], "image_b64 required");
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let d = dispatcher();
        let resp = d
            .handle_line(r#"{"id": 1, "capability": "head_pose", "image_b64": "%%%not-base64%%%"}"#)
            .await;
        assert_eq!(resp["error"], "invalid base64 image");
    }

    #[tokio::test]
    async fn test_invalid_image() {
        let d = dispatcher();
        // "hello" in base64: valid encoding, not an image.
        let resp = d
            .handle_line(r#"{"id": 1, "capability": "body_visibility", "image_b64": "aGVsbG8="}"#)
            .await;
        assert_eq!(resp["error"], "invalid image");
    }

    #[tokio::test]
    async fn test_garbage_line_keeps_id_when_possible() {
        let d = dispatcher();
        let resp = d.handle_line(r#"{"id": 3, "capability": "teleport"}"#).await;
        assert_eq!(resp["id"], 3);
        assert!(resp["error"].as_str().unwrap().starts_with("invalid request"));

        let resp = d.handle_line("this is not json").await;
        assert!(resp["id"].is_null());
        assert!(resp["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_and_warmup_need_no_image() {
        let d = dispatcher();
        let resp = d.handle_line(r#"{"id": 1, "capability": "status"}"#).await;
        assert_eq!(resp["face_detector_loaded"], false);
        assert_eq!(resp["body_mode"], "simple");

        let resp = d.handle_line(r#"{"id": 2, "capability": "warmup"}"#).await;
        assert_eq!(resp["models_warmed"], 0);
        assert_eq!(resp["id"], 2);
    }

    #[tokio::test]
    async fn test_numeric_user_id_echoed() {
        let d = dispatcher();
        let resp = d.handle_line(r#"{"id": 1, "capability": "status", "user_id": 42}"#).await;
        assert!(resp.get("error").is_none());
        assert_eq!(resp["user_id"], 42);
        assert_eq!(resp["id"], 1);

        let line = json!({"capability": "head_pose", "image_b64": png_b64(), "user_id": {"exam": 3}}).to_string();
        let resp = d.handle_line(&line).await;
        assert_eq!(resp["user_id"], json!({"exam": 3}));
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        let d = slow_dispatcher(Duration::from_millis(100), 8);
        let line = json!({"id": 9, "capability": "multi_person", "image_b64": png_b64()}).to_string();
        let resp = d.handle_line(&line).await;
        assert_eq!(resp["id"], 9);
        assert!(resp["error"].as_str().unwrap().starts_with("request timed out after"));
    }

    #[tokio::test]
    async fn test_frames_in_flight_are_bounded() {
        let d = slow_dispatcher(Duration::from_secs(10), 1);
        let busy = {
            let d = d.clone();
            let line = json!({"capability": "multi_person", "image_b64": png_b64()}).to_string();
            tokio::spawn(async move { d.handle_line(&line).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Shares the single frame slot but gives up sooner. It never gets to
        // decoding while the first frame holds the slot.
        let mut impatient = d.clone();
        impatient.timeout = Duration::from_millis(100);
        let resp = impatient
            .handle_line(r#"{"id": 2, "capability": "head_pose", "image_b64": "%%%not-base64%%%"}"#)
            .await;
        assert_eq!(resp["id"], 2);
        assert!(resp["error"].as_str().unwrap().starts_with("request timed out"));

        let first = busy.await.unwrap();
        assert_eq!(first["num_people"], 0);
        assert!(first.get("error").is_none());
    }

    #[test]
    fn test_envelope_wraps_non_objects() {
        let v = with_envelope(json!(5), Some(json!("x")), None);
        assert_eq!(v, json!({"result": 5, "id": "x"}));
    }
}
