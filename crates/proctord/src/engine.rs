use proctor_core::{
    BodyVisibilityVerdict, Frame, FrameError, HeadPoseVerdict, ModelStatus, MultiPersonVerdict, Pipeline,
    UnifiedVerdict, WarmupReport,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests the engine thread can have in flight before senders wait.
const QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("warmup failed: {0}")]
    Warmup(#[from] FrameError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    HeadPose {
        frame: Frame,
        reply: oneshot::Sender<HeadPoseVerdict>,
    },
    MultiPerson {
        frame: Frame,
        reply: oneshot::Sender<MultiPersonVerdict>,
    },
    BodyVisibility {
        frame: Frame,
        reply: oneshot::Sender<BodyVisibilityVerdict>,
    },
    Unified {
        frame: Frame,
        reply: oneshot::Sender<UnifiedVerdict>,
    },
    Warmup {
        reply: oneshot::Sender<Result<WarmupReport, FrameError>>,
    },
    Status {
        reply: oneshot::Sender<ModelStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn head_pose(&self, frame: Frame) -> Result<HeadPoseVerdict, EngineError> {
        self.call(|reply| EngineRequest::HeadPose { frame, reply }).await
    }

    pub async fn multi_person(&self, frame: Frame) -> Result<MultiPersonVerdict, EngineError> {
        self.call(|reply| EngineRequest::MultiPerson { frame, reply }).await
    }

    pub async fn body_visibility(&self, frame: Frame) -> Result<BodyVisibilityVerdict, EngineError> {
        self.call(|reply| EngineRequest::BodyVisibility { frame, reply }).await
    }

    pub async fn unified(&self, frame: Frame) -> Result<UnifiedVerdict, EngineError> {
        self.call(|reply| EngineRequest::Unified { frame, reply }).await
    }

    pub async fn warmup(&self) -> Result<WarmupReport, EngineError> {
        Ok(self.call(|reply| EngineRequest::Warmup { reply }).await??)
    }

    pub async fn status(&self) -> Result<ModelStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread that owns every ONNX session.
///
/// With `warmup` set, a black frame is pushed through the loaded models
/// before the request loop starts.
pub fn spawn_engine(mut pipeline: Pipeline, warmup: bool) -> Result<EngineHandle, EngineError> {
    if warmup {
        pipeline.warmup()?;
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("proctor-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::HeadPose { frame, reply } => {
                        let _ = reply.send(pipeline.head_pose(&frame));
                    }
                    EngineRequest::MultiPerson { frame, reply } => {
                        let _ = reply.send(pipeline.multi_person(&frame));
                    }
                    EngineRequest::BodyVisibility { frame, reply } => {
                        let _ = reply.send(pipeline.body_visibility(&frame));
                    }
                    EngineRequest::Unified { frame, reply } => {
                        let _ = reply.send(pipeline.analyze(&frame));
                    }
                    EngineRequest::Warmup { reply } => {
                        let _ = reply.send(pipeline.warmup());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(pipeline.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
