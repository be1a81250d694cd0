use crate::backend::{Backend, BackendError};
use crate::config::Config;
use facegate_core::{
    Acceptance, AcceptTicket, CaptureMode, CaptureStatus, CheckTicket, EnrollmentBatch,
    FaceLandmarker, HysteresisConfig, KeypointFrame, LandmarkError, LandmarkSource, OcclusionGate,
    Resolution, Session, SessionError, StillImage, VerifyOutcome,
};
use facegate_hw::{Camera, CameraError, Frame, FrameError, FrameSource};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("landmark model error: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("still encoding failed: {0}")]
    Encode(#[from] FrameError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no capture session is active")]
    NoActiveSession,
    #[error("subject name must not be empty")]
    InvalidSubject,
    #[error("no camera frame captured yet")]
    NoFrame,
    #[error("capture session ended before the request completed")]
    SessionEnded,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Tunables the engine thread needs from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub hysteresis: HysteresisConfig,
    pub occlusion_interval: Duration,
    pub jpeg_quality: u8,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            hysteresis: config.hysteresis,
            occlusion_interval: config.occlusion_interval(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages handled by the engine thread: caller requests plus completions
/// posted back by the tasks it spawns.
enum EngineRequest {
    StartEnrollment {
        subject: String,
        reply: Reply<CaptureStatus>,
    },
    StartVerification {
        reply: Reply<CaptureStatus>,
    },
    Status {
        reply: oneshot::Sender<Option<CaptureStatus>>,
    },
    SkipStep {
        reply: Reply<CaptureStatus>,
    },
    Capture {
        reply: Reply<VerifyOutcome>,
    },
    Submit {
        reply: Reply<String>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    StillReady {
        ticket: AcceptTicket,
        result: Result<StillImage, EngineError>,
    },
    OcclusionChecked {
        ticket: CheckTicket,
        result: Result<bool, EngineError>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Begin a guided enrollment for `subject`, replacing any active session.
    pub async fn start_enrollment(&self, subject: String) -> Result<CaptureStatus, EngineError> {
        self.request(|reply| EngineRequest::StartEnrollment { subject, reply })
            .await?
    }

    pub async fn start_verification(&self) -> Result<CaptureStatus, EngineError> {
        self.request(|reply| EngineRequest::StartVerification { reply })
            .await?
    }

    /// Snapshot of the active session, `None` when idle.
    pub async fn status(&self) -> Result<Option<CaptureStatus>, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Accept the current enrollment step with the latest frame.
    pub async fn skip_step(&self) -> Result<CaptureStatus, EngineError> {
        self.request(|reply| EngineRequest::SkipStep { reply }).await?
    }

    /// Capture one still and run it through recognition.
    pub async fn capture(&self) -> Result<VerifyOutcome, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    /// Submit the finished enrollment batch. The session is left as is.
    pub async fn submit(&self) -> Result<String, EngineError> {
        self.request(|reply| EngineRequest::Submit { reply }).await?
    }

    /// End the active session. Returns whether one was running.
    pub async fn stop(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }
}

struct ActiveCapture {
    session: Session,
    subject: Option<String>,
    pending_capture: Option<Reply<VerifyOutcome>>,
}

struct Engine<S, L, B> {
    frames: S,
    landmarks: L,
    backend: Arc<B>,
    settings: Settings,
    runtime: Handle,
    events: mpsc::WeakSender<EngineRequest>,
    gate: OcclusionGate,
    active: Option<ActiveCapture>,
    last_frame: Option<Frame>,
}

impl<S, L, B> Engine<S, L, B>
where
    S: FrameSource,
    L: LandmarkSource,
    B: Backend,
{
    fn new(
        frames: S,
        landmarks: L,
        backend: Arc<B>,
        settings: Settings,
        runtime: Handle,
        events: mpsc::WeakSender<EngineRequest>,
    ) -> Self {
        Self {
            frames,
            landmarks,
            backend,
            gate: OcclusionGate::new(settings.occlusion_interval),
            settings,
            runtime,
            events,
            active: None,
            last_frame: None,
        }
    }

    /// Idle: block on the queue. Capturing: drain the queue, then process one frame.
    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine thread started");
        loop {
            if self.active.is_none() {
                match rx.blocking_recv() {
                    Some(req) => self.handle(req),
                    None => break,
                }
                continue;
            }

            loop {
                match rx.try_recv() {
                    Ok(req) => self.handle(req),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        tracing::info!("engine thread exiting");
                        return;
                    }
                }
            }
            if self.active.is_some() {
                self.cycle();
            }
        }
        tracing::info!("engine thread exiting");
    }

    fn cycle(&mut self) {
        let frame = match self.frames.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "camera failure; ending capture session");
                self.end_session();
                return;
            }
        };

        let keypoints = match self.landmarks.detect(&frame.data, frame.width, frame.height) {
            Ok(kp) => kp,
            Err(e) => {
                tracing::warn!(error = %e, "landmark inference failed; treating frame as faceless");
                KeypointFrame::Absent
            }
        };

        let Some(mode) = self.active.as_ref().map(|a| a.session.mode()) else {
            return;
        };
        if mode == CaptureMode::Enrollment {
            if let Some(ticket) = self.gate.poll(frame.timestamp) {
                self.dispatch_occlusion_check(ticket, frame.clone());
            }
        }

        let occluded = self.gate.is_blocked();
        let accept = self
            .active
            .as_mut()
            .and_then(|a| a.session.observe(&keypoints, occluded));
        if let Some(ticket) = accept {
            tracing::debug!(step = ticket.step(), "pose held; capturing still");
            self.dispatch_still(ticket, frame.clone());
        }

        self.last_frame = Some(frame);
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::StartEnrollment { subject, reply } => {
                let subject = subject.trim().to_string();
                let result = if subject.is_empty() {
                    Err(EngineError::InvalidSubject)
                } else {
                    tracing::info!(subject = %subject, "enrollment session started");
                    Ok(self.begin(
                        Session::enrollment(self.settings.hysteresis),
                        Some(subject),
                    ))
                };
                let _ = reply.send(result);
            }
            EngineRequest::StartVerification { reply } => {
                tracing::info!("verification session started");
                let status = self.begin(Session::verification(), None);
                let _ = reply.send(Ok(status));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.active.as_ref().map(|a| a.session.status()));
            }
            EngineRequest::SkipStep { reply } => {
                let _ = reply.send(self.skip_step());
            }
            EngineRequest::Capture { reply } => match self.begin_capture() {
                Ok(()) => {
                    if let Some(active) = self.active.as_mut() {
                        active.pending_capture = Some(reply);
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            EngineRequest::Submit { reply } => match self.enrollment_batch() {
                Ok((subject, batch)) => self.spawn_enroll(subject, batch, reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            EngineRequest::Stop { reply } => {
                let was_active = self.active.is_some();
                if was_active {
                    tracing::info!("capture session stopped");
                }
                self.end_session();
                let _ = reply.send(was_active);
            }
            EngineRequest::StillReady { ticket, result } => self.still_ready(ticket, result),
            EngineRequest::OcclusionChecked { ticket, result } => {
                if let Resolution::Updated { blocked, .. } = self.gate.resolve(ticket, result) {
                    if let Some(active) = self.active.as_mut() {
                        active.session.note_occlusion(blocked);
                    }
                }
            }
        }
    }

    fn begin(&mut self, session: Session, subject: Option<String>) -> CaptureStatus {
        self.end_session();
        let status = session.status();
        self.active = Some(ActiveCapture {
            session,
            subject,
            pending_capture: None,
        });
        status
    }

    /// Drop the active session and invalidate its outstanding gate checks.
    /// Stills still being encoded are discarded by session id when they land.
    fn end_session(&mut self) {
        self.gate.cancel();
        self.last_frame = None;
        if let Some(mut active) = self.active.take() {
            if let Some(reply) = active.pending_capture.take() {
                let _ = reply.send(Err(EngineError::SessionEnded));
            }
        }
    }

    fn skip_step(&mut self) -> Result<CaptureStatus, EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveSession)?;
        let frame = self.last_frame.clone().ok_or(EngineError::NoFrame)?;
        let ticket = active.session.request_skip()?;
        let status = active.session.status();
        tracing::info!(step = ticket.step(), "step skipped");
        self.dispatch_still(ticket, frame);
        Ok(status)
    }

    fn begin_capture(&mut self) -> Result<(), EngineError> {
        let active = self.active.as_mut().ok_or(EngineError::NoActiveSession)?;
        let frame = self.last_frame.clone().ok_or(EngineError::NoFrame)?;
        let ticket = active.session.request_capture()?;
        self.dispatch_still(ticket, frame);
        Ok(())
    }

    fn enrollment_batch(&self) -> Result<(String, EnrollmentBatch), EngineError> {
        let active = self.active.as_ref().ok_or(EngineError::NoActiveSession)?;
        let batch = active.session.batch()?;
        let subject = active
            .subject
            .clone()
            .ok_or(EngineError::Session(SessionError::WrongMode(
                active.session.mode(),
            )))?;
        Ok((subject, batch))
    }

    /// Encode the still off-thread and post it back with its ticket.
    fn dispatch_still(&self, ticket: AcceptTicket, frame: Frame) {
        let events = self.events.clone();
        let quality = self.settings.jpeg_quality;
        self.runtime.spawn_blocking(move || {
            let result = frame
                .encode_jpeg(quality)
                .map(StillImage::jpeg)
                .map_err(EngineError::from);
            if let Some(tx) = events.upgrade() {
                let _ = tx.blocking_send(EngineRequest::StillReady { ticket, result });
            }
        });
    }

    fn dispatch_occlusion_check(&self, ticket: CheckTicket, frame: Frame) {
        let events = self.events.clone();
        let backend = Arc::clone(&self.backend);
        let quality = self.settings.jpeg_quality;
        self.runtime.spawn(async move {
            let result = match tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await
            {
                Ok(Ok(jpeg)) => backend
                    .check_occlusion(StillImage::jpeg(jpeg))
                    .await
                    .map_err(EngineError::from),
                Ok(Err(e)) => Err(EngineError::from(e)),
                Err(e) => Err(EngineError::Runtime(e.to_string())),
            };
            if let Some(tx) = events.upgrade() {
                let _ = tx
                    .send(EngineRequest::OcclusionChecked { ticket, result })
                    .await;
            }
        });
    }

    fn still_ready(&mut self, ticket: AcceptTicket, result: Result<StillImage, EngineError>) {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!("still arrived after session ended; discarding");
            return;
        };
        if ticket.session_id() != active.session.id() {
            tracing::debug!(session = %ticket.session_id(), "discarding still from previous session");
            return;
        }

        let still = match result {
            Ok(still) => still,
            Err(e) => {
                tracing::warn!(error = %e, step = ticket.step(), "still capture failed; retrying step");
                if let Err(err) = active.session.abort_accept(ticket) {
                    tracing::debug!(error = %err, "abort after failed capture");
                }
                if let Some(reply) = active.pending_capture.take() {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        match active.session.finish_accept(ticket, still) {
            Ok(Acceptance::Captured) => {
                let still = active.session.verification_still().cloned();
                match (active.pending_capture.take(), still) {
                    (Some(reply), Some(still)) => self.spawn_verify(still, reply),
                    (Some(reply), None) => {
                        let _ = reply.send(Err(EngineError::NoFrame));
                    }
                    (None, _) => tracing::debug!("verification still captured with no waiting caller"),
                }
            }
            Ok(Acceptance::Vetoed { step }) => {
                tracing::info!(step, "acceptance vetoed: face covering detected");
            }
            Ok(Acceptance::Advanced { complete: true, .. }) => {
                tracing::info!(
                    session = %active.session.id(),
                    frames = active.session.accepted().len(),
                    "enrollment batch complete"
                );
            }
            Ok(Acceptance::Advanced { .. }) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to record accepted still");
                if let Some(reply) = active.pending_capture.take() {
                    let _ = reply.send(Err(e.into()));
                }
            }
        }
    }

    fn spawn_verify(&self, still: StillImage, reply: Reply<VerifyOutcome>) {
        let backend = Arc::clone(&self.backend);
        tracing::info!(bytes = still.len(), "submitting still for recognition");
        self.runtime.spawn(async move {
            let result = backend.verify(still).await;
            match &result {
                Ok(outcome) => tracing::info!(?outcome, "recognition finished"),
                Err(e) => tracing::warn!(error = %e, "recognition failed"),
            }
            let _ = reply.send(result.map_err(EngineError::from));
        });
    }

    fn spawn_enroll(&self, subject: String, batch: EnrollmentBatch, reply: Reply<String>) {
        let backend = Arc::clone(&self.backend);
        self.runtime.spawn(async move {
            let result = backend.enroll(subject.clone(), batch).await;
            match &result {
                Ok(message) => tracing::info!(subject = %subject, message = %message, "enrollment accepted"),
                Err(e) => tracing::warn!(subject = %subject, error = %e, "enrollment submission failed"),
            }
            let _ = reply.send(result.map_err(EngineError::from));
        });
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera and loads the landmark models synchronously, then starts
/// streaming (discarding warmup frames) on the engine thread. Fails fast if
/// any of that is unavailable. Must be called from within a tokio runtime.
pub fn spawn_engine<B: Backend>(
    config: &Config,
    backend: Arc<B>,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;

    let detector_path = config.detector_model_path();
    let mesh_path = config.facemesh_model_path();
    let landmarker = FaceLandmarker::load(&detector_path, &mesh_path)?;
    tracing::info!(detector = %detector_path, mesh = %mesh_path, "landmark models loaded");

    let warmup = config.warmup_frames;
    let settings = Settings::from(config);
    let runtime = Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let events = tx.downgrade();
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), CameraError>>(1);

    spawn_thread(move || {
        let stream = match camera.stream(warmup) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        Engine::new(stream, landmarker, backend, settings, runtime, events).run(rx);
    })?;

    ready_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}

fn spawn_thread(body: impl FnOnce() + Send + 'static) -> Result<(), EngineError> {
    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(body)
        .map(|_| ())
        .map_err(|e| EngineError::Runtime(format!("failed to spawn engine thread: {e}")))
}
