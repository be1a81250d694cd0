use crate::backend::{Backend, BackendError, HttpBackend};
use crate::engine::{EngineError, EngineHandle};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facegate.Capture1";
pub const OBJECT_PATH: &str = "/org/facegate/Capture1";

/// Errors returned over the bus. Each maps to a distinct D-Bus error name
/// under `org.facegate.Capture1.Error`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.facegate.Capture1.Error")]
pub enum CaptureError {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// No capture session is running.
    NoSession(String),
    /// The backend refused the submission (duplicate identity, no face, mask).
    Rejected(String),
    /// The backend could not be reached or answered with garbage.
    Transport(String),
    /// The request does not fit the session's current state.
    InvalidState(String),
    Internal(String),
}

impl From<BackendError> for CaptureError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { detail, .. } => Self::Rejected(detail),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<EngineError> for CaptureError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Backend(e) => e.into(),
            EngineError::NoActiveSession => Self::NoSession(err.to_string()),
            EngineError::Session(_)
            | EngineError::InvalidSubject
            | EngineError::NoFrame
            | EngineError::SessionEnded => Self::InvalidState(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CaptureError> {
    serde_json::to_string(value).map_err(|e| CaptureError::Internal(e.to_string()))
}

/// D-Bus interface for the facegate capture daemon.
///
/// Bus name: org.facegate.Capture1
/// Object path: /org/facegate/Capture1
pub struct CaptureService {
    engine: EngineHandle,
    backend: Arc<HttpBackend>,
}

impl CaptureService {
    pub fn new(engine: EngineHandle, backend: Arc<HttpBackend>) -> Self {
        Self { engine, backend }
    }
}

#[interface(name = "org.facegate.Capture1")]
impl CaptureService {
    /// Start a guided five-pose enrollment for `subject`. Returns the status JSON.
    async fn start_enrollment(&self, subject: &str) -> Result<String, CaptureError> {
        tracing::info!(subject, "start_enrollment requested");
        let status = self.engine.start_enrollment(subject.to_string()).await?;
        to_json(&status)
    }

    async fn start_verification(&self) -> Result<String, CaptureError> {
        tracing::info!("start_verification requested");
        let status = self.engine.start_verification().await?;
        to_json(&status)
    }

    /// Daemon version and the active session snapshot (`null` when idle).
    async fn status(&self) -> Result<String, CaptureError> {
        let session = self.engine.status().await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": session,
        })
        .to_string())
    }

    async fn skip_step(&self) -> Result<String, CaptureError> {
        tracing::info!("skip_step requested");
        let status = self.engine.skip_step().await?;
        to_json(&status)
    }

    /// Take the verification still and return the recognition outcome JSON.
    async fn capture(&self) -> Result<String, CaptureError> {
        tracing::info!("capture requested");
        let outcome = self.engine.capture().await?;
        to_json(&outcome)
    }

    /// Submit the finished enrollment batch; returns the backend's message.
    async fn submit(&self) -> Result<String, CaptureError> {
        tracing::info!("submit requested");
        Ok(self.engine.submit().await?)
    }

    async fn stop(&self) -> Result<bool, CaptureError> {
        Ok(self.engine.stop().await?)
    }

    async fn history(&self) -> Result<String, CaptureError> {
        let records = self.backend.history().await?;
        to_json(&records)
    }

    async fn reset_database(&self) -> Result<String, CaptureError> {
        tracing::warn!("reset_database requested");
        Ok(self.backend.reset().await?)
    }
}
