//! Backend collaborator: occlusion check, enrollment, recognition, history.
//!
//! [`HttpBackend`] speaks the multipart HTTP API of the recognition service.
//! Client errors (4xx) are validation failures and carry the service's
//! `detail` verbatim; anything that prevents a well-formed answer is a
//! transport failure.

use facegate_core::{EnrollmentBatch, HistoryRecord, StillImage, VerifyOutcome};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("rejected by backend ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

/// External services the capture pipeline talks to.
pub trait Backend: Send + Sync + 'static {
    /// `true` when the face in the still is covered.
    fn check_occlusion(
        &self,
        still: StillImage,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Submit a finished batch; returns the confirmation message.
    fn enroll(
        &self,
        subject: String,
        batch: EnrollmentBatch,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;

    fn verify(
        &self,
        still: StillImage,
    ) -> impl Future<Output = Result<VerifyOutcome, BackendError>> + Send;

    fn history(&self) -> impl Future<Output = Result<Vec<HistoryRecord>, BackendError>> + Send;

    /// Drop every enrolled identity and the history.
    fn reset(&self) -> impl Future<Output = Result<String, BackendError>> + Send;
}

#[derive(Deserialize)]
struct MaskResponse {
    mask: bool,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    user: Option<String>,
    #[serde(rename = "match")]
    matched: bool,
    time: Option<String>,
    detail: Option<String>,
}

#[derive(Deserialize)]
struct HistoryRow {
    id: i64,
    name: String,
    time: String,
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn image_part(still: StillImage, file_name: &'static str) -> Result<Part, BackendError> {
        let content_type = still.content_type;
        Part::bytes(still.data)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| BackendError::Protocol(format!("content type {content_type}: {e}")))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body);
        if status.is_client_error() {
            Err(BackendError::Rejected {
                status: status.as_u16(),
                detail,
            })
        } else {
            Err(BackendError::Transport(format!("server error {status}: {detail}")))
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }
}

/// Pull the human-readable reason out of an error body (`{"detail": ...}`),
/// falling back to the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}

impl Backend for HttpBackend {
    async fn check_occlusion(&self, still: StillImage) -> Result<bool, BackendError> {
        let form = Form::new().part("file", Self::image_part(still, "check.jpg")?);
        let resp: MaskResponse = self
            .json(self.client.post(self.url("/check-mask/")).multipart(form))
            .await?;
        Ok(resp.mask)
    }

    async fn enroll(&self, subject: String, batch: EnrollmentBatch) -> Result<String, BackendError> {
        let count = batch.len();
        let mut form = Form::new().text("name", subject.clone());
        for still in batch.into_frames() {
            form = form.part("files", Self::image_part(still, "image.jpg")?);
        }

        tracing::info!(subject = %subject, frames = count, "submitting enrollment");
        let resp: MessageResponse = self
            .json(self.client.post(self.url("/register/")).multipart(form))
            .await?;
        Ok(resp.message)
    }

    async fn verify(&self, still: StillImage) -> Result<VerifyOutcome, BackendError> {
        let form = Form::new().part("file", Self::image_part(still, "checkin.jpg")?);
        let resp: RecognizeResponse = self
            .json(self.client.post(self.url("/recognize/")).multipart(form))
            .await?;

        if !resp.matched {
            return Ok(VerifyOutcome::NoMatch {
                reason: resp.detail,
            });
        }
        match (resp.user, resp.time) {
            (Some(subject), Some(timestamp)) => Ok(VerifyOutcome::Match { subject, timestamp }),
            _ => Err(BackendError::Protocol(
                "match without user or time".to_string(),
            )),
        }
    }

    async fn history(&self) -> Result<Vec<HistoryRecord>, BackendError> {
        let rows: Vec<HistoryRow> = self.json(self.client.get(self.url("/history/"))).await?;
        Ok(rows
            .into_iter()
            .map(|r| HistoryRecord {
                id: r.id,
                subject: r.name,
                time: r.time,
            })
            .collect())
    }

    async fn reset(&self) -> Result<String, BackendError> {
        let resp: MessageResponse = self
            .json(self.client.delete(self.url("/reset-database/")))
            .await?;
        Ok(resp.message)
    }
}
