//! Wire types and calls of the remote transcription service (AssemblyAI v2).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse};

use super::TranscriptionError;

pub const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Body of the job creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTranscript {
    pub audio_url: String,
    pub language_code: String,
    pub speaker_labels: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers_expected: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub entity_detection: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sentiment_analysis: bool,
}

/// One diarized utterance. Times are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Status payload; complete once `status == "completed"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub utterances: Option<Vec<Utterance>>,
    /// Audio length in seconds as measured by the provider.
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub processing_progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Transcript {
    pub fn utterances(&self) -> &[Utterance] {
        self.utterances.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// Thin HTTP binding of the transcription endpoints.
#[derive(Clone)]
pub struct TranscriptionApi {
    http: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
}

impl TranscriptionApi {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth: HttpAuth::Header {
                name: String::from("authorization"),
                value: api_key.into(),
            },
        }
    }

    /// Posts one chunk of `total` bytes covering `start..=end` and returns the upload URL.
    ///
    /// Continuation chunks carry the URL returned for the first chunk so the
    /// service appends them in order.
    pub async fn upload_chunk(
        &self,
        chunk: Vec<u8>,
        start: u64,
        total: u64,
        upload_url: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        let end = start + chunk.len().saturating_sub(1) as u64;
        let mut request = HttpRequest::post(format!("{}/upload", self.base_url))
            .with_auth(&self.auth)
            .with_header("content-type", "application/octet-stream")
            .with_header("content-range", format!("bytes {start}-{end}/{total}"))
            .with_timeout_ms(120_000)
            .with_body(chunk);
        if let Some(url) = upload_url {
            request = request.with_header("x-upload-url", url);
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| TranscriptionError::Upload(error.to_string()))?;
        if !response.is_success() {
            return Err(TranscriptionError::Upload(format!(
                "upload endpoint returned {}: {}",
                response.status,
                response.text()
            )));
        }
        response
            .json::<UploadResponse>()
            .map(|body| body.upload_url)
            .map_err(|error| TranscriptionError::Upload(error.to_string()))
    }

    pub async fn create(&self, body: &CreateTranscript) -> Result<String, TranscriptionError> {
        let payload = serde_json::to_value(body)
            .map_err(|error| TranscriptionError::Submit(error.to_string()))?;
        let request = HttpRequest::post(format!("{}/transcript", self.base_url))
            .with_auth(&self.auth)
            .with_json(&payload);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| TranscriptionError::Submit(error.to_string()))?;
        if !response.is_success() {
            return Err(TranscriptionError::Submit(format!(
                "transcript endpoint returned {}: {}",
                response.status,
                response.text()
            )));
        }
        response
            .json::<CreateResponse>()
            .map(|body| body.id)
            .map_err(|error| TranscriptionError::Submit(error.to_string()))
    }

    /// Raw status response so the poller can branch on 429.
    pub async fn status(&self, job_id: &str) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::get(format!("{}/transcript/{job_id}", self.base_url))
            .with_auth(&self.auth);
        self.http.execute(request).await
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), HttpError> {
        let request = HttpRequest::delete(format!("{}/transcript/{job_id}", self.base_url))
            .with_auth(&self.auth);
        let response = self.http.execute(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(HttpError::status(response.status))
        }
    }
}

/// Parses a status body, keeping unknown fields out of the typed view.
pub fn parse_transcript(response: &HttpResponse) -> Result<Transcript, HttpError> {
    let value: Value = response.json()?;
    serde_json::from_value(value)
        .map_err(|error| HttpError::non_retryable(format!("unexpected status payload: {error}")))
}
