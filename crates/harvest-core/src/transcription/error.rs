use thiserror::Error;

/// Failures of the transcription job lifecycle.
///
/// Rate limiting is absorbed by the poll loop and never surfaces here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("transcription API key is not set (expected in {env})")]
    MissingApiKey { env: String },

    #[error("audio upload failed: {0}")]
    Upload(String),

    #[error("failed to submit transcription job: {0}")]
    Submit(String),

    #[error("transcription job {job_id} failed: {message}")]
    Failed { job_id: String, message: String },

    #[error("transcription job {job_id} did not finish after {attempts} polls")]
    Timeout { job_id: String, attempts: u32 },

    #[error("transcription job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("unknown transcription job '{job_id}'")]
    UnknownJob { job_id: String },
}

impl TranscriptionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "transcription.missing_api_key",
            Self::Upload(_) => "transcription.upload",
            Self::Submit(_) => "transcription.submit",
            Self::Failed { .. } => "transcription.failed",
            Self::Timeout { .. } => "transcription.timeout",
            Self::Cancelled { .. } => "transcription.cancelled",
            Self::UnknownJob { .. } => "transcription.unknown_job",
        }
    }
}
