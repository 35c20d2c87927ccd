//! # Transcription
//!
//! Long-running remote transcription jobs: chunked upload, submit,
//! adaptive-backoff polling, cooperative cancellation and cost accounting.

pub mod api;
mod error;
pub mod job;
mod orchestrator;

pub use api::{Transcript, TranscriptionApi, Utterance};
pub use error::TranscriptionError;
pub use job::{JobStatus, PollingConfig, TranscriptionJob};
pub use orchestrator::{
    estimate_cost, AudioInput, CostTotals, TranscribeOptions, TranscriptionConfig,
    TranscriptionEvent, TranscriptionOrchestrator, API_KEY_ENV,
};
