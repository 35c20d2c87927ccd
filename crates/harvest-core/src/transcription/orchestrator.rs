use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::http_client::HttpClient;
use crate::retry::AdaptiveInterval;

use super::api::{parse_transcript, CreateTranscript, Transcript, TranscriptionApi, DEFAULT_BASE_URL};
use super::job::{JobStatus, PollingConfig, TranscriptionJob};
use super::TranscriptionError;

pub const API_KEY_ENV: &str = "ASSEMBLYAI_API_KEY";
const EVENT_CAPACITY: usize = 256;

/// Tunables of the transcription service.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionConfig {
    pub base_url: String,
    /// USD per audio hour.
    pub billing_rate_per_hour: f64,
    /// Estimated cost in USD above which a `cost_warning` event is emitted.
    pub cost_warning_threshold: f64,
    pub chunk_size: usize,
    pub polling: PollingConfig,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            billing_rate_per_hour: 0.65,
            cost_warning_threshold: 5.0,
            chunk_size: 5 * 1024 * 1024,
            polling: PollingConfig::default(),
        }
    }
}

/// Per-call transcription options.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    pub language_code: String,
    pub speaker_labels: bool,
    pub speakers_expected: Option<u32>,
    /// Caller's duration guess, used only for the cost estimate.
    pub expected_duration_seconds: Option<f64>,
    pub entity_detection: bool,
    pub sentiment_analysis: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language_code: String::from("en"),
            speaker_labels: true,
            speakers_expected: None,
            expected_duration_seconds: None,
            entity_detection: false,
            sentiment_analysis: false,
        }
    }
}

/// Where the audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioInput {
    Local(PathBuf),
    Remote(String),
}

impl AudioInput {
    /// `http(s)://` inputs are remote; anything else is a local path.
    pub fn from_location(location: &str) -> Self {
        let lowered = location.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            Self::Remote(location.to_owned())
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            Self::Local(PathBuf::from(path))
        }
    }
}

/// Lifecycle events of uploads and jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptionEvent {
    UploadProgress {
        uploaded: u64,
        total: u64,
        progress: f64,
    },
    CostEstimate {
        duration_seconds: f64,
        estimated_cost: String,
    },
    CostWarning {
        estimated_cost: String,
        threshold: f64,
    },
    Submitted {
        job_id: String,
    },
    Status {
        job_id: String,
        status: String,
        progress: Option<f64>,
        attempt: u32,
        interval_ms: u64,
    },
    RateLimited {
        job_id: String,
        attempt: u32,
        interval_ms: u64,
    },
    PollError {
        job_id: String,
        attempt: u32,
        message: String,
    },
    Completed {
        job_id: String,
        audio_duration: Option<f64>,
    },
    Cancelled {
        job_id: String,
    },
}

/// Running totals over completed jobs, from provider-reported durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub jobs_completed: u64,
    pub total_seconds: f64,
    pub total_cost: f64,
}

/// `hours * rate`, formatted with two decimals.
pub fn estimate_cost(duration_seconds: f64, rate_per_hour: f64) -> String {
    let hours = duration_seconds.max(0.0) / 3600.0;
    format!("{:.2}", hours * rate_per_hour)
}

/// Drives remote transcription jobs from upload to a terminal state.
///
/// Each job is polled by exactly one task; polls for a job never overlap.
pub struct TranscriptionOrchestrator {
    api: TranscriptionApi,
    config: TranscriptionConfig,
    jobs: Mutex<HashMap<String, TranscriptionJob>>,
    totals: Mutex<CostTotals>,
    events: broadcast::Sender<TranscriptionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TranscriptionOrchestrator {
    pub fn new(http: Arc<dyn HttpClient>, api_key: impl Into<String>, config: TranscriptionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api: TranscriptionApi::new(http, config.base_url.clone(), api_key),
            config,
            jobs: Mutex::new(HashMap::new()),
            totals: Mutex::new(CostTotals::default()),
            events,
        }
    }

    /// Builds an orchestrator with the key from `ASSEMBLYAI_API_KEY`.
    pub fn from_env(http: Arc<dyn HttpClient>, config: TranscriptionConfig) -> Result<Self, TranscriptionError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(http, key, config)),
            _ => Err(TranscriptionError::MissingApiKey {
                env: API_KEY_ENV.to_owned(),
            }),
        }
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TranscriptionEvent) {
        let _ = self.events.send(event);
    }

    pub fn estimate_cost(&self, duration_seconds: f64) -> String {
        estimate_cost(duration_seconds, self.config.billing_rate_per_hour)
    }

    pub fn cost_totals(&self) -> CostTotals {
        *lock(&self.totals)
    }

    /// Snapshot of jobs that have not reached a terminal state.
    pub fn active_jobs(&self) -> Vec<TranscriptionJob> {
        let mut jobs: Vec<_> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Uploads a local file in sequential chunks and returns its remote URL.
    pub async fn upload_audio(&self, path: &Path) -> Result<String, TranscriptionError> {
        let mut file = tokio::fs::File::open(path).await.map_err(|error| {
            TranscriptionError::Upload(format!("cannot open '{}': {error}", path.display()))
        })?;
        let total = file
            .metadata()
            .await
            .map_err(|error| TranscriptionError::Upload(format!("cannot stat '{}': {error}", path.display())))?
            .len();
        if total == 0 {
            return Err(TranscriptionError::Upload(format!(
                "'{}' is empty",
                path.display()
            )));
        }

        info!(path = %path.display(), bytes = total, "uploading audio");
        let mut buffer = vec![0_u8; self.config.chunk_size.max(1)];
        let mut uploaded = 0_u64;
        let mut upload_url: Option<String> = None;
        loop {
            let filled = fill_buffer(&mut file, &mut buffer).await.map_err(|error| {
                TranscriptionError::Upload(format!("read failed at byte {uploaded}: {error}"))
            })?;
            if filled == 0 {
                break;
            }
            let url = self
                .api
                .upload_chunk(buffer[..filled].to_vec(), uploaded, total, upload_url.as_deref())
                .await?;
            upload_url = Some(url);
            uploaded += filled as u64;
            self.emit(TranscriptionEvent::UploadProgress {
                uploaded,
                total,
                progress: uploaded as f64 / total as f64,
            });
        }

        upload_url.ok_or_else(|| TranscriptionError::Upload(String::from("no upload URL returned")))
    }

    /// Uploads when needed, submits and waits for the completed transcript.
    pub async fn transcribe(
        &self,
        input: AudioInput,
        options: &TranscribeOptions,
    ) -> Result<Transcript, TranscriptionError> {
        let audio_url = match input {
            AudioInput::Local(path) => self.upload_audio(&path).await?,
            AudioInput::Remote(url) => url,
        };

        if let Some(duration) = options.expected_duration_seconds {
            let estimated = self.estimate_cost(duration);
            self.emit(TranscriptionEvent::CostEstimate {
                duration_seconds: duration,
                estimated_cost: estimated.clone(),
            });
            let hours_cost = duration.max(0.0) / 3600.0 * self.config.billing_rate_per_hour;
            if hours_cost > self.config.cost_warning_threshold {
                warn!(estimated_cost = %estimated, threshold = self.config.cost_warning_threshold, "transcription cost above threshold");
                self.emit(TranscriptionEvent::CostWarning {
                    estimated_cost: estimated,
                    threshold: self.config.cost_warning_threshold,
                });
            }
        }

        let job_id = self.submit(&audio_url, options).await?;
        self.wait_for_completion(&job_id).await
    }

    /// Creates the remote job and registers it as active.
    pub async fn submit(&self, audio_url: &str, options: &TranscribeOptions) -> Result<String, TranscriptionError> {
        let body = CreateTranscript {
            audio_url: audio_url.to_owned(),
            language_code: options.language_code.clone(),
            speaker_labels: options.speaker_labels,
            speakers_expected: options.speakers_expected.filter(|_| options.speaker_labels),
            entity_detection: options.entity_detection,
            sentiment_analysis: options.sentiment_analysis,
        };
        let job_id = self.api.create(&body).await?;
        lock(&self.jobs).insert(job_id.clone(), TranscriptionJob::new(&job_id, audio_url));
        info!(job_id = %job_id, "transcription submitted");
        self.emit(TranscriptionEvent::Submitted {
            job_id: job_id.clone(),
        });
        Ok(job_id)
    }

    /// Polls `job_id` until it completes, fails, is cancelled or runs out of attempts.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<Transcript, TranscriptionError> {
        if !lock(&self.jobs).contains_key(job_id) {
            return Err(TranscriptionError::UnknownJob {
                job_id: job_id.to_owned(),
            });
        }
        let polling = self.config.polling;
        let mut interval = AdaptiveInterval::new(polling.initial_interval, polling.max_interval)
            .with_factors(polling.rate_limit_factor, polling.drift_factor);

        for attempt in 1..=polling.max_attempts {
            if self.take_cancelled(job_id) {
                info!(job_id, "transcription cancelled");
                self.emit(TranscriptionEvent::Cancelled {
                    job_id: job_id.to_owned(),
                });
                return Err(TranscriptionError::Cancelled {
                    job_id: job_id.to_owned(),
                });
            }
            self.record_attempt(job_id, attempt);

            match self.api.status(job_id).await {
                Ok(response) if response.status == 429 => {
                    let next = interval.on_rate_limited();
                    debug!(job_id, attempt, interval_ms = millis(next), "status poll rate limited");
                    self.emit(TranscriptionEvent::RateLimited {
                        job_id: job_id.to_owned(),
                        attempt,
                        interval_ms: millis(next),
                    });
                }
                Ok(response) if !response.is_success() => {
                    interval.drift();
                    self.poll_error(job_id, attempt, format!("status endpoint returned {}", response.status));
                }
                Ok(response) => match parse_transcript(&response) {
                    Err(error) => {
                        interval.drift();
                        self.poll_error(job_id, attempt, error.to_string());
                    }
                    Ok(transcript) if transcript.status == "completed" => {
                        self.finish(job_id, JobStatus::Completed);
                        self.record_cost(transcript.audio_duration);
                        info!(job_id, attempt, "transcription completed");
                        self.emit(TranscriptionEvent::Completed {
                            job_id: job_id.to_owned(),
                            audio_duration: transcript.audio_duration,
                        });
                        return Ok(transcript);
                    }
                    Ok(transcript) if transcript.status == "error" => {
                        self.finish(job_id, JobStatus::Error);
                        let message = transcript
                            .error
                            .unwrap_or_else(|| String::from("provider reported an error"));
                        warn!(job_id, message = %message, "transcription rejected");
                        return Err(TranscriptionError::Failed {
                            job_id: job_id.to_owned(),
                            message,
                        });
                    }
                    Ok(transcript) => {
                        if transcript.status == "processing" {
                            self.set_status(job_id, JobStatus::Processing);
                        }
                        let next = interval.drift();
                        self.emit(TranscriptionEvent::Status {
                            job_id: job_id.to_owned(),
                            status: transcript.status,
                            progress: transcript.processing_progress,
                            attempt,
                            interval_ms: millis(next),
                        });
                    }
                },
                Err(error) => {
                    interval.drift();
                    self.poll_error(job_id, attempt, error.to_string());
                }
            }

            if attempt < polling.max_attempts {
                tokio::time::sleep(interval.current()).await;
            }
        }

        self.finish(job_id, JobStatus::Timeout);
        warn!(job_id, attempts = polling.max_attempts, "transcription polling exhausted");
        Err(TranscriptionError::Timeout {
            job_id: job_id.to_owned(),
            attempts: polling.max_attempts,
        })
    }

    /// Flags the job for cancellation and best-effort deletes it remotely.
    ///
    /// The waiting caller fails on its next poll iteration. Returns whether
    /// the job was active.
    pub async fn cancel_transcription(&self, job_id: &str) -> bool {
        let found = match lock(&self.jobs).get_mut(job_id) {
            Some(job) => {
                job.cancel_requested = true;
                true
            }
            None => false,
        };
        if !found {
            return false;
        }
        if let Err(error) = self.api.delete(job_id).await {
            warn!(job_id, error = %error, "remote delete failed");
        }
        true
    }

    fn poll_error(&self, job_id: &str, attempt: u32, message: String) {
        warn!(job_id, attempt, message = %message, "status poll failed");
        self.emit(TranscriptionEvent::PollError {
            job_id: job_id.to_owned(),
            attempt,
            message,
        });
    }

    fn take_cancelled(&self, job_id: &str) -> bool {
        let mut jobs = lock(&self.jobs);
        let cancelled = jobs.get(job_id).is_some_and(|job| job.cancel_requested);
        if cancelled {
            if let Some(mut job) = jobs.remove(job_id) {
                job.transition(JobStatus::Cancelled);
            }
        }
        cancelled
    }

    fn record_attempt(&self, job_id: &str, attempt: u32) {
        if let Some(job) = lock(&self.jobs).get_mut(job_id) {
            job.attempts = attempt;
        }
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(job) = lock(&self.jobs).get_mut(job_id) {
            job.transition(status);
        }
    }

    fn finish(&self, job_id: &str, status: JobStatus) {
        if let Some(mut job) = lock(&self.jobs).remove(job_id) {
            job.transition(status);
            debug!(job_id, status = status.as_str(), attempts = job.attempts, "job finished");
        }
    }

    fn record_cost(&self, audio_duration: Option<f64>) {
        let seconds = audio_duration.unwrap_or(0.0).max(0.0);
        let mut totals = lock(&self.totals);
        totals.jobs_completed += 1;
        totals.total_seconds += seconds;
        totals.total_cost += seconds / 3600.0 * self.config.billing_rate_per_hour;
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

async fn fill_buffer(file: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_cost_with_two_decimals() {
        assert_eq!(estimate_cost(3600.0, 0.65), "0.65");
        assert_eq!(estimate_cost(0.0, 0.65), "0.00");
        assert_eq!(estimate_cost(7200.0, 0.65), "1.30");
    }

    #[test]
    fn classifies_audio_locations() {
        assert_eq!(
            AudioInput::from_location("HTTPS://cdn.test/ep.mp3"),
            AudioInput::Remote(String::from("HTTPS://cdn.test/ep.mp3"))
        );
        assert_eq!(
            AudioInput::from_location("file:///tmp/ep.mp3"),
            AudioInput::Local(PathBuf::from("/tmp/ep.mp3"))
        );
    }
}
