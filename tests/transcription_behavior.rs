//! Behavior tests for the transcription job lifecycle against a scripted service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvest_core::http_client::HttpFuture;
use harvest_core::transcription::PollingConfig;
use harvest_core::{
    AudioInput, HttpClient, HttpMethod, HttpRequest, HttpResponse, TranscribeOptions, TranscriptionConfig,
    TranscriptionError, TranscriptionEvent, TranscriptionOrchestrator,
};
use serde_json::{json, Value};

const BASE: &str = "https://transcribe.test/v2";

/// Serves upload and create calls, and answers status polls from a script.
///
/// Once the script is drained the last status repeats.
struct ScriptedService {
    statuses: Mutex<VecDeque<HttpResponse>>,
    last: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedService {
    fn new(statuses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    fn polls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == HttpMethod::Get)
            .count()
    }

    fn next_status(&self) -> HttpResponse {
        let next = self.statuses.lock().expect("lock").pop_front();
        let mut last = self.last.lock().expect("lock");
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last.clone().unwrap_or_else(|| HttpResponse::new(500, "empty script")),
        }
    }
}

impl HttpClient for ScriptedService {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
        Box::pin(async move {
            self.requests.lock().expect("lock").push(request.clone());
            let response = match (request.method, request.url.as_str()) {
                (HttpMethod::Post, url) if url.ends_with("/upload") => {
                    HttpResponse::ok_json(r#"{"upload_url":"https://cdn.transcribe.test/u/abc"}"#)
                }
                (HttpMethod::Post, url) if url.ends_with("/transcript") => {
                    HttpResponse::ok_json(r#"{"id":"job-1","status":"queued"}"#)
                }
                (HttpMethod::Delete, _) => HttpResponse::ok_json("{}"),
                (HttpMethod::Get, _) => self.next_status(),
                _ => HttpResponse::new(404, "not found"),
            };
            Ok(response)
        })
    }
}

fn status(value: Value) -> HttpResponse {
    HttpResponse::ok_json(value.to_string())
}

fn processing() -> HttpResponse {
    status(json!({ "id": "job-1", "status": "processing" }))
}

fn completed(duration: f64) -> HttpResponse {
    status(json!({
        "id": "job-1",
        "status": "completed",
        "text": "hello there",
        "audio_duration": duration,
        "confidence": 0.93,
        "language_code": "en",
        "utterances": [
            { "speaker": "A", "text": "hello", "start": 0, "end": 900, "confidence": 0.9 },
            { "speaker": "B", "text": "there", "start": 1000, "end": 1800, "confidence": 0.95 }
        ]
    }))
}

fn config(max_attempts: u32) -> TranscriptionConfig {
    TranscriptionConfig {
        base_url: BASE.to_owned(),
        polling: PollingConfig {
            max_attempts,
            ..PollingConfig::default()
        },
        ..TranscriptionConfig::default()
    }
}

fn orchestrator(service: &Arc<ScriptedService>, config: TranscriptionConfig) -> TranscriptionOrchestrator {
    TranscriptionOrchestrator::new(service.clone(), "test-key", config)
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<TranscriptionEvent>) -> Vec<TranscriptionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn when_job_completes_after_processing_system_returns_transcript() {
    // Given: a job that reports processing twice before completing
    let service = ScriptedService::new(vec![processing(), processing(), completed(3600.0)]);
    let orchestrator = orchestrator(&service, config(10));
    let mut events = orchestrator.subscribe();

    // When: the remote audio is transcribed
    let transcript = orchestrator
        .transcribe(
            AudioInput::Remote(String::from("https://cdn.test/episode.mp3")),
            &TranscribeOptions::default(),
        )
        .await
        .expect("completes");

    // Then: the transcript is returned after three polls
    assert_eq!(transcript.status, "completed");
    assert_eq!(transcript.utterances().len(), 2);
    assert_eq!(service.polls(), 3);
    assert!(orchestrator.active_jobs().is_empty());

    // Then: the announced poll interval never shrinks
    let intervals: Vec<u64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            TranscriptionEvent::Status { interval_ms, .. } => Some(interval_ms),
            _ => None,
        })
        .collect();
    assert_eq!(intervals.len(), 2);
    assert!(intervals[0] >= 2_000);
    assert!(intervals.windows(2).all(|pair| pair[0] <= pair[1]));

    // Then: cost is accumulated from the reported duration
    let totals = orchestrator.cost_totals();
    assert_eq!(totals.jobs_completed, 1);
    assert!((totals.total_seconds - 3600.0).abs() < f64::EPSILON);
    assert!((totals.total_cost - 0.65).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn when_api_rate_limits_polls_system_grows_interval_by_half() {
    // Given: two rate limited polls before completion
    let service = ScriptedService::new(vec![
        HttpResponse::new(429, "slow down"),
        HttpResponse::new(429, "slow down"),
        completed(60.0),
    ]);
    let orchestrator = orchestrator(&service, config(10));
    let mut events = orchestrator.subscribe();

    // When: the job is submitted and awaited
    let job_id = orchestrator
        .submit("https://cdn.test/a.mp3", &TranscribeOptions::default())
        .await
        .expect("submitted");
    let transcript = orchestrator.wait_for_completion(&job_id).await;

    // Then: rate limiting is absorbed and the interval grows 1.5x each time
    assert!(transcript.is_ok());
    let intervals: Vec<u64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            TranscriptionEvent::RateLimited { interval_ms, .. } => Some(interval_ms),
            _ => None,
        })
        .collect();
    assert_eq!(intervals, vec![3_000, 4_500]);
}

#[tokio::test(start_paused = true)]
async fn when_job_reports_error_system_stops_polling_immediately() {
    // Given: a job that fails on its second poll
    let service = ScriptedService::new(vec![
        processing(),
        status(json!({ "id": "job-1", "status": "error", "error": "audio is corrupt" })),
        completed(10.0),
    ]);
    let orchestrator = orchestrator(&service, config(10));

    // When: the job is awaited
    let job_id = orchestrator
        .submit("https://cdn.test/a.mp3", &TranscribeOptions::default())
        .await
        .expect("submitted");
    let error = orchestrator.wait_for_completion(&job_id).await.expect_err("fails");

    // Then: the provider message is surfaced and no further polls happen
    assert_eq!(
        error,
        TranscriptionError::Failed {
            job_id: String::from("job-1"),
            message: String::from("audio is corrupt"),
        }
    );
    assert_eq!(service.polls(), 2);
    assert!(orchestrator.active_jobs().is_empty());
    assert_eq!(orchestrator.cost_totals().jobs_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn when_job_never_finishes_system_gives_up_after_max_attempts() {
    // Given: a job that never leaves processing
    let service = ScriptedService::new(vec![processing()]);
    let orchestrator = orchestrator(&service, config(4));

    // When: the job is awaited
    let job_id = orchestrator
        .submit("https://cdn.test/a.mp3", &TranscribeOptions::default())
        .await
        .expect("submitted");
    let error = orchestrator.wait_for_completion(&job_id).await.expect_err("times out");

    // Then: exactly max_attempts polls were made
    assert_eq!(
        error,
        TranscriptionError::Timeout {
            job_id: String::from("job-1"),
            attempts: 4,
        }
    );
    assert_eq!(error.code(), "transcription.timeout");
    assert_eq!(service.polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn when_poll_fails_transiently_system_keeps_waiting() {
    // Given: a server error and a malformed body between processing polls
    let service = ScriptedService::new(vec![
        HttpResponse::new(503, "unavailable"),
        HttpResponse::ok_json("not json"),
        completed(30.0),
    ]);
    let orchestrator = orchestrator(&service, config(10));
    let mut events = orchestrator.subscribe();

    // When: the job is awaited
    let job_id = orchestrator
        .submit("https://cdn.test/a.mp3", &TranscribeOptions::default())
        .await
        .expect("submitted");
    let result = orchestrator.wait_for_completion(&job_id).await;

    // Then: both failures are reported as poll errors and the job still completes
    assert!(result.is_ok());
    let poll_errors = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, TranscriptionEvent::PollError { .. }))
        .count();
    assert_eq!(poll_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn user_can_cancel_job_while_it_is_waiting() {
    // Given: a job that stays in processing while being awaited in the background
    let service = ScriptedService::new(vec![processing()]);
    let orchestrator = Arc::new(orchestrator(&service, config(100)));
    let job_id = orchestrator
        .submit("https://cdn.test/a.mp3", &TranscribeOptions::default())
        .await
        .expect("submitted");
    let waiter = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.wait_for_completion(&job_id).await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;

    // When: the job is cancelled
    let found = orchestrator.cancel_transcription(&job_id).await;
    let result = waiter.await.expect("waiter joins");

    // Then: the waiter observes the cancellation and the remote job is deleted
    assert!(found);
    assert_eq!(
        result,
        Err(TranscriptionError::Cancelled {
            job_id: String::from("job-1")
        })
    );
    assert!(service.polls() >= 1);
    assert!(service
        .requests()
        .iter()
        .any(|request| request.method == HttpMethod::Delete && request.url.ends_with("/transcript/job-1")));
    assert!(orchestrator.active_jobs().is_empty());
    assert!(!orchestrator.cancel_transcription(&job_id).await);
}

#[tokio::test]
async fn user_gets_error_when_job_is_unknown() {
    // Given: an orchestrator with no submitted jobs
    let service = ScriptedService::new(Vec::new());
    let orchestrator = orchestrator(&service, config(3));

    // When: an unknown job is awaited and cancelled
    let waited = orchestrator.wait_for_completion("ghost").await;
    let cancelled = orchestrator.cancel_transcription("ghost").await;

    // Then: nothing is polled or deleted
    assert_eq!(
        waited.map(|transcript| transcript.id),
        Err(TranscriptionError::UnknownJob {
            job_id: String::from("ghost")
        })
    );
    assert!(!cancelled);
    assert!(service.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn user_can_upload_local_audio_in_ordered_chunks() {
    // Given: a ten byte file and a four byte chunk size
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("episode.mp3");
    std::fs::write(&path, b"0123456789").expect("write audio");
    let service = ScriptedService::new(vec![completed(120.0)]);
    let orchestrator = orchestrator(
        &service,
        TranscriptionConfig {
            chunk_size: 4,
            ..config(5)
        },
    );
    let mut events = orchestrator.subscribe();

    // When: the local file is transcribed with two expected speakers
    let options = TranscribeOptions {
        speakers_expected: Some(2),
        ..TranscribeOptions::default()
    };
    orchestrator
        .transcribe(AudioInput::Local(path), &options)
        .await
        .expect("completes");

    // Then: three chunks were posted with contiguous ranges
    let requests = service.requests();
    let uploads: Vec<&HttpRequest> = requests
        .iter()
        .filter(|request| request.url.ends_with("/upload"))
        .collect();
    let ranges: Vec<&str> = uploads
        .iter()
        .filter_map(|request| request.headers.get("content-range").map(String::as_str))
        .collect();
    assert_eq!(ranges, vec!["bytes 0-3/10", "bytes 4-7/10", "bytes 8-9/10"]);
    assert!(!uploads[0].headers.contains_key("x-upload-url"));
    assert!(uploads[1..]
        .iter()
        .all(|request| request.headers.get("x-upload-url").map(String::as_str)
            == Some("https://cdn.transcribe.test/u/abc")));

    // Then: the job was created against the uploaded URL
    let create = requests
        .iter()
        .find(|request| request.url.ends_with("/transcript"))
        .and_then(|request| request.body.as_deref())
        .and_then(|body| serde_json::from_slice::<Value>(body).ok())
        .expect("create request");
    assert_eq!(create["audio_url"], json!("https://cdn.transcribe.test/u/abc"));
    assert_eq!(create["speakers_expected"], json!(2));

    // Then: upload progress ends at 100%
    let progress: Vec<f64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            TranscriptionEvent::UploadProgress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    assert!((progress[2] - 1.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn when_estimate_is_expensive_system_emits_cost_warning() {
    // Given: a ten hour expected duration at the default rate
    let service = ScriptedService::new(vec![completed(36_000.0)]);
    let orchestrator = orchestrator(&service, config(5));
    let mut events = orchestrator.subscribe();
    let options = TranscribeOptions {
        expected_duration_seconds: Some(36_000.0),
        ..TranscribeOptions::default()
    };

    // When: the job runs
    orchestrator
        .transcribe(AudioInput::Remote(String::from("https://cdn.test/long.mp3")), &options)
        .await
        .expect("completes");

    // Then: the estimate and a warning precede submission
    let seen = drain(&mut events);
    assert!(seen.contains(&TranscriptionEvent::CostEstimate {
        duration_seconds: 36_000.0,
        estimated_cost: String::from("6.50"),
    }));
    assert!(seen.contains(&TranscriptionEvent::CostWarning {
        estimated_cost: String::from("6.50"),
        threshold: 5.0,
    }));
}
