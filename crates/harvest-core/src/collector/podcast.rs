//! Podcast collector: diarized transcripts of audio episodes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::http_client::{HttpClient, HttpRequest, TransferProgress};
use crate::provider::ToolProviderClient;
use crate::quality::{assess_transcript, QualityThresholds};
use crate::transcription::{
    AudioInput, TranscribeOptions, Transcript, TranscriptionEvent, TranscriptionOrchestrator, API_KEY_ENV,
};
use crate::{AcquisitionResult, ContentItem, ContentType, Platform, QualityReport, StrategyKind, AUDIO_EXTENSIONS};

use super::events::EventSink;
use super::feed::fetch_feed;
use super::fields::{entries, float_at, int_at, text_at};
use super::rules::PodcastRules;
use super::source::NormalizedSource;
use super::strategy::{
    Acquisition, PrepareFuture, Preparation, Strategy, StrategyChain, StrategyContext, StrategyFuture, StrategyTable,
};
use super::{CollectError, ContentPipeline};

const DEFAULT_MAX_UTTERANCES: usize = 100_000;

/// Maps a caller language tag onto a supported transcription language, defaulting to English.
pub fn language_code(language: Option<&str>, default: &str) -> String {
    let tag = language.unwrap_or(default).trim().to_ascii_lowercase().replace('_', "-");
    match tag.as_str() {
        "pt" | "pt-br" | "pt-pt" => String::from("pt"),
        "en" | "en-us" | "en-gb" => String::from("en"),
        "es" | "fr" | "de" => tag,
        _ => String::from("en"),
    }
}

pub struct PodcastPipeline {
    rules: PodcastRules,
    thresholds: QualityThresholds,
    http: Arc<dyn HttpClient>,
    table: StrategyTable,
}

impl PodcastPipeline {
    /// `transcription` is `None` when no API key is configured; the `api` strategy then reports itself unavailable.
    pub fn new(
        rules: PodcastRules,
        thresholds: QualityThresholds,
        providers: Arc<ToolProviderClient>,
        http: Arc<dyn HttpClient>,
        transcription: Option<Arc<TranscriptionOrchestrator>>,
    ) -> Self {
        let mut table = StrategyTable::default();
        table.insert(
            Platform::Podcast,
            Arc::new(TranscriptionApiStrategy {
                orchestrator: transcription,
                http: Arc::clone(&http),
                rules: rules.clone(),
            }),
        );
        table.insert(
            Platform::Podcast,
            Arc::new(ProviderTranscriptStrategy {
                providers,
                provider: rules.transcript_provider.clone(),
                rules: rules.clone(),
            }),
        );
        Self {
            rules,
            thresholds,
            http,
            table,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.table.insert(Platform::Podcast, strategy);
        self
    }

    pub fn rules(&self) -> &PodcastRules {
        &self.rules
    }
}

impl ContentPipeline for PodcastPipeline {
    fn content_type(&self) -> ContentType {
        ContentType::Audio
    }

    fn default_max_items(&self, _platform: Platform) -> usize {
        DEFAULT_MAX_UTTERANCES
    }

    fn chain(&self, _platform: Platform) -> StrategyChain {
        self.rules.chain()
    }

    fn strategies(&self) -> &StrategyTable {
        &self.table
    }

    /// Pulls show and episode metadata from the source's RSS feed.
    ///
    /// Feed values only fill gaps: caller-supplied language, title and
    /// duration are kept.
    fn prepare<'a>(&'a self, source: &'a mut NormalizedSource, ctx: &'a StrategyContext) -> PrepareFuture<'a> {
        Box::pin(async move {
            let mut prepared = Preparation::default();
            let Some(feed_url) = source.feed_url.clone() else {
                return prepared;
            };
            prepared.metadata.insert(String::from("feed_url"), json!(feed_url));
            ctx.events.status("metadata", format!("fetching feed {feed_url}"));

            let feed = match fetch_feed(self.http.as_ref(), &feed_url, &source.url, &source.id).await {
                Ok(feed) => feed,
                Err(error) => {
                    prepared.warnings.push(format!("feed metadata unavailable: {error}"));
                    return prepared;
                }
            };
            if source.language.is_none() {
                source.language = feed.language.clone();
            }
            match &feed.episode {
                Some(episode) => {
                    if source.title.is_none() {
                        source.title = episode.title.clone();
                    }
                    if source.duration_seconds.is_none() {
                        source.duration_seconds = episode.duration_seconds;
                    }
                }
                None => prepared
                    .warnings
                    .push(format!("episode {} not found in feed {feed_url}", source.url)),
            }
            info!(feed = %feed_url, episode = feed.episode.is_some(), "feed metadata collected");
            if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(&feed) {
                prepared.metadata.extend(fields);
            }
            prepared
        })
    }

    fn summarize(&self, _source: &NormalizedSource, result: &mut AcquisitionResult) {
        let mut utterances: BTreeMap<String, usize> = BTreeMap::new();
        let mut words: BTreeMap<String, usize> = BTreeMap::new();
        for item in &result.items {
            let speaker = item.author.clone().unwrap_or_else(|| String::from("unknown"));
            *utterances.entry(speaker.clone()).or_default() += 1;
            *words.entry(speaker).or_default() += item.word_count();
        }
        let word_count: usize = words.values().sum();
        let dominant = words
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(speaker, _)| speaker.clone());
        let duration = result
            .metadata
            .extra
            .get("audio_duration_seconds")
            .and_then(Value::as_f64)
            .or_else(|| {
                result
                    .items
                    .iter()
                    .filter_map(|item| item.end_ms)
                    .max()
                    .map(|end| end as f64 / 1000.0)
            });

        let stats = &mut result.stats.extra;
        stats.insert(String::from("word_count"), json!(word_count));
        stats.insert(String::from("speaker_count"), json!(utterances.len()));
        stats.insert(String::from("utterances_per_speaker"), json!(utterances));
        if let Some(duration) = duration {
            stats.insert(String::from("audio_duration_seconds"), json!(duration));
        }
        if let Some(dominant) = dominant {
            let target: Vec<&ContentItem> = result
                .items
                .iter()
                .filter(|item| item.author.as_deref() == Some(dominant.as_str()))
                .collect();
            let filtered = json!({
                "speaker": dominant,
                "utterance_count": target.len(),
                "word_count": words.get(&dominant).copied().unwrap_or_default(),
                "utterances": target,
            });
            let metadata = &mut result.metadata.extra;
            metadata.insert(String::from("target_speaker"), json!(dominant));
            metadata.insert(String::from("target_transcript"), filtered);
        }
    }

    fn assess(&self, source: &NormalizedSource, result: &AcquisitionResult) -> QualityReport {
        let expected = source
            .expected_speakers
            .unwrap_or(self.rules.default_speakers);
        assess_transcript(result, Some(expected), &self.thresholds)
    }
}

/// Transcription through the job orchestrator, uploading local audio first.
pub struct TranscriptionApiStrategy {
    orchestrator: Option<Arc<TranscriptionOrchestrator>>,
    http: Arc<dyn HttpClient>,
    rules: PodcastRules,
}

impl TranscriptionApiStrategy {
    async fn download(&self, url: &str, ctx: &StrategyContext) -> Result<PathBuf, CollectError> {
        let dest = ctx.source_dir.join(format!("audio.{}", audio_extension(url)));
        ctx.events.status("download", format!("downloading {url}"));
        let events = ctx.events.clone();
        let progress = move |progress: TransferProgress| events.download_progress(progress);
        let bytes = self
            .http
            .download(HttpRequest::get(url).with_timeout_ms(600_000), &dest, &progress)
            .await?;
        info!(path = %dest.display(), bytes, "audio downloaded");
        Ok(dest)
    }
}

impl Strategy for TranscriptionApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let Some(orchestrator) = self.orchestrator.as_deref() else {
                return Err(CollectError::unavailable(
                    StrategyKind::Api,
                    format!("{API_KEY_ENV} is not set"),
                ));
            };
            let options = TranscribeOptions {
                language_code: language_code(source.language.as_deref(), &self.rules.default_language),
                speakers_expected: Some(source.expected_speakers.unwrap_or(self.rules.default_speakers)),
                expected_duration_seconds: source.duration_seconds,
                ..TranscribeOptions::default()
            };

            let mut downloaded = None;
            let input = match AudioInput::from_location(&source.url) {
                AudioInput::Remote(url) if self.rules.download_audio => {
                    let path = self.download(&url, ctx).await?;
                    downloaded = Some(path.clone());
                    AudioInput::Local(path)
                }
                input => input,
            };

            ctx.events.status("transcribe", "starting transcription");
            let transcript = transcribe_with_updates(orchestrator, input, &options, &ctx.events).await;
            if let Some(path) = downloaded.filter(|_| !self.rules.keep_audio) {
                if let Err(error) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %error, "failed to delete downloaded audio");
                }
            }
            let transcript = transcript?;

            let items = transcript_items(&transcript, source.max_items);
            if items.is_empty() {
                return Err(CollectError::failed(StrategyKind::Api, "transcript is empty"));
            }
            Ok(Acquisition::new(items)
                .with_metadata("transcript_id", transcript.id.clone())
                .with_metadata("language_code", transcript.language_code.clone())
                .with_metadata("audio_duration_seconds", transcript.audio_duration)
                .with_metadata("confidence", transcript.confidence))
        })
    }
}

/// Awaits the transcription while relaying orchestrator events as collector status events.
async fn transcribe_with_updates(
    orchestrator: &TranscriptionOrchestrator,
    input: AudioInput,
    options: &TranscribeOptions,
    sink: &EventSink,
) -> Result<Transcript, CollectError> {
    let mut updates = orchestrator.subscribe();
    let transcription = orchestrator.transcribe(input, options);
    tokio::pin!(transcription);
    let result = loop {
        tokio::select! {
            biased;
            result = &mut transcription => break result,
            update = updates.recv() => match update {
                Ok(event) => relay(sink, &event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break (&mut transcription).await,
            },
        }
    };
    while let Ok(event) = updates.try_recv() {
        relay(sink, &event);
    }
    result.map_err(CollectError::from)
}

fn relay(sink: &EventSink, event: &TranscriptionEvent) {
    let message = match event {
        TranscriptionEvent::UploadProgress { uploaded, total, .. } => {
            format!("uploaded {uploaded} of {total} bytes")
        }
        TranscriptionEvent::CostEstimate { estimated_cost, .. } => format!("estimated cost ${estimated_cost}"),
        TranscriptionEvent::CostWarning {
            estimated_cost,
            threshold,
        } => format!("estimated cost ${estimated_cost} exceeds ${threshold:.2}"),
        TranscriptionEvent::Submitted { job_id } => format!("job {job_id} submitted"),
        TranscriptionEvent::Status { job_id, status, .. } => format!("job {job_id} {status}"),
        TranscriptionEvent::RateLimited {
            job_id, interval_ms, ..
        } => format!("job {job_id} rate limited, next poll in {interval_ms}ms"),
        TranscriptionEvent::PollError { job_id, message, .. } => format!("job {job_id} poll failed: {message}"),
        TranscriptionEvent::Completed { job_id, .. } => format!("job {job_id} completed"),
        TranscriptionEvent::Cancelled { job_id } => format!("job {job_id} cancelled"),
    };
    sink.status("transcribe", message);
}

fn transcript_items(transcript: &Transcript, max_items: usize) -> Vec<ContentItem> {
    let utterances = transcript.utterances();
    if utterances.is_empty() {
        let text = transcript.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Vec::new();
        }
        let end_ms = transcript
            .audio_duration
            .map(|seconds| (seconds * 1000.0) as u64)
            .unwrap_or(0);
        return vec![ContentItem::utterance("Speaker A", text, 0, end_ms).with_confidence(transcript.confidence)];
    }
    utterances
        .iter()
        .take(max_items)
        .map(|utterance| {
            ContentItem::utterance(
                format!("Speaker {}", utterance.speaker),
                utterance.text.trim(),
                utterance.start,
                utterance.end,
            )
            .with_confidence(utterance.confidence)
        })
        .collect()
}

fn audio_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    AUDIO_EXTENSIONS
        .iter()
        .copied()
        .find(|extension| path.ends_with(&format!(".{extension}")))
        .unwrap_or("mp3")
}

/// `transcribe` on the configured transcript provider.
pub struct ProviderTranscriptStrategy {
    providers: Arc<ToolProviderClient>,
    provider: String,
    rules: PodcastRules,
}

impl Strategy for ProviderTranscriptStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Actor
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let params = json!({
                "url": source.url,
                "language": language_code(source.language.as_deref(), &self.rules.default_language),
                "speakers": source.expected_speakers.unwrap_or(self.rules.default_speakers),
            });
            ctx.events
                .status("transcribe", format!("transcribing via {}", self.provider));
            let output = self
                .providers
                .call(&self.provider, "transcribe", params)
                .await?
                .ok_or_else(|| {
                    CollectError::unavailable(
                        StrategyKind::Actor,
                        format!("provider '{}' is disabled", self.provider),
                    )
                })?;

            let items: Vec<ContentItem> = entries(&output, &["utterances"])
                .iter()
                .take(source.max_items)
                .filter_map(|entry| {
                    let text = text_at(entry, &["/text"])?;
                    let speaker = text_at(entry, &["/speaker", "/speaker_label"]).unwrap_or_else(|| String::from("A"));
                    let start = int_at(entry, &["/start", "/start_ms"]).unwrap_or(0).max(0) as u64;
                    let end = int_at(entry, &["/end", "/end_ms"]).unwrap_or(0).max(0) as u64;
                    Some(
                        ContentItem::utterance(format!("Speaker {speaker}"), text.trim(), start, end)
                            .with_confidence(float_at(entry, &["/confidence"])),
                    )
                })
                .collect();
            if items.is_empty() {
                return Err(CollectError::failed(StrategyKind::Actor, "provider returned no utterances"));
            }
            Ok(Acquisition::new(items)
                .with_metadata("audio_duration_seconds", float_at(&output, &["/audio_duration", "/duration"])))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::collector::SourceCollector;
    use crate::http_client::{HttpError, HttpFuture, HttpMethod, HttpResponse};
    use crate::provider::ProviderRegistry;
    use crate::transcription::TranscriptionConfig;
    use crate::SourceDescriptor;

    const SHOW_FEED: &str = r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Conversa Rust</title>
    <language>pt-br</language>
    <item>
      <title>Episódio 7</title>
      <enclosure url="https://cdn.test/episode-7.mp3" type="audio/mpeg"/>
      <itunes:duration>1:02:03</itunes:duration>
    </item>
  </channel>
</rss>"#;

    /// Minimal transcription service: creates job `job-1`, reports it completed on the first poll.
    /// Also serves the show feed.
    struct CompletedService {
        requests: Mutex<Vec<(HttpMethod, String)>>,
    }

    impl HttpClient for CompletedService {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
            Box::pin(async move {
                self.requests
                    .lock()
                    .expect("lock")
                    .push((request.method, request.url.clone()));
                match (request.method, request.url.as_str()) {
                    (HttpMethod::Post, "https://transcribe.test/v2/transcript") => {
                        Ok(HttpResponse::ok_json(r#"{"id":"job-1","status":"queued"}"#))
                    }
                    (HttpMethod::Get, "https://transcribe.test/v2/transcript/job-1") => Ok(HttpResponse::ok_json(
                        json!({
                            "id": "job-1",
                            "status": "completed",
                            "audio_duration": 125.0,
                            "language_code": "pt",
                            "utterances": [
                                { "speaker": "A", "text": "Olá a todos", "start": 0, "end": 1500, "confidence": 0.93 },
                                { "speaker": "B", "text": "Bem-vindos ao nosso episódio de hoje", "start": 1500, "end": 4000, "confidence": 0.9 },
                                { "speaker": "A", "text": "Vamos começar", "start": 4000, "end": 5200, "confidence": 0.95 }
                            ]
                        })
                        .to_string(),
                    )),
                    (HttpMethod::Get, "https://feeds.test/show.xml") => Ok(HttpResponse::new(200, SHOW_FEED)),
                    _ => Err(HttpError::non_retryable(format!("unexpected {}", request.url))),
                }
            })
        }
    }

    fn pipeline(transcription: Option<Arc<TranscriptionOrchestrator>>) -> PodcastPipeline {
        pipeline_with_http(transcription, Arc::new(crate::NoopHttpClient))
    }

    fn pipeline_with_http(
        transcription: Option<Arc<TranscriptionOrchestrator>>,
        http: Arc<dyn HttpClient>,
    ) -> PodcastPipeline {
        let registry = ProviderRegistry::from_specs(Default::default()).expect("empty registry");
        PodcastPipeline::new(
            PodcastRules::default(),
            QualityThresholds::default(),
            Arc::new(ToolProviderClient::new(registry)),
            http,
            transcription,
        )
    }

    fn completed_service() -> (Arc<CompletedService>, Arc<TranscriptionOrchestrator>) {
        let service = Arc::new(CompletedService {
            requests: Mutex::new(Vec::new()),
        });
        let config = TranscriptionConfig {
            base_url: String::from("https://transcribe.test/v2"),
            ..TranscriptionConfig::default()
        };
        let orchestrator = Arc::new(TranscriptionOrchestrator::new(service.clone(), "key", config));
        (service, orchestrator)
    }

    #[test]
    fn languages_map_to_supported_codes() {
        assert_eq!(language_code(Some("pt-BR"), "en"), "pt");
        assert_eq!(language_code(Some("es"), "en"), "es");
        assert_eq!(language_code(Some("ja"), "en"), "en");
        assert_eq!(language_code(None, "fr"), "fr");
    }

    #[test]
    fn audio_extension_follows_url() {
        assert_eq!(audio_extension("https://cdn.test/ep1.M4A?token=x"), "m4a");
        assert_eq!(audio_extension("https://cdn.test/stream"), "mp3");
    }

    #[tokio::test]
    async fn api_transcript_becomes_utterances_with_speaker_stats() {
        let (_service, orchestrator) = completed_service();
        let collector = SourceCollector::new(pipeline(Some(orchestrator)));
        let output = tempfile::tempdir().expect("tempdir");
        let source = SourceDescriptor::new("https://cdn.test/episode-7.mp3")
            .with_id("episode-7")
            .with_language("pt-br");

        let report = collector.collect(&source, output.path()).await.expect("collects");

        assert_eq!(report.result.metadata.method, StrategyKind::Api);
        assert_eq!(report.result.stats.total_items, 3);
        assert_eq!(report.result.stats.extra["speaker_count"], 2);
        assert_eq!(report.result.stats.extra["audio_duration_seconds"], 125.0);
        assert_eq!(report.result.metadata.extra["target_speaker"], "Speaker B");
        let target = &report.result.metadata.extra["target_transcript"];
        assert_eq!(target["speaker"], "Speaker B");
        assert_eq!(target["utterance_count"], 1);
        assert_eq!(target["utterances"][0]["text"], "Bem-vindos ao nosso episódio de hoje");
        assert_eq!(report.result.items[1].author.as_deref(), Some("Speaker B"));
        assert!(report
            .warnings
            .iter()
            .all(|warning| warning.starts_with("low quality")));
    }

    #[tokio::test]
    async fn missing_api_key_falls_through_to_provider_and_fails_last() {
        let collector = SourceCollector::new(pipeline(None));
        let output = tempfile::tempdir().expect("tempdir");
        let mut events = collector.subscribe();

        let error = collector
            .collect(&SourceDescriptor::new("https://cdn.test/episode.mp3"), output.path())
            .await
            .expect_err("both strategies fail");

        assert_eq!(error.code(), "provider.no_fallback");
        let mut warned = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let crate::collector::CollectorEvent::Warning { strategy, .. } = event {
                warned.push(strategy);
            }
        }
        assert_eq!(warned, vec![Some(StrategyKind::Api)]);
    }

    #[tokio::test]
    async fn feed_metadata_fills_episode_details_and_drives_cost_estimate() {
        let (service, orchestrator) = completed_service();
        let collector = SourceCollector::new(pipeline_with_http(Some(orchestrator), service.clone()));
        let output = tempfile::tempdir().expect("tempdir");
        let mut events = collector.subscribe();
        let source = SourceDescriptor::new("https://cdn.test/episode-7.mp3")
            .with_id("episode-7")
            .with_feed_url("https://feeds.test/show.xml");

        let report = collector.collect(&source, output.path()).await.expect("collects");

        let metadata = &report.result.metadata.extra;
        assert_eq!(metadata["feed_url"], "https://feeds.test/show.xml");
        assert_eq!(metadata["podcast_title"], "Conversa Rust");
        assert_eq!(metadata["episode"]["title"], "Episódio 7");
        assert_eq!(metadata["episode"]["duration_seconds"], 3723.0);
        assert!(!report.warnings.iter().any(|warning| warning.contains("feed")));

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let crate::collector::CollectorEvent::Status { message, .. } = event {
                statuses.push(message);
            }
        }
        assert!(statuses.iter().any(|message| message == "estimated cost $0.67"));
    }

    #[tokio::test]
    async fn unreachable_feed_is_a_warning_not_a_failure() {
        let (service, orchestrator) = completed_service();
        let collector = SourceCollector::new(pipeline_with_http(Some(orchestrator), service.clone()));
        let output = tempfile::tempdir().expect("tempdir");
        let source = SourceDescriptor::new("https://cdn.test/episode-7.mp3")
            .with_id("episode-7")
            .with_feed_url("https://feeds.test/missing.xml");

        let report = collector.collect(&source, output.path()).await.expect("collects");

        assert_eq!(report.result.stats.total_items, 3);
        assert!(report.warnings[0].starts_with("feed metadata unavailable"));
        assert!(!report.result.metadata.extra.contains_key("podcast_title"));
    }
}
