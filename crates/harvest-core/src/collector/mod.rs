//! Strategy-chain collectors, one per content type.
//!
//! | Module | Responsibility |
//! |---|---|
//! | `source` | Classification and defaulting of caller descriptors |
//! | `strategy` | `Strategy` trait, chains and the sequential chain runner |
//! | `events` | Lifecycle events and the per-source `EventSink` |
//! | `rules` | TOML collector rules |
//! | `social` | Twitter, Reddit and LinkedIn strategies |
//! | `pdf` | PDF text extraction strategies |
//! | `podcast` | Audio transcription strategies |
//! | `feed` | Podcast RSS metadata |
//!
//! A collect call never shares mutable state with another call for a
//! different source; all side effects land under
//! `<output>/<content_type>/<slug>/` plus broadcast events.

mod error;
pub mod events;
pub mod feed;
mod fields;
pub mod pdf;
pub mod podcast;
pub mod rules;
pub mod social;
pub mod source;
pub mod strategy;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    AcquisitionResult, CollectorOutput, ContentType, Platform, QualityReport, SourceDescriptor, StrategyKind,
};

pub use error::CollectError;
pub use events::{CollectorEvent, EventSink};
pub use pdf::PdfPipeline;
pub use podcast::PodcastPipeline;
pub use rules::{HarvestConfig, PdfRules, PlatformRules, PodcastRules, SocialRules, TranscriptionSettings};
pub use social::{SocialCredentials, SocialPipeline};
pub use source::NormalizedSource;
pub use strategy::{
    run_chain, Acquisition, ChainOutcome, PrepareFuture, Preparation, Strategy, StrategyChain, StrategyContext,
    StrategyFuture, StrategyTable,
};

/// File name of the persisted artifact inside the source directory.
pub const ARTIFACT_FILE: &str = "content.json";
const EVENT_CAPACITY: usize = 256;

/// Content-type specific parts of a collector.
pub trait ContentPipeline: Send + Sync {
    fn content_type(&self) -> ContentType;

    fn default_max_items(&self, platform: Platform) -> usize;

    fn chain(&self, platform: Platform) -> StrategyChain;

    fn strategies(&self) -> &StrategyTable;

    /// Enriches `source` before the chain runs. Problems come back as warnings.
    fn prepare<'a>(&'a self, _source: &'a mut NormalizedSource, _ctx: &'a StrategyContext) -> PrepareFuture<'a> {
        Box::pin(async { Preparation::default() })
    }

    /// Adds content-type specific stats or metadata after the winning strategy ran.
    fn summarize(&self, _source: &NormalizedSource, _result: &mut AcquisitionResult) {}

    fn assess(&self, source: &NormalizedSource, result: &AcquisitionResult) -> QualityReport;
}

/// Outcome of a successful `collect` call.
#[derive(Debug, Clone)]
pub struct CollectReport {
    pub source_id: String,
    pub artifact_path: PathBuf,
    pub result: AcquisitionResult,
    pub quality: QualityReport,
    pub warnings: Vec<String>,
}

/// Compact, serializable view of a `CollectReport`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectSummary {
    pub source_id: String,
    pub platform: Platform,
    pub method: StrategyKind,
    pub total_items: usize,
    pub quality_score: u8,
    pub acceptable: bool,
    pub artifact: PathBuf,
    pub warnings: Vec<String>,
}

impl CollectReport {
    pub fn summary(&self) -> CollectSummary {
        CollectSummary {
            source_id: self.source_id.clone(),
            platform: self.result.platform,
            method: self.result.metadata.method,
            total_items: self.result.stats.total_items,
            quality_score: self.quality.score,
            acceptable: self.quality.acceptable,
            artifact: self.artifact_path.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Runs the strategy chain of a `ContentPipeline` for one source at a time.
pub struct SourceCollector<P> {
    pipeline: P,
    events: broadcast::Sender<CollectorEvent>,
}

impl<P: ContentPipeline> SourceCollector<P> {
    pub fn new(pipeline: P) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { pipeline, events }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn content_type(&self) -> ContentType {
        self.pipeline.content_type()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectorEvent> {
        self.events.subscribe()
    }

    /// Acquires `source`, persists the artifact under `output_dir` and returns the report.
    ///
    /// Classification failures are returned before any strategy runs.
    pub async fn collect(&self, source: &SourceDescriptor, output_dir: &Path) -> Result<CollectReport, CollectError> {
        let normalized = match NormalizedSource::from_descriptor(source, self.pipeline.content_type(), |platform| {
            self.pipeline.default_max_items(platform)
        }) {
            Ok(normalized) => normalized,
            Err(error) => {
                let source_id = source.id.clone().unwrap_or_else(|| source.url.clone());
                self.fail(&EventSink::new(self.events.clone(), source_id), &error);
                return Err(error);
            }
        };

        let sink = EventSink::new(self.events.clone(), normalized.id.clone());
        sink.emit(CollectorEvent::Start {
            source_id: normalized.id.clone(),
            url: normalized.url.clone(),
            platform: normalized.platform,
        });
        info!(source_id = %normalized.id, platform = %normalized.platform, url = %normalized.url, "collect started");

        match self.run(&normalized, &sink, output_dir).await {
            Ok(report) => {
                sink.emit(CollectorEvent::Completed {
                    source_id: report.source_id.clone(),
                    method: report.result.metadata.method,
                    total_items: report.result.stats.total_items,
                    quality_score: report.quality.score,
                });
                info!(
                    source_id = %report.source_id,
                    method = %report.result.metadata.method,
                    items = report.result.stats.total_items,
                    score = report.quality.score,
                    "collect completed"
                );
                Ok(report)
            }
            Err(error) => {
                self.fail(&sink, &error);
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        source: &NormalizedSource,
        sink: &EventSink,
        output_dir: &Path,
    ) -> Result<CollectReport, CollectError> {
        let source_dir = output_dir
            .join(self.pipeline.content_type().as_str())
            .join(&source.slug);
        tokio::fs::create_dir_all(&source_dir)
            .await
            .map_err(|error| CollectError::io(&source_dir, error))?;

        let ctx = StrategyContext {
            source_dir: source_dir.clone(),
            events: sink.clone(),
        };
        let mut enriched = source.clone();
        let prepared = self.pipeline.prepare(&mut enriched, &ctx).await;
        let source = &enriched;
        for warning in &prepared.warnings {
            warn!(source_id = %source.id, warning = %warning, "source metadata incomplete");
            sink.warning(None, warning.clone());
        }
        let mut warnings = prepared.warnings;

        let chain = self.pipeline.chain(source.platform);
        let outcome = run_chain(&chain, source, &ctx, self.pipeline.strategies()).await?;
        warnings.extend(outcome.warnings);

        let mut result = AcquisitionResult::new(
            source.platform,
            source.url.clone(),
            outcome.method,
            outcome.acquisition.items,
        );
        result.metadata.extra = prepared.metadata;
        result.metadata.extra.extend(outcome.acquisition.metadata);
        result.stats.extra = outcome.acquisition.stats;
        result.stats.extra.remove("total_items");
        self.pipeline.summarize(source, &mut result);

        sink.status("assess", "assessing quality");
        let quality = self.pipeline.assess(source, &result);
        if !quality.acceptable {
            let message = format!("low quality result: {}", quality.summary());
            warn!(source_id = %source.id, score = quality.score, "quality below threshold");
            sink.warning(None, message.clone());
            warnings.push(message);
        }

        let output = CollectorOutput {
            source_id: source.id.clone(),
            result,
            quality,
        };
        let artifact_path = source_dir.join(ARTIFACT_FILE);
        sink.status("persist", format!("writing {}", artifact_path.display()));
        let encoded = serde_json::to_vec_pretty(&output)?;
        tokio::fs::write(&artifact_path, encoded)
            .await
            .map_err(|error| CollectError::io(&artifact_path, error))?;

        Ok(CollectReport {
            source_id: output.source_id,
            artifact_path,
            result: output.result,
            quality: output.quality,
            warnings,
        })
    }

    fn fail(&self, sink: &EventSink, error: &CollectError) {
        warn!(source_id = sink.source_id(), code = error.code(), error = %error, "collect failed");
        sink.emit(CollectorEvent::Error {
            source_id: sink.source_id().to_owned(),
            code: error.code().to_owned(),
            message: error.to_string(),
        });
    }
}
