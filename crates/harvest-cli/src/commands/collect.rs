use std::path::Path;
use std::sync::Arc;

use harvest_core::{
    CollectError, CollectReport, CollectorEvent, ContentPipeline, ContentType, PdfPipeline, Platform,
    PodcastPipeline, SocialCredentials, SocialPipeline, SourceCollector, SourceDescriptor, TranscriptionOrchestrator,
};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::cli::CollectArgs;
use crate::error::CliError;
use crate::output::EventStreamWriter;

use super::Context;

pub async fn run(args: &CollectArgs, context: &Context) -> Result<Value, CliError> {
    let platform = match args.platform.as_deref() {
        Some(tag) => Platform::parse(tag).ok_or_else(|| CliError::Usage(format!("unknown platform '{tag}'")))?,
        None => Platform::classify_url(&args.url).ok_or_else(|| {
            CliError::Usage(format!(
                "cannot infer the platform of '{}', pass --platform",
                args.url
            ))
        })?,
    };
    let source = descriptor(args, platform);
    let config = &context.config;

    let report = match platform.content_type() {
        ContentType::Social => {
            let pipeline = SocialPipeline::new(
                config.social.clone(),
                config.quality,
                Arc::clone(&context.providers),
                Arc::clone(&context.http),
                SocialCredentials::from_env(),
            );
            collect_with(SourceCollector::new(pipeline), &source, &args.output).await?
        }
        ContentType::Pdf => {
            let pipeline = PdfPipeline::new(
                config.pdf.clone(),
                config.quality,
                Arc::clone(&context.providers),
                Arc::clone(&context.http),
            );
            collect_with(SourceCollector::new(pipeline), &source, &args.output).await?
        }
        ContentType::Audio => {
            let transcription =
                match TranscriptionOrchestrator::from_env(Arc::clone(&context.http), config.transcription.to_config()) {
                    Ok(orchestrator) => Some(Arc::new(orchestrator)),
                    Err(error) => {
                        debug!(error = %error, "transcription api disabled");
                        None
                    }
                };
            let pipeline = PodcastPipeline::new(
                config.podcast.clone(),
                config.quality,
                Arc::clone(&context.providers),
                Arc::clone(&context.http),
                transcription,
            );
            collect_with(SourceCollector::new(pipeline), &source, &args.output).await?
        }
    };

    Ok(serde_json::to_value(report.summary())?)
}

fn descriptor(args: &CollectArgs, platform: Platform) -> SourceDescriptor {
    let mut source = SourceDescriptor::new(args.url.clone()).with_platform(platform.as_str());
    if let Some(id) = &args.id {
        source = source.with_id(id.clone());
    }
    if let Some(max_items) = args.max_items {
        source = source.with_max_items(max_items);
    }
    if let Some(language) = &args.language {
        source = source.with_language(language.clone());
    }
    if let Some(speakers) = args.speakers {
        source = source.with_expected_speakers(speakers);
    }
    if let Some(feed_url) = &args.feed_url {
        source = source.with_feed_url(feed_url.clone());
    }
    if let Some(duration) = args.duration {
        source = source.with_duration_seconds(duration);
    }
    source
}

/// Runs one collection while relaying its events to stderr as NDJSON.
async fn collect_with<P: ContentPipeline>(
    collector: SourceCollector<P>,
    source: &SourceDescriptor,
    output: &Path,
) -> Result<CollectReport, CollectError> {
    let forwarder = tokio::spawn(forward_events(collector.subscribe()));
    let outcome = collector.collect(source, output).await;
    // Closing the channel ends the forwarder once it has drained.
    drop(collector);
    if let Err(error) = forwarder.await {
        warn!(error = %error, "event forwarder stopped abnormally");
    }
    outcome
}

async fn forward_events(mut events: broadcast::Receiver<CollectorEvent>) {
    let mut writer = EventStreamWriter::new(std::io::stderr());
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(error) = writer.emit(&event) {
                    warn!(error = %error, "failed to write event");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args(url: &str) -> CollectArgs {
        CollectArgs {
            url: url.to_owned(),
            platform: None,
            id: Some(String::from("ep-42")),
            max_items: None,
            language: Some(String::from("pt-br")),
            speakers: Some(3),
            feed_url: Some(String::from("https://feeds.test/show.xml")),
            duration: None,
            output: PathBuf::from("output"),
        }
    }

    #[test]
    fn descriptor_carries_overrides() {
        let source = descriptor(&args("https://cdn.test/ep.mp3"), Platform::Podcast);

        assert_eq!(source.platform.as_deref(), Some("podcast"));
        assert_eq!(source.id.as_deref(), Some("ep-42"));
        assert_eq!(source.language.as_deref(), Some("pt-br"));
        assert_eq!(
            source.diarization.and_then(|hints| hints.expected_speakers),
            Some(3)
        );
        assert_eq!(source.max_items, None);
        assert_eq!(source.feed_url.as_deref(), Some("https://feeds.test/show.xml"));
        assert_eq!(source.duration_seconds, None);
    }
}
