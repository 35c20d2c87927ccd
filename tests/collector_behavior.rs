//! Behavior tests for strategy-chain collection end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use harvest_core::collector::{
    Acquisition, NormalizedSource, SocialRules, Strategy, StrategyContext, StrategyFuture,
};
use harvest_core::{
    CollectError, CollectorEvent, CollectorOutput, ContentItem, NoopHttpClient, Platform, ProviderRegistry,
    QualityThresholds, SocialCredentials, SocialPipeline, SourceCollector, SourceDescriptor, StrategyKind,
    ToolProviderClient,
};

enum Behavior {
    Fail(&'static str),
    Items(usize),
}

/// Strategy double that records how often it ran and with which item cap.
struct StubStrategy {
    kind: StrategyKind,
    behavior: Behavior,
    calls: AtomicUsize,
    max_items_seen: Mutex<Vec<usize>>,
}

impl StubStrategy {
    fn new(kind: StrategyKind, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior,
            calls: AtomicUsize::new(0),
            max_items_seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Strategy for StubStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, _ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_items_seen.lock().expect("lock").push(source.max_items);
            match self.behavior {
                Behavior::Fail(message) => Err(CollectError::failed(self.kind, message)),
                Behavior::Items(count) => {
                    let items = (0..count.min(source.max_items))
                        .map(|index| {
                            ContentItem::post(format!(
                                "Post number {index} discussing async runtimes, ownership and the finer points of error handling"
                            ))
                            .with_id(format!("tweet-{index}"))
                            .with_author(format!("author{}", index % 7))
                        })
                        .collect();
                    Ok(Acquisition::new(items).with_metadata("author", "someone"))
                }
            }
        })
    }
}

fn pipeline() -> SocialPipeline {
    let registry = ProviderRegistry::from_specs(Default::default()).expect("empty registry");
    SocialPipeline::new(
        SocialRules::default(),
        QualityThresholds::default(),
        Arc::new(ToolProviderClient::new(registry)),
        Arc::new(NoopHttpClient),
        SocialCredentials::default(),
    )
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<CollectorEvent>) -> Vec<CollectorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn when_actor_strategy_fails_system_falls_through_to_api() {
    // Given: a twitter chain whose actor fails and whose api returns 42 posts
    let actor = StubStrategy::new(StrategyKind::Actor, Behavior::Fail("actor run aborted"));
    let api = StubStrategy::new(StrategyKind::Api, Behavior::Items(42));
    let scrape = StubStrategy::new(StrategyKind::Scrape, Behavior::Items(1));
    let collector = SourceCollector::new(
        pipeline()
            .with_strategy(Platform::Twitter, actor.clone())
            .with_strategy(Platform::Twitter, api.clone())
            .with_strategy(Platform::Twitter, scrape.clone()),
    );
    let mut events = collector.subscribe();
    let output = tempfile::tempdir().expect("tempdir");

    // When: the source is collected
    let report = collector
        .collect(
            &SourceDescriptor::new("https://x.com/someone/status/1").with_id("thread-1"),
            output.path(),
        )
        .await
        .expect("collects");

    // Then: the api result wins and exactly one warning names the actor
    assert_eq!(report.result.metadata.method, StrategyKind::Api);
    assert_eq!(report.result.stats.total_items, 42);
    assert_eq!(report.result.items.len(), 42);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("actor"));
    assert!(report.quality.acceptable);
    assert_eq!((actor.calls(), api.calls(), scrape.calls()), (1, 1, 0));

    // Then: events run start, warning, completed for the same source
    let seen = drain(&mut events);
    assert!(seen.iter().all(|event| event.source_id() == "thread-1"));
    assert!(matches!(seen.first(), Some(CollectorEvent::Start { .. })));
    let warnings: Vec<&CollectorEvent> = seen
        .iter()
        .filter(|event| matches!(event, CollectorEvent::Warning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        warnings[0],
        CollectorEvent::Warning {
            strategy: Some(StrategyKind::Actor),
            ..
        }
    ));
    assert!(matches!(
        seen.last(),
        Some(CollectorEvent::Completed {
            method: StrategyKind::Api,
            total_items: 42,
            ..
        })
    ));

    // Then: the artifact holds the same result
    let expected_path = output.path().join("social").join("thread-1").join("content.json");
    assert_eq!(report.artifact_path, expected_path);
    let raw = std::fs::read(&expected_path).expect("artifact written");
    let artifact: CollectorOutput = serde_json::from_slice(&raw).expect("artifact parses");
    assert_eq!(artifact.source_id, "thread-1");
    assert_eq!(artifact.result.stats.total_items, 42);
    assert_eq!(artifact.result.metadata.method, StrategyKind::Api);
}

#[tokio::test]
async fn user_can_cap_items_collected_per_source() {
    // Given: a caller cap below the platform default
    let api = StubStrategy::new(StrategyKind::Api, Behavior::Items(42));
    let collector = SourceCollector::new(
        pipeline()
            .with_strategy(Platform::Twitter, StubStrategy::new(StrategyKind::Actor, Behavior::Fail("down")))
            .with_strategy(Platform::Twitter, api.clone()),
    );
    let output = tempfile::tempdir().expect("tempdir");

    // When: the source is collected with max_items 5
    let report = collector
        .collect(
            &SourceDescriptor::new("https://twitter.com/someone/status/2").with_max_items(5),
            output.path(),
        )
        .await
        .expect("collects");

    // Then: the strategy saw the cap and the result respects it
    assert_eq!(*api.max_items_seen.lock().expect("lock"), vec![5]);
    assert_eq!(report.result.stats.total_items, 5);
}

#[tokio::test]
async fn when_source_is_unsupported_system_fails_before_any_strategy_runs() {
    // Given: a social collector and a PDF url
    let actor = StubStrategy::new(StrategyKind::Actor, Behavior::Items(3));
    let collector = SourceCollector::new(pipeline().with_strategy(Platform::Twitter, actor.clone()));
    let mut events = collector.subscribe();
    let output = tempfile::tempdir().expect("tempdir");

    // When: the PDF is handed to the social collector
    let error = collector
        .collect(&SourceDescriptor::new("https://example.test/paper.pdf"), output.path())
        .await
        .expect_err("rejected");

    // Then: the source is rejected, nothing ran and nothing was written
    assert!(matches!(error, CollectError::UnsupportedSource { .. }));
    assert_eq!(error.code(), "collect.unsupported_source");
    assert_eq!(actor.calls(), 0);
    assert!(!output.path().join("social").exists());
    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], CollectorEvent::Error { code, .. } if code == "collect.unsupported_source"));
}

#[tokio::test]
async fn user_gets_error_when_platform_tag_is_unknown() {
    // Given: an explicit platform tag nobody handles
    let collector = SourceCollector::new(pipeline());
    let output = tempfile::tempdir().expect("tempdir");

    // When: the source is collected
    let error = collector
        .collect(
            &SourceDescriptor::new("https://example.test/thing").with_platform("myspace"),
            output.path(),
        )
        .await
        .expect_err("rejected");

    // Then: classification fails
    assert!(matches!(error, CollectError::UnsupportedSource { .. }));
}

#[tokio::test]
async fn when_every_strategy_fails_user_receives_final_strategy_error() {
    // Given: a linkedin chain where every strategy fails
    let actor = StubStrategy::new(StrategyKind::Actor, Behavior::Fail("actor quota exceeded"));
    let scrape = StubStrategy::new(StrategyKind::Scrape, Behavior::Fail("login wall"));
    let collector = SourceCollector::new(
        pipeline()
            .with_strategy(Platform::Linkedin, actor.clone())
            .with_strategy(Platform::Linkedin, scrape.clone()),
    );
    let mut events = collector.subscribe();
    let output = tempfile::tempdir().expect("tempdir");

    // When: the profile is collected
    let error = collector
        .collect(
            &SourceDescriptor::new("https://www.linkedin.com/in/someone").with_id("profile"),
            output.path(),
        )
        .await
        .expect_err("all strategies fail");

    // Then: the last failure propagates and only the earlier one became a warning
    assert_eq!(error.to_string(), "scrape strategy failed: login wall");
    assert_eq!(error.code(), "collect.strategy_failed");
    assert_eq!((actor.calls(), scrape.calls()), (1, 1));
    assert!(!output.path().join("social").join("profile").join("content.json").exists());

    let seen = drain(&mut events);
    let warnings = seen
        .iter()
        .filter(|event| matches!(event, CollectorEvent::Warning { .. }))
        .count();
    assert_eq!(warnings, 1);
    assert!(matches!(seen.last(), Some(CollectorEvent::Error { .. })));
}
