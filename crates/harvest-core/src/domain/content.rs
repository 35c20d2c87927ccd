use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{QualityReport, UtcDateTime, ValidationError};

/// Platforms a source can be acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitter,
    Reddit,
    Linkedin,
    Pdf,
    Podcast,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::Linkedin => "linkedin",
            Self::Pdf => "pdf",
            Self::Podcast => "podcast",
        }
    }

    /// Parses an explicit platform tag. `x` is accepted as an alias for twitter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Some(Self::Twitter),
            "reddit" => Some(Self::Reddit),
            "linkedin" => Some(Self::Linkedin),
            "pdf" => Some(Self::Pdf),
            "podcast" | "audio" => Some(Self::Podcast),
            _ => None,
        }
    }

    /// Infers the platform from a URL host or file extension.
    pub fn classify_url(url: &str) -> Option<Self> {
        let lowered = url.trim().to_ascii_lowercase();
        let path = lowered
            .split(['?', '#'])
            .next()
            .unwrap_or(lowered.as_str());

        if path.ends_with(".pdf") {
            return Some(Self::Pdf);
        }
        if AUDIO_EXTENSIONS
            .iter()
            .any(|extension| path.ends_with(&format!(".{extension}")))
        {
            return Some(Self::Podcast);
        }

        let host = host_of(&lowered)?;
        if host == "twitter.com" || host.ends_with(".twitter.com") || host == "x.com" || host.ends_with(".x.com") {
            Some(Self::Twitter)
        } else if host == "reddit.com" || host.ends_with(".reddit.com") || host == "redd.it" {
            Some(Self::Reddit)
        } else if host == "linkedin.com" || host.ends_with(".linkedin.com") {
            Some(Self::Linkedin)
        } else {
            None
        }
    }

    pub const fn content_type(self) -> ContentType {
        match self {
            Self::Twitter | Self::Reddit | Self::Linkedin => ContentType::Social,
            Self::Pdf => ContentType::Pdf,
            Self::Podcast => ContentType::Audio,
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio file extensions recognised as podcast sources.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "ogg", "flac", "aac"];

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Collector family handling a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Social,
    Pdf,
    Audio,
}

impl ContentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Pdf => "pdf",
            Self::Audio => "audio",
        }
    }
}

/// Acquisition strategy kinds, tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Third-party automation actor invoked through a tool provider.
    #[serde(alias = "automation-actor", alias = "apify")]
    Actor,
    /// First-party platform API.
    #[serde(alias = "native-api")]
    Api,
    /// Raw page or file retrieval.
    #[serde(alias = "raw-scrape")]
    Scrape,
}

impl StrategyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Api => "api",
            Self::Scrape => "scrape",
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "actor" | "automation-actor" | "apify" => Ok(Self::Actor),
            "api" | "native-api" => Ok(Self::Api),
            "scrape" | "raw-scrape" => Ok(Self::Scrape),
            _ => Err(ValidationError::InvalidStrategy {
                value: value.to_owned(),
            }),
        }
    }
}

/// Speaker diarization hints for audio sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiarizationHints {
    #[serde(default)]
    pub expected_speakers: Option<u32>,
}

/// Caller-supplied description of one source to acquire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub diarization: Option<DiarizationHints>,
    #[serde(default)]
    pub title: Option<String>,
    /// Podcast RSS feed carrying show and episode metadata.
    #[serde(default, alias = "rss_url")]
    pub feed_url: Option<String>,
    /// Known episode length; drives the transcription cost estimate.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_expected_speakers(mut self, speakers: u32) -> Self {
        self.diarization = Some(DiarizationHints {
            expected_speakers: Some(speakers),
        });
        self
    }

    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = Some(feed_url.into());
        self
    }

    pub fn with_duration_seconds(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

/// Shape of a single acquired content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Comment,
    Utterance,
    Page,
}

/// One post, comment, utterance or page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

impl ContentItem {
    fn bare(kind: ItemKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            author: None,
            text: text.into(),
            created_at: None,
            score: None,
            parent_id: None,
            start_ms: None,
            end_ms: None,
            confidence: None,
            metrics: None,
        }
    }

    pub fn post(text: impl Into<String>) -> Self {
        Self::bare(ItemKind::Post, text)
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::bare(ItemKind::Comment, text)
    }

    pub fn page(number: usize, text: impl Into<String>) -> Self {
        Self::bare(ItemKind::Page, text).with_id(format!("page-{number}"))
    }

    /// Diarized utterance; `speaker` is stored in the author slot.
    pub fn utterance(speaker: impl Into<String>, text: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        let mut item = Self::bare(ItemKind::Utterance, text).with_author(speaker);
        item.start_ms = Some(start_ms);
        item.end_ms = Some(end_ms);
        item
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_created_at(mut self, created_at: Option<String>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_score(mut self, score: Option<i64>) -> Self {
        self.score = score;
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Value>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Provenance of an acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    pub collected_at: UtcDateTime,
    /// Strategy that produced the items.
    pub method: StrategyKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Aggregate counters of an acquisition. `total_items` always equals the item count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    pub total_items: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalized outcome of a successful strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub platform: Platform,
    pub url: String,
    pub items: Vec<ContentItem>,
    pub metadata: AcquisitionMetadata,
    pub stats: AcquisitionStats,
}

impl AcquisitionResult {
    pub fn new(platform: Platform, url: impl Into<String>, method: StrategyKind, items: Vec<ContentItem>) -> Self {
        let total_items = items.len();
        Self {
            platform,
            url: url.into(),
            items,
            metadata: AcquisitionMetadata {
                collected_at: UtcDateTime::now(),
                method,
                extra: Map::new(),
            },
            stats: AcquisitionStats {
                total_items,
                extra: Map::new(),
            },
        }
    }
}

/// Persisted artifact written once per collected source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorOutput {
    pub source_id: String,
    #[serde(flatten)]
    pub result: AcquisitionResult,
    pub quality: QualityReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_hosts_and_extensions() {
        assert_eq!(
            Platform::classify_url("https://x.com/user/status/1"),
            Some(Platform::Twitter)
        );
        assert_eq!(
            Platform::classify_url("https://www.reddit.com/r/rust/comments/abc/title/"),
            Some(Platform::Reddit)
        );
        assert_eq!(
            Platform::classify_url("https://www.linkedin.com/posts/someone"),
            Some(Platform::Linkedin)
        );
        assert_eq!(
            Platform::classify_url("https://example.test/paper.PDF?download=1"),
            Some(Platform::Pdf)
        );
        assert_eq!(
            Platform::classify_url("/tmp/episode-12.m4a"),
            Some(Platform::Podcast)
        );
        assert_eq!(Platform::classify_url("https://notreddit.com/x"), None);
    }

    #[test]
    fn strategy_aliases_parse() {
        assert_eq!("native-api".parse::<StrategyKind>(), Ok(StrategyKind::Api));
        assert_eq!("apify".parse::<StrategyKind>(), Ok(StrategyKind::Actor));
        assert!("carrier-pigeon".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn result_stats_track_item_count() {
        let result = AcquisitionResult::new(
            Platform::Reddit,
            "https://reddit.com/r/rust",
            StrategyKind::Api,
            vec![ContentItem::post("a"), ContentItem::comment("b")],
        );

        assert_eq!(result.stats.total_items, 2);
        let json = serde_json::to_value(&result).expect("serializes");
        assert_eq!(json["metadata"]["method"], "api");
        assert_eq!(json["stats"]["total_items"], 2);
    }
}
