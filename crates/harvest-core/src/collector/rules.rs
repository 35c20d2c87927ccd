//! Collector rules loaded from TOML. Every field has a default, so an empty
//! document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quality::QualityThresholds;
use crate::transcription::{PollingConfig, TranscriptionConfig};
use crate::{ConfigError, Platform, StrategyKind};

use super::strategy::StrategyChain;

/// Root of the rules document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub social: SocialRules,
    pub pdf: PdfRules,
    pub podcast: PodcastRules,
    pub quality: QualityThresholds,
    pub transcription: TranscriptionSettings,
}

impl HarvestConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|error| ConfigError::Parse {
            path: "<inline>".into(),
            message: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects explicitly empty chains and nonsensical tunables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chains = [
            ("social.twitter", &self.social.twitter.chain),
            ("social.reddit", &self.social.reddit.chain),
            ("social.linkedin", &self.social.linkedin.chain),
            ("pdf", &self.pdf.chain),
            ("podcast", &self.podcast.chain),
        ];
        for (name, chain) in chains {
            if chain.as_ref().is_some_and(Vec::is_empty) {
                return Err(ConfigError::Invalid(format!("{name}.chain must not be empty")));
            }
        }
        if self.transcription.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid(String::from(
                "transcription.chunk_size_bytes must be greater than zero",
            )));
        }
        if self.transcription.max_poll_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "transcription.max_poll_attempts must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Rules shared by the social platforms plus per-platform overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialRules {
    /// Provider name used for automation actors.
    pub actor_provider: String,
    pub actor_timeout_secs: u64,
    pub twitter: PlatformRules,
    pub reddit: PlatformRules,
    pub linkedin: PlatformRules,
}

impl Default for SocialRules {
    fn default() -> Self {
        Self {
            actor_provider: String::from("apify"),
            actor_timeout_secs: 300,
            twitter: PlatformRules::default(),
            reddit: PlatformRules::default(),
            linkedin: PlatformRules::default(),
        }
    }
}

impl SocialRules {
    pub fn platform(&self, platform: Platform) -> &PlatformRules {
        match platform {
            Platform::Reddit => &self.reddit,
            Platform::Linkedin => &self.linkedin,
            _ => &self.twitter,
        }
    }

    pub fn max_items(&self, platform: Platform) -> usize {
        self.platform(platform)
            .max_items
            .unwrap_or(match platform {
                Platform::Reddit => 1000,
                Platform::Linkedin => 10,
                _ => 100,
            })
    }

    pub fn actor_id(&self, platform: Platform) -> String {
        self.platform(platform).actor.clone().unwrap_or_else(|| {
            String::from(match platform {
                Platform::Reddit => "apify/reddit-scraper",
                Platform::Linkedin => "apify/linkedin-profile-scraper",
                _ => "apify/twitter-scraper",
            })
        })
    }

    pub fn chain(&self, platform: Platform) -> StrategyChain {
        let default: &[StrategyKind] = match platform {
            Platform::Linkedin => &[StrategyKind::Actor, StrategyKind::Scrape],
            _ => &[StrategyKind::Actor, StrategyKind::Api, StrategyKind::Scrape],
        };
        resolve_chain(self.platform(platform).chain.as_deref(), default)
    }
}

/// Per-platform social rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformRules {
    pub max_items: Option<usize>,
    pub chain: Option<Vec<StrategyKind>>,
    /// Raw page scraping is opt-in.
    pub allow_scrape: bool,
    /// Actor id overriding the platform default.
    pub actor: Option<String>,
    pub include_replies: bool,
}

/// PDF extraction rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfRules {
    pub chain: Option<Vec<StrategyKind>>,
    pub extractor_provider: String,
    /// Text extraction command; `{file}` is replaced with the PDF path.
    pub extract_command: Vec<String>,
    pub extract_timeout_secs: u64,
    pub keep_download: bool,
}

impl Default for PdfRules {
    fn default() -> Self {
        Self {
            chain: None,
            extractor_provider: String::from("pdf-extractor"),
            extract_command: vec![
                String::from("pdftotext"),
                String::from("-layout"),
                String::from("{file}"),
                String::from("-"),
            ],
            extract_timeout_secs: 120,
            keep_download: true,
        }
    }
}

impl PdfRules {
    pub fn chain(&self) -> StrategyChain {
        resolve_chain(self.chain.as_deref(), &[StrategyKind::Actor, StrategyKind::Scrape])
    }
}

/// Podcast transcription rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastRules {
    pub chain: Option<Vec<StrategyKind>>,
    pub transcript_provider: String,
    /// Download remote audio locally before uploading it.
    pub download_audio: bool,
    /// Keep downloaded audio after transcription.
    pub keep_audio: bool,
    pub default_speakers: u32,
    pub default_language: String,
}

impl Default for PodcastRules {
    fn default() -> Self {
        Self {
            chain: None,
            transcript_provider: String::from("podcast-transcript"),
            download_audio: false,
            keep_audio: false,
            default_speakers: 2,
            default_language: String::from("en"),
        }
    }
}

impl PodcastRules {
    pub fn chain(&self) -> StrategyChain {
        resolve_chain(self.chain.as_deref(), &[StrategyKind::Api, StrategyKind::Actor])
    }
}

/// Transcription tunables, in flat units suitable for TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub base_url: String,
    pub billing_rate_per_hour: f64,
    pub cost_warning_threshold: f64,
    pub chunk_size_bytes: usize,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        let config = TranscriptionConfig::default();
        Self {
            base_url: config.base_url,
            billing_rate_per_hour: config.billing_rate_per_hour,
            cost_warning_threshold: config.cost_warning_threshold,
            chunk_size_bytes: config.chunk_size,
            poll_interval_ms: config.polling.initial_interval.as_millis() as u64,
            max_poll_interval_ms: config.polling.max_interval.as_millis() as u64,
            max_poll_attempts: config.polling.max_attempts,
        }
    }
}

impl TranscriptionSettings {
    pub fn to_config(&self) -> TranscriptionConfig {
        TranscriptionConfig {
            base_url: self.base_url.clone(),
            billing_rate_per_hour: self.billing_rate_per_hour,
            cost_warning_threshold: self.cost_warning_threshold,
            chunk_size: self.chunk_size_bytes,
            polling: PollingConfig {
                initial_interval: Duration::from_millis(self.poll_interval_ms),
                max_interval: Duration::from_millis(self.max_poll_interval_ms),
                max_attempts: self.max_poll_attempts,
                ..PollingConfig::default()
            },
        }
    }
}

fn resolve_chain(configured: Option<&[StrategyKind]>, default: &[StrategyKind]) -> StrategyChain {
    configured
        .and_then(|steps| StrategyChain::new(steps.iter().copied()).ok())
        .or_else(|| StrategyChain::new(default.iter().copied()).ok())
        .unwrap_or_else(|| StrategyChain::single(StrategyKind::Scrape))
}
