//! Podcast RSS metadata: show fields from the channel plus the episode matching the source.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_client::{HttpClient, HttpError, HttpRequest};

const FEED_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] HttpError),

    #[error("feed returned status {0}")]
    Status(u16),

    #[error("feed is not valid RSS: {0}")]
    Parse(#[from] quick_xml::DeError),
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    description: Option<String>,
    language: Option<String>,
    #[serde(rename = "itunes:author")]
    author: Option<String>,
    #[serde(rename = "itunes:image")]
    image: Option<Href>,
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Href {
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
    #[serde(rename = "itunes:duration")]
    duration: Option<String>,
    #[serde(rename = "itunes:episode")]
    episode: Option<String>,
    #[serde(rename = "itunes:season")]
    season: Option<String>,
    #[serde(rename = "itunes:explicit")]
    explicit: Option<String>,
}

impl Item {
    fn matches(&self, url: &str, id: &str) -> bool {
        let same = |candidate: Option<&str>, target: &str| candidate.is_some_and(|value| value.trim() == target);
        same(self.link.as_deref(), url)
            || same(self.enclosure.as_ref().and_then(|e| e.url.as_deref()), url)
            || self
                .guid
                .as_ref()
                .and_then(|guid| guid.value.as_deref())
                .is_some_and(|guid| guid.trim() == url || guid.trim() == id)
    }
}

/// Show-level metadata and the matched episode, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpisodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty())
}

/// Parses an RSS document and picks the item whose link, enclosure or guid is
/// `episode_url` (or whose guid is `episode_id`).
pub fn parse_feed(xml: &str, episode_url: &str, episode_id: &str) -> Result<FeedMetadata, FeedError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    let channel = rss.channel;
    let episode = channel
        .items
        .into_iter()
        .find(|item| item.matches(episode_url, episode_id))
        .map(|item| EpisodeMetadata {
            duration_seconds: item.duration.as_deref().and_then(parse_duration),
            title: clean(item.title),
            description: clean(item.description),
            episode_number: clean(item.episode),
            season: clean(item.season),
            explicit: clean(item.explicit),
        });

    Ok(FeedMetadata {
        podcast_title: clean(channel.title),
        podcast_description: clean(channel.description),
        language: clean(channel.language),
        publisher: clean(channel.author),
        image: clean(channel.image.and_then(|image| image.href)),
        episode,
    })
}

/// Parses `itunes:duration` values: plain seconds, `MM:SS` or `HH:MM:SS`.
pub fn parse_duration(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut total = 0.0;
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    for part in parts {
        let value: f64 = part.trim().parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

/// Downloads and parses `feed_url`.
pub async fn fetch_feed(
    http: &dyn HttpClient,
    feed_url: &str,
    episode_url: &str,
    episode_id: &str,
) -> Result<FeedMetadata, FeedError> {
    let response = http
        .execute(HttpRequest::get(feed_url).with_timeout_ms(FEED_TIMEOUT_MS))
        .await?;
    if !response.is_success() {
        return Err(FeedError::Status(response.status));
    }
    parse_feed(&response.text(), episode_url, episode_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Rust Hour</title>
    <description><![CDATA[Weekly <b>systems</b> talk]]></description>
    <language>pt-br</language>
    <itunes:author>Ferris Media</itunes:author>
    <itunes:image href="https://cdn.test/cover.jpg"/>
    <item>
      <title>Episode 41</title>
      <guid isPermaLink="false">ep-41</guid>
      <enclosure url="https://cdn.test/ep41.mp3" length="100" type="audio/mpeg"/>
      <itunes:duration>3600</itunes:duration>
    </item>
    <item>
      <title>Episode 42: Async</title>
      <link>https://rusthour.test/42</link>
      <guid isPermaLink="false">ep-42</guid>
      <description>Executors and wakers</description>
      <enclosure url="https://cdn.test/ep42.mp3" length="200" type="audio/mpeg"/>
      <itunes:duration>1:02:03</itunes:duration>
      <itunes:episode>42</itunes:episode>
      <itunes:season>3</itunes:season>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn matches_episode_by_enclosure_url() {
        let feed = parse_feed(FEED, "https://cdn.test/ep42.mp3", "unrelated").expect("parses");

        assert_eq!(feed.podcast_title.as_deref(), Some("Rust Hour"));
        assert_eq!(feed.podcast_description.as_deref(), Some("Weekly <b>systems</b> talk"));
        assert_eq!(feed.language.as_deref(), Some("pt-br"));
        assert_eq!(feed.publisher.as_deref(), Some("Ferris Media"));
        assert_eq!(feed.image.as_deref(), Some("https://cdn.test/cover.jpg"));
        let episode = feed.episode.expect("episode found");
        assert_eq!(episode.title.as_deref(), Some("Episode 42: Async"));
        assert_eq!(episode.duration_seconds, Some(3723.0));
        assert_eq!(episode.episode_number.as_deref(), Some("42"));
        assert_eq!(episode.season.as_deref(), Some("3"));
    }

    #[test]
    fn matches_episode_by_guid() {
        let feed = parse_feed(FEED, "https://elsewhere.test/audio", "ep-41").expect("parses");

        assert_eq!(
            feed.episode.and_then(|episode| episode.title),
            Some(String::from("Episode 41"))
        );
    }

    #[test]
    fn unknown_episode_keeps_show_metadata() {
        let feed = parse_feed(FEED, "https://cdn.test/ep99.mp3", "ep-99").expect("parses");

        assert!(feed.episode.is_none());
        assert_eq!(feed.podcast_title.as_deref(), Some("Rust Hour"));
    }

    #[test]
    fn durations_accept_itunes_formats() {
        assert_eq!(parse_duration("95"), Some(95.0));
        assert_eq!(parse_duration("12:30"), Some(750.0));
        assert_eq!(parse_duration("01:00:00"), Some(3600.0));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("1:2:3:4"), None);
    }

    #[test]
    fn html_pages_are_rejected() {
        let error = parse_feed("<html><body>not a feed</body></html>", "u", "i").expect_err("not rss");

        assert!(matches!(error, FeedError::Parse(_)));
    }
}
