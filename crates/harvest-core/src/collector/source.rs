use serde::Serialize;

use crate::{ContentType, Platform, SourceDescriptor, ValidationError};

use super::CollectError;

/// Source after classification and defaulting; every field is resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSource {
    pub id: String,
    /// Filesystem-safe directory name derived from the id.
    pub slug: String,
    pub url: String,
    pub platform: Platform,
    pub max_items: usize,
    pub language: Option<String>,
    pub expected_speakers: Option<u32>,
    pub title: Option<String>,
    pub feed_url: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl NormalizedSource {
    /// Classifies `source` for a collector handling `accepted`.
    ///
    /// Fails without touching the network when the platform cannot be
    /// determined or belongs to another collector.
    pub fn from_descriptor(
        source: &SourceDescriptor,
        accepted: ContentType,
        default_max_items: impl Fn(Platform) -> usize,
    ) -> Result<Self, CollectError> {
        let url = source.url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl.into());
        }

        let platform = match source.platform.as_deref().map(str::trim).filter(|tag| !tag.is_empty()) {
            Some(tag) => Platform::parse(tag)
                .ok_or_else(|| CollectError::unsupported(url, format!("unknown platform '{tag}'")))?,
            None => Platform::classify_url(url)
                .ok_or_else(|| CollectError::unsupported(url, "cannot infer platform from URL"))?,
        };
        if platform.content_type() != accepted {
            return Err(CollectError::unsupported(
                url,
                format!(
                    "{platform} sources are handled by the {} collector",
                    platform.content_type().as_str()
                ),
            ));
        }

        let max_items = match source.max_items {
            Some(0) => return Err(ValidationError::ZeroMaxItems.into()),
            Some(max_items) => max_items,
            None => default_max_items(platform),
        };
        let id = source
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let slug = slugify(&id, platform.as_str());

        Ok(Self {
            id,
            slug,
            url: url.to_owned(),
            platform,
            max_items,
            language: source.language.clone(),
            expected_speakers: source.diarization.and_then(|hints| hints.expected_speakers),
            title: source.title.clone(),
            feed_url: source
                .feed_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned),
            duration_seconds: source.duration_seconds.filter(|seconds| seconds.is_finite() && *seconds > 0.0),
        })
    }
}

/// Lowercase ASCII slug of at most 60 characters.
pub fn slugify(value: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= 60 {
            break;
        }
    }
    let slug = slug.trim_matches('.').to_owned();
    if slug.is_empty() {
        fallback.to_owned()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(platform: Platform) -> usize {
        match platform {
            Platform::Reddit => 1000,
            _ => 100,
        }
    }

    #[test]
    fn infers_platform_and_defaults() {
        let source = SourceDescriptor::new("https://www.reddit.com/r/rust/comments/abc/title/");

        let normalized = NormalizedSource::from_descriptor(&source, ContentType::Social, defaults)
            .expect("classifies");

        assert_eq!(normalized.platform, Platform::Reddit);
        assert_eq!(normalized.max_items, 1000);
        assert!(!normalized.id.is_empty());
    }

    #[test]
    fn explicit_unknown_platform_is_unsupported() {
        let source = SourceDescriptor::new("https://mastodon.test/@user/1").with_platform("mastodon");

        let error = NormalizedSource::from_descriptor(&source, ContentType::Social, defaults)
            .expect_err("unsupported");

        assert_eq!(error.code(), "collect.unsupported_source");
    }

    #[test]
    fn other_content_types_are_rejected() {
        let source = SourceDescriptor::new("https://example.test/paper.pdf");

        let error = NormalizedSource::from_descriptor(&source, ContentType::Social, defaults)
            .expect_err("pdf is not social");

        assert!(error.to_string().contains("pdf collector"));
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("Elon's AMA / 2024", "social"), "elon-s-ama-2024");
        assert_eq!(slugify("///", "social"), "social");
        assert_eq!(slugify(&"a".repeat(80), "x").len(), 60);
    }
}
