//! Social collector: Twitter/X threads, Reddit threads and LinkedIn posts.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use tracing::debug;

use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::provider::ToolProviderClient;
use crate::quality::{assess_social, QualityThresholds};
use crate::retry::{execute_with_retry, RetryConfig};
use crate::throttling::{ThrottlePolicy, ThrottlingQueue};
use crate::{AcquisitionResult, ContentItem, ContentType, Platform, QualityReport, StrategyKind, UtcDateTime};

use super::fields::{bool_at, entries, int_at, segment_after, text_at};
use super::rules::SocialRules;
use super::source::NormalizedSource;
use super::strategy::{Acquisition, Strategy, StrategyChain, StrategyContext, StrategyFuture, StrategyTable};
use super::{CollectError, ContentPipeline};

pub const TWITTER_API_BASE: &str = "https://api.twitter.com";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const USER_AGENT: &str = "harvest-social-collector/0.1";
const TWEET_FIELDS: &str = "created_at,conversation_id,in_reply_to_user_id,public_metrics,author_id";
const USER_FIELDS: &str = "name,username,verified";

/// Native API credentials; absent values make the matching `api` strategy unavailable.
#[derive(Clone, Default)]
pub struct SocialCredentials {
    pub twitter_bearer_token: Option<String>,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
}

impl SocialCredentials {
    /// Reads `TWITTER_BEARER_TOKEN`, `REDDIT_CLIENT_ID` and `REDDIT_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            twitter_bearer_token: read("TWITTER_BEARER_TOKEN"),
            reddit_client_id: read("REDDIT_CLIENT_ID"),
            reddit_client_secret: read("REDDIT_CLIENT_SECRET"),
        }
    }
}

impl Debug for SocialCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialCredentials")
            .field("twitter_bearer_token", &self.twitter_bearer_token.is_some())
            .field("reddit_client_id", &self.reddit_client_id.is_some())
            .field("reddit_client_secret", &self.reddit_client_secret.is_some())
            .finish()
    }
}

/// Strategies and rules of the social collector.
pub struct SocialPipeline {
    rules: SocialRules,
    thresholds: QualityThresholds,
    table: StrategyTable,
}

impl SocialPipeline {
    pub fn new(
        rules: SocialRules,
        thresholds: QualityThresholds,
        providers: Arc<ToolProviderClient>,
        http: Arc<dyn HttpClient>,
        credentials: SocialCredentials,
    ) -> Self {
        let mut table = StrategyTable::default();
        for platform in [Platform::Twitter, Platform::Reddit, Platform::Linkedin] {
            table.insert(
                platform,
                Arc::new(ActorStrategy {
                    providers: Arc::clone(&providers),
                    provider: rules.actor_provider.clone(),
                    actor_id: rules.actor_id(platform),
                    timeout_secs: rules.actor_timeout_secs,
                    include_replies: rules.platform(platform).include_replies,
                }),
            );
        }

        let scrape_throttle = ThrottlingQueue::new(ThrottlePolicy::scrape_default());
        table.insert(
            Platform::Twitter,
            Arc::new(TwitterApiStrategy {
                http: Arc::clone(&http),
                bearer_token: credentials.twitter_bearer_token,
                base_url: TWITTER_API_BASE.to_owned(),
                throttle: ThrottlingQueue::new(ThrottlePolicy::twitter_default()),
                retry: RetryConfig::default(),
            }),
        );
        table.insert(
            Platform::Reddit,
            Arc::new(RedditApiStrategy {
                http: Arc::clone(&http),
                client_id: credentials.reddit_client_id,
                client_secret: credentials.reddit_client_secret,
                token_url: REDDIT_TOKEN_URL.to_owned(),
                api_base: REDDIT_API_BASE.to_owned(),
                throttle: ThrottlingQueue::new(ThrottlePolicy::reddit_default()),
                retry: RetryConfig::default(),
            }),
        );
        table.insert(
            Platform::Reddit,
            Arc::new(RedditJsonStrategy {
                http: Arc::clone(&http),
                throttle: scrape_throttle.clone(),
                retry: RetryConfig::default(),
            }),
        );
        for platform in [Platform::Twitter, Platform::Linkedin] {
            table.insert(
                platform,
                Arc::new(PageScrapeStrategy {
                    http: Arc::clone(&http),
                    allow_scrape: rules.platform(platform).allow_scrape,
                    throttle: scrape_throttle.clone(),
                    retry: RetryConfig::default(),
                }),
            );
        }

        Self {
            rules,
            thresholds,
            table,
        }
    }

    /// Replaces the strategy registered for `platform` under `strategy.kind()`.
    pub fn with_strategy(mut self, platform: Platform, strategy: Arc<dyn Strategy>) -> Self {
        self.table.insert(platform, strategy);
        self
    }

    pub fn rules(&self) -> &SocialRules {
        &self.rules
    }
}

impl ContentPipeline for SocialPipeline {
    fn content_type(&self) -> ContentType {
        ContentType::Social
    }

    fn default_max_items(&self, platform: Platform) -> usize {
        self.rules.max_items(platform)
    }

    fn chain(&self, platform: Platform) -> StrategyChain {
        self.rules.chain(platform)
    }

    fn strategies(&self) -> &StrategyTable {
        &self.table
    }

    fn summarize(&self, source: &NormalizedSource, result: &mut AcquisitionResult) {
        if source.platform == Platform::Twitter {
            let mentions = mentions(result.items.iter().map(|item| item.text.as_str()));
            result.stats.extra.insert(String::from("mentions"), json!(mentions));
        }
        let authors: BTreeSet<&str> = result
            .items
            .iter()
            .filter_map(|item| item.author.as_deref())
            .collect();
        result
            .stats
            .extra
            .insert(String::from("unique_authors"), json!(authors.len()));
    }

    fn assess(&self, _source: &NormalizedSource, result: &AcquisitionResult) -> QualityReport {
        assess_social(result, &self.thresholds)
    }
}

/// Distinct `@handles` in order of first appearance.
pub fn mentions<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    static MENTION: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = MENTION.get_or_init(|| Regex::new(r"@(\w{1,15})").ok()) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut handles = Vec::new();
    for text in texts {
        for capture in pattern.captures_iter(text) {
            let handle = capture[1].to_owned();
            if seen.insert(handle.to_ascii_lowercase()) {
                handles.push(handle);
            }
        }
    }
    handles
}

/// Automation actor run through the tool provider client.
pub struct ActorStrategy {
    providers: Arc<ToolProviderClient>,
    provider: String,
    actor_id: String,
    timeout_secs: u64,
    include_replies: bool,
}

impl ActorStrategy {
    fn input(&self, source: &NormalizedSource) -> Value {
        match source.platform {
            Platform::Reddit => json!({
                "postUrl": source.url,
                "maxDepth": 2,
                "maxComments": source.max_items,
            }),
            Platform::Linkedin => json!({
                "startUrls": [{ "url": source.url }],
                "maxResults": 1,
                "includeComments": self.include_replies,
            }),
            _ => json!({
                "tweetUrl": source.url,
                "tweetId": segment_after(&source.url, "status"),
                "maxItems": source.max_items,
                "maxTweets": source.max_items,
                "includeReplies": self.include_replies,
            }),
        }
    }
}

impl Strategy for ActorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Actor
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let params = json!({
                "actorId": self.actor_id,
                "input": self.input(source),
                "options": { "timeout": self.timeout_secs },
            });
            ctx.events
                .status("actor", format!("running actor {} via {}", self.actor_id, self.provider));
            let output = self
                .providers
                .call(&self.provider, "runActor", params)
                .await?
                .ok_or_else(|| {
                    CollectError::unavailable(
                        StrategyKind::Actor,
                        format!("provider '{}' is disabled", self.provider),
                    )
                })?;

            let acquisition = match source.platform {
                Platform::Reddit => reddit_actor_output(&output, source.max_items),
                Platform::Linkedin => linkedin_actor_output(&output),
                _ => twitter_actor_output(&output, source),
            };
            if acquisition.items.is_empty() {
                return Err(CollectError::failed(StrategyKind::Actor, "actor returned no items"));
            }
            Ok(acquisition)
        })
    }
}

fn twitter_actor_output(output: &Value, source: &NormalizedSource) -> Acquisition {
    let root_id = segment_after(&source.url, "status");
    let items: Vec<ContentItem> = entries(output, &["items", "defaultDatasetItems"])
        .iter()
        .filter_map(|entry| {
            let text = text_at(entry, &["/full_text", "/text"])?;
            let id = text_at(entry, &["/id_str", "/id"]);
            let is_root = root_id.is_none() || id.as_deref() == root_id;
            let item = if is_root {
                ContentItem::post(text)
            } else {
                ContentItem::comment(text).with_parent(text_at(
                    entry,
                    &["/in_reply_to_status_id_str", "/inReplyToId", "/conversationId"],
                ))
            };
            let mut item = item
                .with_created_at(text_at(entry, &["/created_at", "/createdAt", "/date"]))
                .with_metrics(Some(json!({
                    "retweets": int_at(entry, &["/retweet_count", "/retweetCount"]).unwrap_or(0),
                    "likes": int_at(entry, &["/favorite_count", "/likeCount"]).unwrap_or(0),
                    "replies": int_at(entry, &["/reply_count", "/replyCount"]).unwrap_or(0),
                })));
            item.id = id;
            item.author = text_at(entry, &["/user/screen_name", "/author/userName", "/username"]);
            Some(item)
        })
        .take(source.max_items)
        .collect();

    let first = entries(output, &["items", "defaultDatasetItems"]).first();
    let total = items.len();
    Acquisition::new(items)
        .with_metadata(
            "author",
            first.and_then(|entry| text_at(entry, &["/user/screen_name", "/author/userName", "/username"])),
        )
        .with_metadata(
            "display_name",
            first.and_then(|entry| text_at(entry, &["/user/name", "/author/name"])),
        )
        .with_metadata(
            "verified",
            first.and_then(|entry| bool_at(entry, &["/user/verified", "/author/isVerified"])),
        )
        .with_metadata("total_tweets", total)
}

fn reddit_actor_output(output: &Value, max_items: usize) -> Acquisition {
    let post = output.get("post").unwrap_or(output);
    let items: Vec<ContentItem> = entries(output, &["comments", "items", "defaultDatasetItems"])
        .iter()
        .filter_map(|entry| {
            let text = text_at(entry, &["/text", "/body"])?;
            let mut item = ContentItem::comment(text)
                .with_score(int_at(entry, &["/score", "/upVotes"]))
                .with_created_at(text_at(entry, &["/createdAt", "/created_at"]))
                .with_parent(text_at(entry, &["/parentId", "/parent_id"]));
            item.id = text_at(entry, &["/id"]);
            item.author = text_at(entry, &["/author", "/username"]);
            Some(item)
        })
        .take(max_items)
        .collect();

    let total = int_at(post, &["/num_comments", "/numberOfComments"]).unwrap_or(items.len() as i64);
    Acquisition::new(items)
        .with_metadata("thread_title", text_at(post, &["/title", "/postTitle"]))
        .with_metadata("subreddit", text_at(post, &["/subreddit", "/communityName"]))
        .with_metadata("author", text_at(post, &["/author", "/username"]))
        .with_metadata("score", int_at(post, &["/score", "/upVotes"]))
        .with_metadata("total_comments", total)
}

fn linkedin_actor_output(output: &Value) -> Acquisition {
    let Some(entry) = entries(output, &["items", "defaultDatasetItems", "posts"]).first() else {
        return Acquisition::default();
    };
    let Some(text) = text_at(entry, &["/text", "/summary", "/content"]) else {
        return Acquisition::default();
    };
    let author = text_at(entry, &["/author/name", "/author", "/profileName", "/fullName"]);
    let mut item = ContentItem::post(text).with_created_at(text_at(entry, &["/publishedAt", "/date", "/postedAt"]));
    item.id = text_at(entry, &["/id", "/urn"]);
    item.author = author.clone();
    Acquisition::new(vec![item])
        .with_metadata("author", author)
        .with_metadata("headline", text_at(entry, &["/headline", "/author/headline"]))
}

/// Twitter API v2: the root tweet resolves the conversation, recent search fetches the replies.
pub struct TwitterApiStrategy {
    http: Arc<dyn HttpClient>,
    bearer_token: Option<String>,
    base_url: String,
    throttle: ThrottlingQueue,
    retry: RetryConfig,
}

impl TwitterApiStrategy {
    async fn get(&self, request: HttpRequest) -> Result<Value, CollectError> {
        send_json(self.http.as_ref(), &self.throttle, &self.retry, request, StrategyKind::Api).await
    }
}

impl Strategy for TwitterApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let Some(token) = self.bearer_token.as_deref() else {
                return Err(CollectError::unavailable(
                    StrategyKind::Api,
                    "TWITTER_BEARER_TOKEN is not set",
                ));
            };
            let tweet_id = segment_after(&source.url, "status")
                .map(|segment| segment.chars().take_while(char::is_ascii_digit).collect::<String>())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| CollectError::failed(StrategyKind::Api, "no tweet id in URL"))?;
            let auth = HttpAuth::BearerToken(token.to_owned());

            ctx.events.status("api", format!("fetching tweet {tweet_id}"));
            let root = self
                .get(
                    HttpRequest::get(format!("{}/2/tweets/{tweet_id}", self.base_url))
                        .with_query("expansions", "author_id,referenced_tweets.id")
                        .with_query("tweet.fields", TWEET_FIELDS)
                        .with_query("user.fields", USER_FIELDS)
                        .with_auth(&auth),
                )
                .await?;
            let conversation_id =
                text_at(&root, &["/data/conversation_id"]).unwrap_or_else(|| tweet_id.clone());

            ctx.events
                .status("api", format!("searching conversation {conversation_id}"));
            let page_size = source.max_items.clamp(10, 100);
            let replies = self
                .get(
                    HttpRequest::get(format!("{}/2/tweets/search/recent", self.base_url))
                        .with_query("query", format!("conversation_id:{conversation_id}"))
                        .with_query("max_results", page_size.to_string())
                        .with_query("tweet.fields", TWEET_FIELDS)
                        .with_query("expansions", "attachments.media_keys,author_id")
                        .with_query("user.fields", USER_FIELDS)
                        .with_auth(&auth),
                )
                .await?;

            let mut users = HashMap::new();
            for payload in [&root, &replies] {
                for user in entries(&payload["includes"], &["users"]) {
                    if let (Some(id), Some(username)) = (text_at(user, &["/id"]), text_at(user, &["/username"])) {
                        users.insert(id, username);
                    }
                }
            }

            let mut tweets = Vec::new();
            if root.get("data").is_some_and(Value::is_object) {
                tweets.push(tweet_item(&root["data"], &users, &tweet_id));
            }
            tweets.extend(
                entries(&replies, &["data"])
                    .iter()
                    .filter(|tweet| text_at(tweet, &["/id"]).as_deref() != Some(tweet_id.as_str()))
                    .map(|tweet| tweet_item(tweet, &users, &tweet_id)),
            );
            tweets.sort_by(|left, right| left.created_at.cmp(&right.created_at));
            tweets.truncate(source.max_items);
            if tweets.is_empty() {
                return Err(CollectError::failed(StrategyKind::Api, "tweet not found"));
            }

            let author_id = text_at(&root, &["/data/author_id"]);
            let author = author_id.as_ref().and_then(|id| users.get(id)).cloned();
            let root_user = entries(&root["includes"], &["users"])
                .iter()
                .find(|user| text_at(user, &["/id"]) == author_id);
            let total = tweets.len();
            Ok(Acquisition::new(tweets)
                .with_metadata("author", author)
                .with_metadata("display_name", root_user.and_then(|user| text_at(user, &["/name"])))
                .with_metadata("verified", root_user.and_then(|user| bool_at(user, &["/verified"])))
                .with_metadata("conversation_id", conversation_id)
                .with_metadata("total_tweets", total))
        })
    }
}

fn tweet_item(tweet: &Value, users: &HashMap<String, String>, root_id: &str) -> ContentItem {
    let text = text_at(tweet, &["/text"]).unwrap_or_default();
    let id = text_at(tweet, &["/id"]);
    let item = if id.as_deref() == Some(root_id) {
        ContentItem::post(text)
    } else {
        ContentItem::comment(text).with_parent(text_at(tweet, &["/conversation_id"]))
    };
    let author_id = text_at(tweet, &["/author_id"]);
    let mut item = item
        .with_created_at(text_at(tweet, &["/created_at"]))
        .with_metrics(tweet.get("public_metrics").cloned());
    item.id = id;
    item.author = author_id
        .as_ref()
        .and_then(|author_id| users.get(author_id).cloned())
        .or(author_id);
    item
}

/// Reddit OAuth API with an application-only token.
pub struct RedditApiStrategy {
    http: Arc<dyn HttpClient>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: String,
    api_base: String,
    throttle: ThrottlingQueue,
    retry: RetryConfig,
}

impl RedditApiStrategy {
    async fn access_token(&self, client_id: &str, client_secret: &str) -> Result<String, CollectError> {
        let request = HttpRequest::post(&self.token_url)
            .with_form(&[("grant_type", "client_credentials")])
            .with_header("user-agent", USER_AGENT)
            .with_auth(&HttpAuth::Basic {
                username: client_id.to_owned(),
                password: client_secret.to_owned(),
            });
        let body = send_json(self.http.as_ref(), &self.throttle, &self.retry, request, StrategyKind::Api).await?;
        text_at(&body, &["/access_token"])
            .ok_or_else(|| CollectError::failed(StrategyKind::Api, "token response carried no access_token"))
    }
}

impl Strategy for RedditApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let (Some(client_id), Some(client_secret)) = (self.client_id.as_deref(), self.client_secret.as_deref())
            else {
                return Err(CollectError::unavailable(
                    StrategyKind::Api,
                    "REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET are not set",
                ));
            };
            let post_id = segment_after(&source.url, "comments")
                .ok_or_else(|| CollectError::failed(StrategyKind::Api, "no post id in URL"))?;

            ctx.events.status("api", "requesting reddit access token");
            let token = self.access_token(client_id, client_secret).await?;

            ctx.events.status("api", format!("fetching thread {post_id}"));
            let request = HttpRequest::get(format!("{}/comments/{post_id}", self.api_base))
                .with_query("depth", "2")
                .with_query("limit", source.max_items.min(500).to_string())
                .with_query("raw_json", "1")
                .with_header("user-agent", USER_AGENT)
                .with_auth(&HttpAuth::BearerToken(token));
            let listing = send_json(self.http.as_ref(), &self.throttle, &self.retry, request, StrategyKind::Api).await?;
            reddit_listing(&listing, source.max_items, StrategyKind::Api)
        })
    }
}

/// Reddit's public `.json` rendering of a thread.
pub struct RedditJsonStrategy {
    http: Arc<dyn HttpClient>,
    throttle: ThrottlingQueue,
    retry: RetryConfig,
}

impl Strategy for RedditJsonStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Scrape
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let base = source.url.split(['?', '#']).next().unwrap_or(&source.url);
            let url = format!("{}.json", base.trim_end_matches('/'));
            ctx.events.status("scrape", format!("fetching {url}"));
            let request = HttpRequest::get(url)
                .with_query("limit", source.max_items.min(500).to_string())
                .with_query("raw_json", "1")
                .with_header("user-agent", USER_AGENT);
            let listing =
                send_json(self.http.as_ref(), &self.throttle, &self.retry, request, StrategyKind::Scrape).await?;
            reddit_listing(&listing, source.max_items, StrategyKind::Scrape)
        })
    }
}

/// Normalizes a `[post listing, comment listing]` pair into a post followed by its comments.
pub fn reddit_listing(listing: &Value, max_items: usize, kind: StrategyKind) -> Result<Acquisition, CollectError> {
    let post = &listing[0]["data"]["children"][0]["data"];
    if !post.is_object() {
        return Err(CollectError::failed(kind, "unexpected reddit listing shape"));
    }

    let mut items = Vec::new();
    collect_comments(&listing[1]["data"]["children"], max_items, &mut items);
    items.truncate(max_items);
    let total_comments = int_at(post, &["/num_comments"]).unwrap_or(items.len() as i64);

    Ok(Acquisition::new(items)
        .with_metadata("post_id", text_at(post, &["/name", "/id"]))
        .with_metadata("thread_title", text_at(post, &["/title"]))
        .with_metadata("post_body", text_at(post, &["/selftext"]))
        .with_metadata("subreddit", text_at(post, &["/subreddit"]))
        .with_metadata("author", text_at(post, &["/author"]))
        .with_metadata("score", int_at(post, &["/score"]))
        .with_metadata("created_at", reddit_timestamp(post))
        .with_metadata("total_comments", total_comments))
}

fn collect_comments(children: &Value, max_items: usize, items: &mut Vec<ContentItem>) {
    for child in children.as_array().map(Vec::as_slice).unwrap_or(&[]) {
        if items.len() >= max_items {
            return;
        }
        if child["kind"] != "t1" {
            continue;
        }
        let data = &child["data"];
        if let Some(body) = text_at(data, &["/body"]) {
            let mut comment = ContentItem::comment(body)
                .with_score(int_at(data, &["/score"]))
                .with_created_at(reddit_timestamp(data))
                .with_parent(text_at(data, &["/parent_id"]));
            comment.id = text_at(data, &["/name", "/id"]);
            comment.author = text_at(data, &["/author"]);
            items.push(comment);
        }
        collect_comments(&data["replies"]["data"]["children"], max_items, items);
    }
}

fn reddit_timestamp(data: &Value) -> Option<String> {
    let seconds = data.get("created_utc")?.as_f64()?;
    UtcDateTime::from_unix_seconds(seconds).map(UtcDateTime::format_rfc3339)
}

/// Raw HTML retrieval reduced to one text item; opt-in per platform.
pub struct PageScrapeStrategy {
    http: Arc<dyn HttpClient>,
    allow_scrape: bool,
    throttle: ThrottlingQueue,
    retry: RetryConfig,
}

impl Strategy for PageScrapeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Scrape
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            if !self.allow_scrape {
                return Err(CollectError::unavailable(
                    StrategyKind::Scrape,
                    format!("scraping is disabled for {}", source.platform),
                ));
            }
            ctx.events.status("scrape", format!("fetching {}", source.url));
            let request = HttpRequest::get(&source.url).with_header("user-agent", USER_AGENT);
            let response = send(self.http.as_ref(), &self.throttle, &self.retry, request, StrategyKind::Scrape).await?;
            let page = PageText::from_html(&response.text());
            let text = page
                .description
                .filter(|description| !description.trim().is_empty())
                .unwrap_or(page.body);
            if text.trim().is_empty() {
                return Err(CollectError::failed(StrategyKind::Scrape, "page has no readable text"));
            }
            Ok(Acquisition::new(vec![ContentItem::post(text)]).with_metadata("title", page.title))
        })
    }
}

/// Readable parts of an HTML page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: String,
}

impl PageText {
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let first = |selector: &str| first_match(&document, selector);

        let title = first("title")
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .filter(|title| !title.is_empty());
        let description = first("meta[property='og:description']")
            .or_else(|| first("meta[name='description']"))
            .and_then(|element| element.value().attr("content"))
            .map(collapse_whitespace)
            .filter(|description| !description.is_empty());
        let body = first("main")
            .or_else(|| first("article"))
            .or_else(|| first("body"))
            .map(visible_text)
            .unwrap_or_default();

        Self {
            title,
            description,
            body,
        }
    }
}

fn first_match<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|element| element.name().to_owned()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            parts.push((**text).to_owned());
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn send(
    http: &dyn HttpClient,
    throttle: &ThrottlingQueue,
    retry: &RetryConfig,
    request: HttpRequest,
    kind: StrategyKind,
) -> Result<HttpResponse, CollectError> {
    let waited = throttle.wait_for_budget().await;
    if !waited.is_zero() {
        debug!(strategy = %kind, waited_ms = waited.as_millis() as u64, "throttled before request");
    }
    let response = execute_with_retry(http, request, retry).await?;
    if !response.is_success() {
        return Err(CollectError::Http(HttpError::status(response.status)));
    }
    Ok(response)
}

async fn send_json(
    http: &dyn HttpClient,
    throttle: &ThrottlingQueue,
    retry: &RetryConfig,
    request: HttpRequest,
    kind: StrategyKind,
) -> Result<Value, CollectError> {
    let response = send(http, throttle, retry, request, kind).await?;
    response
        .json::<Value>()
        .map_err(|error| CollectError::failed(kind, format!("invalid JSON response: {error}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::http_client::HttpFuture;

    use super::*;
    use crate::collector::events::EventSink;
    use crate::collector::SourceCollector;
    use crate::provider::ProviderRegistry;
    use crate::{ItemKind, SourceDescriptor};

    /// Answers by URL prefix and records every requested URL.
    struct RoutedClient {
        routes: Vec<(&'static str, HttpResponse)>,
        requests: Mutex<Vec<String>>,
    }

    impl RoutedClient {
        fn new(routes: Vec<(&'static str, HttpResponse)>) -> Arc<Self> {
            Arc::new(Self {
                routes,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for RoutedClient {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
            Box::pin(async move {
                self.requests.lock().expect("lock").push(request.full_url());
                self.routes
                    .iter()
                    .find(|(prefix, _)| request.url.starts_with(prefix))
                    .map(|(_, response)| response.clone())
                    .ok_or_else(|| HttpError::non_retryable(format!("no route for {}", request.url)))
            })
        }
    }

    fn reddit_thread() -> Value {
        json!([
            { "data": { "children": [{ "kind": "t3", "data": {
                "name": "t3_abc", "title": "Ask me anything", "selftext": "Details inside",
                "subreddit": "rust", "author": "op", "score": 120, "num_comments": 57,
                "created_utc": 1_700_000_000.0
            }}]}},
            { "data": { "children": [
                { "kind": "t1", "data": {
                    "name": "t1_c1", "author": "alice", "body": "First comment", "score": 5,
                    "parent_id": "t3_abc", "created_utc": 1_700_000_100.0,
                    "replies": { "data": { "children": [
                        { "kind": "t1", "data": {
                            "name": "t1_c2", "author": "bob", "body": "Nested reply", "score": 2,
                            "parent_id": "t1_c1", "created_utc": 1_700_000_200.0, "replies": ""
                        }}
                    ]}}
                }},
                { "kind": "more", "data": { "children": ["x"] } }
            ]}}
        ])
    }

    fn pipeline(http: Arc<dyn HttpClient>, rules: SocialRules, credentials: SocialCredentials) -> SocialPipeline {
        let registry = ProviderRegistry::from_specs(Default::default()).expect("empty registry");
        SocialPipeline::new(
            rules,
            QualityThresholds::default(),
            Arc::new(ToolProviderClient::new(registry)),
            http,
            credentials,
        )
    }

    fn normalized(url: &str, max_items: usize) -> NormalizedSource {
        let descriptor = SourceDescriptor::new(url).with_max_items(max_items);
        NormalizedSource::from_descriptor(&descriptor, ContentType::Social, |_| 100).expect("valid source")
    }

    fn context() -> StrategyContext {
        StrategyContext {
            source_dir: std::env::temp_dir(),
            events: EventSink::detached("test"),
        }
    }

    #[test]
    fn reddit_listing_flattens_nested_comments() {
        let acquisition = reddit_listing(&reddit_thread(), 10, StrategyKind::Scrape).expect("parses");

        assert_eq!(acquisition.items.len(), 2);
        assert!(acquisition.items.iter().all(|item| item.kind == ItemKind::Comment));
        assert_eq!(acquisition.items[0].text, "First comment");
        assert_eq!(acquisition.items[1].parent_id.as_deref(), Some("t1_c1"));
        assert_eq!(acquisition.metadata["thread_title"], "Ask me anything");
        assert_eq!(acquisition.metadata["post_body"], "Details inside");
        assert_eq!(acquisition.metadata["subreddit"], "rust");
        assert_eq!(
            acquisition.items[0].created_at.as_deref(),
            Some("2023-11-14T22:15:00Z")
        );
    }

    #[test]
    fn reddit_listing_reports_thread_comment_count() {
        let acquisition = reddit_listing(&reddit_thread(), 10, StrategyKind::Api).expect("parses");

        assert_eq!(acquisition.metadata["total_comments"], 57);
    }

    #[test]
    fn reddit_listing_spends_max_items_on_comments() {
        let acquisition = reddit_listing(&reddit_thread(), 1, StrategyKind::Api).expect("parses");

        assert_eq!(acquisition.items.len(), 1);
        assert_eq!(acquisition.items[0].id.as_deref(), Some("t1_c1"));
    }

    #[test]
    fn mentions_are_distinct_and_ordered() {
        let handles = mentions(["thanks @Alice and @bob", "cc @alice @carol"]);

        assert_eq!(handles, vec!["Alice", "bob", "carol"]);
    }

    #[test]
    fn page_text_prefers_visible_main_content() {
        let page = PageText::from_html(
            "<html><head><title> A post </title><script>var x = 1;</script></head>\
             <body><nav>menu</nav><main><p>Hello   world</p><script>track()</script></main></body></html>",
        );

        assert_eq!(page.title.as_deref(), Some("A post"));
        assert_eq!(page.body, "Hello world");
        assert_eq!(page.description, None);
    }

    #[tokio::test]
    async fn twitter_api_collects_conversation_sorted_by_time() {
        let http = RoutedClient::new(vec![
            (
                "https://api.twitter.com/2/tweets/search/recent",
                HttpResponse::ok_json(
                    json!({
                        "data": [
                            { "id": "3", "text": "late reply @carol", "author_id": "u2",
                              "conversation_id": "1", "created_at": "2024-01-01T00:10:00Z" },
                            { "id": "2", "text": "early reply", "author_id": "u2",
                              "conversation_id": "1", "created_at": "2024-01-01T00:05:00Z" }
                        ],
                        "includes": { "users": [{ "id": "u2", "username": "replier" }] }
                    })
                    .to_string(),
                ),
            ),
            (
                "https://api.twitter.com/2/tweets/1",
                HttpResponse::ok_json(
                    json!({
                        "data": { "id": "1", "text": "root tweet", "author_id": "u1",
                                  "conversation_id": "1", "created_at": "2024-01-01T00:00:00Z" },
                        "includes": { "users": [{ "id": "u1", "username": "author", "name": "Author", "verified": true }] }
                    })
                    .to_string(),
                ),
            ),
        ]);
        let credentials = SocialCredentials {
            twitter_bearer_token: Some(String::from("token")),
            ..SocialCredentials::default()
        };
        let pipeline = pipeline(http.clone(), SocialRules::default(), credentials);
        let source = normalized("https://x.com/author/status/1", 100);
        let strategy = pipeline
            .strategies()
            .get(Platform::Twitter, StrategyKind::Api)
            .expect("registered");

        let acquisition = strategy.fetch(&source, &context()).await.expect("fetches");

        let texts: Vec<_> = acquisition.items.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["root tweet", "early reply", "late reply @carol"]);
        assert_eq!(acquisition.items[1].author.as_deref(), Some("replier"));
        assert_eq!(acquisition.metadata["author"], "author");
        assert_eq!(acquisition.metadata["verified"], true);
        let requests = http.requests.lock().expect("lock");
        assert!(requests[1].contains("query=conversation_id%3A1"));
    }

    #[tokio::test]
    async fn missing_credentials_make_api_unavailable() {
        let pipeline = pipeline(
            RoutedClient::new(Vec::new()),
            SocialRules::default(),
            SocialCredentials::default(),
        );
        let source = normalized("https://www.reddit.com/r/rust/comments/abc/title/", 10);
        let strategy = pipeline
            .strategies()
            .get(Platform::Reddit, StrategyKind::Api)
            .expect("registered");

        let error = strategy.fetch(&source, &context()).await.expect_err("unavailable");

        assert_eq!(error.code(), "collect.strategy_unavailable");
    }

    #[tokio::test]
    async fn reddit_falls_back_to_public_json() {
        let http = RoutedClient::new(vec![(
            "https://www.reddit.com/r/rust/comments/abc/title.json",
            HttpResponse::ok_json(reddit_thread().to_string()),
        )]);
        let collector = SourceCollector::new(pipeline(
            http,
            SocialRules::default(),
            SocialCredentials::default(),
        ));
        let output = tempfile::tempdir().expect("tempdir");
        let source = SourceDescriptor::new("https://www.reddit.com/r/rust/comments/abc/title/").with_id("thread-1");

        let report = collector.collect(&source, output.path()).await.expect("collects");

        assert_eq!(report.result.metadata.method, StrategyKind::Scrape);
        assert_eq!(report.result.stats.total_items, 2);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.artifact_path.ends_with("social/thread-1/content.json"));
        assert!(report.artifact_path.exists());
    }

    #[tokio::test]
    async fn disabled_scrape_is_unavailable() {
        let pipeline = pipeline(
            RoutedClient::new(Vec::new()),
            SocialRules::default(),
            SocialCredentials::default(),
        );
        let source = normalized("https://www.linkedin.com/posts/someone_activity-1", 10);
        let strategy = pipeline
            .strategies()
            .get(Platform::Linkedin, StrategyKind::Scrape)
            .expect("registered");

        let error = strategy.fetch(&source, &context()).await.expect_err("disabled");

        assert!(error.to_string().contains("scraping is disabled for linkedin"));
    }
}
