use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Feed;
use feed_rs::parser;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SOURCE_RSS: &str = "RSS";
pub const SOURCE_NAVER: &str = "NAVER";

/// Per-request timeout for feed fetches.
pub const FEED_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_ITEMS_PER_FEED: usize = 6;

/// An article from any source, reduced to the fields the lead analyzer needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedArticle {
    pub title: String,
    pub link: String,
    pub content_snippet: String,
    pub pub_date: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A configured RSS source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RssFeedConfig {
    pub category: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl RssFeedConfig {
    pub fn new(category: &str, url: &str) -> Self {
        Self {
            category: category.to_string(),
            url: url.to_string(),
            title: None,
            original_url: None,
            enabled: None,
        }
    }

    /// Feeds are enabled unless explicitly switched off.
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }
}

/// Newswire industry feeds used when nothing is configured.
pub fn default_feeds() -> Vec<RssFeedConfig> {
    vec![
        RssFeedConfig::new("신상품/신기술", "https://www.newswire.co.kr/rss/industry/200"),
        RssFeedConfig::new("소비재/쇼핑", "https://www.newswire.co.kr/rss/industry/500"),
        RssFeedConfig::new("생활/식음료", "https://www.newswire.co.kr/rss/industry/504"),
        RssFeedConfig::new("헬스케어", "https://www.newswire.co.kr/rss/industry/900"),
    ]
}

/// Remove tags and decode the handful of entities feeds actually use.
pub fn strip_html(html: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex compile"));
    TAG_RE
        .replace_all(html, "")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Build the shared outbound client.
pub fn build_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .gzip(true)
        .brotli(true)
        .build()
        .context("failed to build reqwest client")
}

/// Accepts the RFC 2822 dates feeds and Naver emit, and RFC 3339.
pub fn parse_pub_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(s.trim()))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub fn parse_feed_bytes(bytes: &[u8]) -> Result<Feed> {
    parser::parse(bytes).context("failed to parse feed")
}

/// Fetches a feed from the given URL and parses it.
/// Server errors, rate limiting and network errors are retried with backoff.
pub async fn fetch_and_parse_feed(client: &Client, url: &str, timeout_secs: u64) -> Result<Feed> {
    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
            tracing::info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).timeout(Duration::from_secs(timeout_secs)).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    return parse_feed_bytes(bytes.as_ref());
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                    continue;
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                    continue;
                } else {
                    // 4xx other than 429 will not get better
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Turn parsed feed entries into articles. `limit == 0` keeps every entry.
pub fn normalize_entries(feed: &Feed, category: &str, limit: usize) -> Vec<NormalizedArticle> {
    let take = if limit == 0 { feed.entries.len() } else { limit };
    feed.entries
        .iter()
        .take(take)
        .map(|entry| {
            let title = entry.title.as_ref().map(|t| t.content.as_str()).unwrap_or_default();
            let link = entry.links.first().map(|l| l.href.trim().to_string()).unwrap_or_default();
            let snippet = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .unwrap_or_default();
            let pub_date = entry
                .published
                .or(entry.updated)
                .unwrap_or_else(Utc::now)
                .to_rfc3339();

            NormalizedArticle {
                title: strip_html(title),
                link,
                content_snippet: strip_html(&snippet),
                pub_date,
                source: SOURCE_RSS.to_string(),
                keyword: Some(category.to_string()),
                category: Some(category.to_string()),
            }
        })
        .collect()
}

/// Fetch one feed. Failures are logged and yield no articles.
pub async fn fetch_feed_articles(client: &Client, feed: &RssFeedConfig, limit: usize) -> Vec<NormalizedArticle> {
    match fetch_and_parse_feed(client, &feed.url, FEED_TIMEOUT_SECS).await {
        Ok(parsed) => normalize_entries(&parsed, &feed.category, limit),
        Err(e) => {
            tracing::warn!(url = %feed.url, category = %feed.category, "ingestion: feed fetch failed: {:#}", e);
            Vec::new()
        }
    }
}

/// Fetch every given feed concurrently, or the default feeds when the list is empty.
pub async fn fetch_custom_feeds(client: &Client, feeds: &[RssFeedConfig], limit_per_feed: usize) -> Vec<NormalizedArticle> {
    let defaults;
    let feeds = if feeds.is_empty() {
        defaults = default_feeds();
        &defaults[..]
    } else {
        feeds
    };

    let results = join_all(feeds.iter().map(|f| fetch_feed_articles(client, f, limit_per_feed))).await;
    let articles: Vec<NormalizedArticle> = results.into_iter().flatten().collect();
    tracing::info!(feeds = feeds.len(), articles = articles.len(), "ingestion: feeds fetched");
    articles
}
