//! Find a usable RSS/Atom feed for a URL: either the URL is a feed itself, or
//! its HTML page advertises one through `<link rel="alternate">`.

use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::ingestion::parse_feed_bytes;

pub const DISCOVERY_TIMEOUT_SECS: u64 = 7;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFeed {
    pub feed_url: String,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("URL must start with http:// or https://")]
    InvalidScheme,
    #[error("Request timeout")]
    Timeout,
    #[error("Failed to fetch URL: {0}")]
    Fetch(String),
    #[error("Failed to fetch URL: URL does not return HTML content")]
    NotHtml,
    #[error("No RSS/Atom feed discovered")]
    NoneDiscovered,
    #[error("No valid RSS/Atom feed found")]
    NoneValid,
}

pub async fn discover_feed(client: &Client, input: &str) -> Result<DiscoveredFeed, DiscoveryError> {
    let url = input.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(DiscoveryError::InvalidScheme);
    }

    if let Some(found) = try_feed(client, url).await {
        info!(%url, "discovery: URL is a feed");
        return Ok(found);
    }

    let html = fetch_html(client, url).await?;
    let candidates = feed_links(url, &html);
    if candidates.is_empty() {
        return Err(DiscoveryError::NoneDiscovered);
    }

    for candidate in &candidates {
        if let Some(found) = try_feed(client, candidate).await {
            info!(%url, feed = %candidate, "discovery: feed found through link tag");
            return Ok(found);
        }
        debug!(feed = %candidate, "discovery: advertised feed did not parse");
    }
    Err(DiscoveryError::NoneValid)
}

/// Fetch and parse `url` as a feed in a single attempt.
async fn try_feed(client: &Client, url: &str) -> Option<DiscoveredFeed> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let bytes = response.bytes().await.ok()?;
    let feed = parse_feed_bytes(&bytes).ok()?;
    Some(DiscoveredFeed {
        feed_url: url.to_string(),
        title: feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty()),
    })
}

async fn fetch_html(client: &Client, url: &str) -> Result<String, DiscoveryError> {
    let response = client
        .get(url)
        .header(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
        .send()
        .await
        .map_err(map_reqwest)?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.map_err(map_reqwest)?;

    let head = body.trim_start().chars().take(16).collect::<String>().to_lowercase();
    if content_type.contains("text/html") || head.starts_with("<!doctype") || head.starts_with("<html") {
        Ok(body)
    } else {
        Err(DiscoveryError::NotHtml)
    }
}

fn map_reqwest(e: reqwest::Error) -> DiscoveryError {
    if e.is_timeout() {
        DiscoveryError::Timeout
    } else {
        DiscoveryError::Fetch(e.to_string())
    }
}

/// Absolute URLs of every feed advertised by the page, in document order.
pub fn feed_links(page_url: &str, html: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(page_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse(r#"link[rel="alternate"]"#) else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);

    doc.select(&selector)
        .filter_map(|el| {
            let kind = el.value().attr("type").unwrap_or_default();
            let href = el.value().attr("href")?;
            if !(kind.contains("rss") || kind.contains("atom") || kind.contains("rdf")) {
                return None;
            }
            base.join(href).ok().map(|u| u.to_string())
        })
        .collect()
}
