use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::ingestion::{parse_pub_date, strip_html, NormalizedArticle, SOURCE_NAVER};

pub const DEFAULT_API_URL: &str = "https://openapi.naver.com/v1/search/news.json";
pub const MAX_KEYWORDS: usize = 5;
const DISPLAY_PER_PAGE: usize = 100;
const MAX_TOTAL_PER_KEYWORD: usize = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Default)]
pub struct NaverCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl NaverCredentials {
    pub fn is_set(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Only keep articles published within this many days.
    pub days_window: Option<u32>,
    pub max_items_per_keyword: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    items: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "pubDate")]
    pub_date: String,
}

/// Client for the Naver news search API.
#[derive(Clone)]
pub struct NaverClient {
    client: Client,
    api_url: String,
}

impl NaverClient {
    pub fn new(client: Client, api_url: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        }
    }

    async fn fetch_page(&self, creds: &NaverCredentials, keyword: &str, start: usize) -> Result<NewsResponse> {
        let display = DISPLAY_PER_PAGE.to_string();
        let start_s = start.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("query", keyword),
                ("display", display.as_str()),
                ("sort", "date"),
                ("start", start_s.as_str()),
            ])
            .header("X-Naver-Client-Id", &creds.client_id)
            .header("X-Naver-Client-Secret", &creds.client_secret)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .context("Naver request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Naver API error {}: {}", status, body);
        }
        response.json().await.context("failed to parse Naver response")
    }

    /// Newest-first articles for one keyword, paging until the window or cap is reached.
    pub async fn search_keyword(
        &self,
        creds: &NaverCredentials,
        keyword: &str,
        options: SearchOptions,
    ) -> Vec<NormalizedArticle> {
        let cutoff = options
            .days_window
            .filter(|d| *d > 0)
            .map(|d| Utc::now() - ChronoDuration::days(d as i64));
        let max_items = options.max_items_per_keyword.unwrap_or(MAX_TOTAL_PER_KEYWORD);
        let mut collected = Vec::new();
        let mut start = 1;

        while start <= MAX_TOTAL_PER_KEYWORD && collected.len() < max_items {
            let page = match self.fetch_page(creds, keyword, start).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(%keyword, "naver: {:#}", e);
                    break;
                }
            };
            if page.items.is_empty() {
                break;
            }
            let page_len = page.items.len();
            let mut oldest: Option<DateTime<Utc>> = None;

            for item in page.items {
                let published = parse_pub_date(&item.pub_date);
                if let Some(p) = published {
                    oldest = Some(oldest.map_or(p, |o| o.min(p)));
                }
                if let Some(cut) = cutoff {
                    if !published.map(|p| p >= cut).unwrap_or(false) {
                        continue;
                    }
                }
                let link = if item.originallink.trim().is_empty() {
                    item.link.trim().to_string()
                } else {
                    item.originallink.trim().to_string()
                };
                collected.push(NormalizedArticle {
                    title: strip_html(&item.title),
                    link,
                    content_snippet: strip_html(&item.description),
                    pub_date: item.pub_date,
                    source: SOURCE_NAVER.to_string(),
                    keyword: Some(keyword.to_string()),
                    category: None,
                });
            }

            if let (Some(cut), Some(old)) = (cutoff, oldest) {
                if old < cut {
                    break;
                }
            }
            if page_len < DISPLAY_PER_PAGE {
                break;
            }
            start += DISPLAY_PER_PAGE;
        }

        collected.truncate(max_items);
        collected
    }

    /// Search up to five keywords concurrently. Missing credentials or keywords yield nothing.
    pub async fn search(
        &self,
        creds: &NaverCredentials,
        keywords: &[String],
        options: SearchOptions,
    ) -> Vec<NormalizedArticle> {
        if !creds.is_set() {
            warn!("naver: API credentials not configured");
            return Vec::new();
        }
        let keywords: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).take(MAX_KEYWORDS).collect();
        if keywords.is_empty() {
            warn!("naver: no keywords configured");
            return Vec::new();
        }

        let results = join_all(keywords.iter().map(|k| self.search_keyword(creds, k, options))).await;
        let articles: Vec<NormalizedArticle> = results.into_iter().flatten().collect();
        info!(keywords = keywords.len(), articles = articles.len(), "naver: search finished");
        articles
    }
}
