//! Full and incremental lead scans: fetch articles, analyse them, score, store and alert.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use super::config::SalesSettings;
use super::crm::LeadRepo;
use super::{
    company_key, final_score, lead_id, recency_bonus, scan_cache_key, source_bonus, Contact, LeadCore, LeadStatus,
    CRON_QUEUE_KEY, CRON_STATE_KEY,
};
use crate::content::ContentStore;
use crate::ingestion::{
    fetch_custom_feeds, fetch_feed_articles, parse_pub_date, NormalizedArticle, RssFeedConfig, DEFAULT_ITEMS_PER_FEED,
};
use crate::llm::analyzer::{AiAnalysis, LeadAnalyzer};
use crate::naver::{NaverClient, SearchOptions};
use crate::notify::{LeadAlert, Notifier};
use crate::scraping::fetch_full_content;
use crate::storage::KvStore;

pub const DEFAULT_SCAN_LIMIT: i64 = 30;
pub const MAX_SCAN_LIMIT: i64 = 100;
pub const DEFAULT_SCAN_MIN_SCORE: i64 = 60;
pub const DEFAULT_CRON_MIN_SCORE: i64 = 50;
pub const SCAN_CACHE_TTL_SECS: u64 = 300;
pub const NAVER_SOURCE_NAME: &str = "네이버 뉴스";

const MAX_ANALYZE: usize = 15;
const AI_CONCURRENCY: usize = 3;
const ARTICLES_PER_RUN: usize = 5;
const CRON_ITEMS_PER_FEED: usize = 10;
const CRON_BUDGET: Duration = Duration::from_secs(45);

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("AI provider not configured")]
    NoProvider,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanStats {
    pub total_articles: usize,
    pub analyzed: usize,
    pub passed_filter: usize,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub cached: bool,
    pub leads: Vec<LeadCore>,
    /// Absent for cache hits.
    pub stats: Option<ScanStats>,
}

/// Rotation position persisted between cron steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronState {
    pub feed_index: usize,
    pub last_run: String,
    pub total_feeds: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronStep {
    pub source: String,
    pub source_index: usize,
    pub next_source_index: usize,
    pub next_source_name: String,
    pub total_sources: usize,
    pub articles_found: usize,
    pub new_leads: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CronOutcome {
    NoSources,
    Step(CronStep),
}

type Analyzed = (NormalizedArticle, AiAnalysis);

/// Keep the first article for each non-empty link.
pub fn dedupe_by_link(articles: Vec<NormalizedArticle>) -> Vec<NormalizedArticle> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|a| {
            let link = a.link.trim();
            !link.is_empty() && seen.insert(link.to_string())
        })
        .collect()
}

fn pub_date_ms(s: &str) -> i64 {
    parse_pub_date(s).map(|d| d.timestamp_millis()).unwrap_or(0)
}

/// One article per company: the newest, ties going to the higher AI score.
/// Articles without a company name are all kept, after the others.
fn newest_per_company(items: Vec<Analyzed>) -> Vec<Analyzed> {
    let mut by_company: Vec<Analyzed> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut without_company = Vec::new();

    for item in items {
        let key = company_key(&item.1.company_name);
        if key.is_empty() {
            without_company.push(item);
            continue;
        }
        match positions.get(&key) {
            None => {
                positions.insert(key, by_company.len());
                by_company.push(item);
            }
            Some(&i) => {
                let current = pub_date_ms(&item.0.pub_date);
                let existing = pub_date_ms(&by_company[i].0.pub_date);
                if current > existing || (current == existing && item.1.ai_score > by_company[i].1.ai_score) {
                    by_company[i] = item;
                }
            }
        }
    }

    by_company.extend(without_company);
    by_company
}

fn drop_excluded_companies(items: Vec<Analyzed>, excluded: &HashSet<String>) -> Vec<Analyzed> {
    if excluded.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|(_, analysis)| {
            let key = company_key(&analysis.company_name);
            key.is_empty() || !excluded.contains(&key)
        })
        .collect()
}

pub fn build_lead(article: &NormalizedArticle, analysis: AiAnalysis, source: &str, now: DateTime<Utc>) -> LeadCore {
    let score = final_score(
        analysis.ai_score,
        recency_bonus(&article.pub_date, now),
        source_bonus(&article.source),
    );
    let link = article.link.trim().to_string();
    let now_ms = now.timestamp_millis();
    LeadCore {
        lead_id: lead_id(&link),
        title: article.title.clone(),
        link,
        content_snippet: article.content_snippet.clone(),
        pub_date: article.pub_date.clone(),
        source: source.to_string(),
        keyword: article.keyword.clone(),
        contact: Contact::from_analysis(&analysis),
        ai_analysis: analysis,
        final_score: score,
        created_at: now_ms,
        updated_at: now_ms,
    }
}

fn alert_for(lead: &LeadCore) -> LeadAlert {
    LeadAlert {
        title: lead.title.clone(),
        company: lead.ai_analysis.company_name.clone(),
        score: lead.final_score,
        angle: lead.ai_analysis.sales_angle.clone(),
        link: lead.link.clone(),
        email: lead.contact.email.clone(),
        phone: lead.contact.phone.clone(),
    }
}

/// Display name of the source at a rotation index. Index 0 is Naver when it takes part.
pub fn source_name(has_naver: bool, feeds: &[RssFeedConfig], index: usize) -> String {
    if has_naver && index == 0 {
        return NAVER_SOURCE_NAME.to_string();
    }
    let rss_index = if has_naver { index - 1 } else { index };
    feeds
        .get(rss_index)
        .map(|f| f.category.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("RSS {}", rss_index + 1))
}

#[derive(Clone)]
pub struct LeadScanner {
    content: ContentStore,
    repo: LeadRepo,
    client: reqwest::Client,
    naver: NaverClient,
    analyzer: Option<LeadAnalyzer>,
    notifier: Notifier,
}

impl LeadScanner {
    pub fn new(
        content: ContentStore,
        client: reqwest::Client,
        naver: NaverClient,
        analyzer: Option<LeadAnalyzer>,
        notifier: Notifier,
    ) -> Self {
        let repo = LeadRepo::new(content.kv().clone());
        Self { content, repo, client, naver, analyzer, notifier }
    }

    fn kv(&self) -> &KvStore {
        self.content.kv()
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.is_some()
    }

    pub async fn queue_length(&self) -> anyhow::Result<i64> {
        self.kv().llen(CRON_QUEUE_KEY).await
    }

    /// Drop articles whose lead was excluded, and with `skip_existing` every known lead.
    async fn filter_known(
        &self,
        articles: Vec<NormalizedArticle>,
        skip_existing: bool,
    ) -> anyhow::Result<Vec<NormalizedArticle>> {
        let states = try_join_all(articles.iter().map(|a| self.repo.state_of_link(&a.link))).await?;
        Ok(articles
            .into_iter()
            .zip(states)
            .filter(|(article, state)| match state {
                Some(s) if s.status == LeadStatus::Excluded => {
                    tracing::debug!(link = %article.link, "scan: skipping excluded lead");
                    false
                }
                Some(_) => !skip_existing,
                None => true,
            })
            .map(|(article, _)| article)
            .collect())
    }

    async fn analyze(&self, analyzer: &LeadAnalyzer, article: &NormalizedArticle) -> AiAnalysis {
        let mut content = article.content_snippet.clone();
        if article.link.contains("newswire.co.kr") {
            let full = fetch_full_content(&self.client, &article.link).await;
            if !full.is_empty() {
                content = full;
            }
        }
        analyzer.analyze_article(&article.title, &content, &article.source).await
    }

    /// Analyse with bounded concurrency. Articles whose turn comes after the
    /// deadline are skipped.
    async fn analyze_all(
        &self,
        analyzer: &LeadAnalyzer,
        articles: Vec<NormalizedArticle>,
        deadline: Option<Instant>,
    ) -> Vec<Analyzed> {
        let results: Vec<Option<Analyzed>> = stream::iter(articles)
            .map(|article| async move {
                if deadline.map_or(false, |d| Instant::now() > d) {
                    warn!(link = %article.link, "scan: time budget spent, skipping analysis");
                    return None;
                }
                let analysis = self.analyze(analyzer, &article).await;
                Some((article, analysis))
            })
            .buffered(AI_CONCURRENCY)
            .collect()
            .await;
        results.into_iter().flatten().collect()
    }

    async fn excluded_companies(&self, settings: &SalesSettings) -> anyhow::Result<HashSet<String>> {
        let now = Utc::now().timestamp_millis();
        let mut keys: HashSet<String> = settings.excluded_company_keys(now).into_iter().collect();
        keys.extend(self.repo.blocked_company_keys(now).await?);
        Ok(keys)
    }

    async fn notify_new(&self, settings: &SalesSettings, leads: &[LeadCore], new_ids: &[String]) {
        if new_ids.is_empty() || !settings.notifications_enabled() {
            return;
        }
        let threshold = settings.notify_threshold();
        let to_notify: Vec<&LeadCore> = leads
            .iter()
            .filter(|l| l.final_score >= threshold && new_ids.contains(&l.lead_id))
            .collect();
        if to_notify.is_empty() {
            return;
        }

        let system = self.content.get_system_config().await.unwrap_or_else(|e| {
            warn!("scan: could not read system config for notifications: {:#}", e);
            Default::default()
        });
        let targets = self.notifier.targets(&system);
        for lead in to_notify {
            self.notifier.send_lead_alert(&alert_for(lead), &targets).await;
        }
    }

    /// Full scan over every enabled feed and Naver. Results are cached for five minutes
    /// per `(limit, min_score)`.
    pub async fn scan(&self, limit: i64, min_score: i64) -> Result<ScanReport, ScanError> {
        let cache_key = scan_cache_key(limit, min_score);
        if let Some(cached) = self.kv().get_json::<Vec<LeadCore>>(&cache_key).await? {
            return Ok(ScanReport { cached: true, leads: cached, stats: None });
        }
        let analyzer = self.analyzer.as_ref().ok_or(ScanError::NoProvider)?;
        let settings = SalesSettings::load_or_default(self.kv()).await?;

        let mut articles = fetch_custom_feeds(&self.client, &settings.enabled_feeds(), DEFAULT_ITEMS_PER_FEED).await;
        if settings.naver_usable() {
            articles.extend(
                self.naver
                    .search(&settings.credentials(), &settings.keywords, SearchOptions::default())
                    .await,
            );
        }
        let total_articles = articles.len();
        let deduped = dedupe_by_link(articles);
        let deduped_count = deduped.len();
        let candidates: Vec<NormalizedArticle> = deduped.into_iter().take(MAX_ANALYZE).collect();
        let analyzed = candidates.len();
        info!(total_articles, deduped = deduped_count, analyzed, "scan: articles collected");

        let to_analyze = self.filter_known(candidates, false).await?;
        let results = self.analyze_all(analyzer, to_analyze, None).await;
        let excluded = self.excluded_companies(&settings).await?;
        let results = newest_per_company(drop_excluded_companies(results, &excluded));

        let now = Utc::now();
        let mut leads: Vec<LeadCore> = results
            .into_iter()
            .map(|(article, analysis)| {
                let source = article.category.clone().unwrap_or_else(|| article.source.clone());
                build_lead(&article, analysis, &source, now)
            })
            .filter(|lead| lead.final_score >= min_score)
            .collect();
        leads.sort_by(|a, b| b.final_score.cmp(&a.final_score));
        let passed_filter = leads.len();
        leads.truncate(limit.max(0) as usize);

        let new_ids = self.repo.upsert_leads(&leads).await?;
        self.notify_new(&settings, &leads, &new_ids).await;
        self.kv().set_json_ex(&cache_key, &leads, SCAN_CACHE_TTL_SECS).await?;

        info!(passed_filter, stored = leads.len(), new = new_ids.len(), "scan: finished");
        Ok(ScanReport {
            cached: false,
            leads,
            stats: Some(ScanStats { total_articles, analyzed, passed_filter }),
        })
    }

    /// Process one source of the rotation: Naver (when configured) then each enabled feed.
    pub async fn cron_step(&self, min_score: Option<i64>) -> Result<CronOutcome, ScanError> {
        let settings = SalesSettings::load_or_default(self.kv()).await?;
        let feeds = settings.enabled_feeds();
        let has_naver = settings.naver_usable() && !settings.keywords.is_empty();
        let total_sources = usize::from(has_naver) + feeds.len();
        if total_sources == 0 {
            return Ok(CronOutcome::NoSources);
        }
        let analyzer = self.analyzer.as_ref().ok_or(ScanError::NoProvider)?;

        let index = self
            .kv()
            .get_json::<CronState>(CRON_STATE_KEY)
            .await?
            .map(|s| s.feed_index)
            .filter(|i| *i < total_sources)
            .unwrap_or(0);
        let source = source_name(has_naver, &feeds, index);
        info!(step = index + 1, total_sources, %source, "cron: processing source");

        let articles = if has_naver && index == 0 {
            self.naver
                .search(&settings.credentials(), &settings.keywords, SearchOptions::default())
                .await
        } else {
            let rss_index = if has_naver { index - 1 } else { index };
            match feeds.get(rss_index) {
                Some(feed) => fetch_feed_articles(&self.client, feed, CRON_ITEMS_PER_FEED).await,
                None => Vec::new(),
            }
        };
        let articles_found = articles.len();

        let candidates: Vec<NormalizedArticle> = dedupe_by_link(articles).into_iter().take(ARTICLES_PER_RUN).collect();
        let to_analyze = self.filter_known(candidates, true).await?;
        info!(articles_found, to_analyze = to_analyze.len(), "cron: new articles");

        let deadline = Instant::now() + CRON_BUDGET;
        let results = self.analyze_all(analyzer, to_analyze, Some(deadline)).await;
        let excluded = self.excluded_companies(&settings).await?;
        let results = drop_excluded_companies(results, &excluded);

        let min_score = min_score.or(settings.min_score).unwrap_or(DEFAULT_CRON_MIN_SCORE);
        let now = Utc::now();
        let leads: Vec<LeadCore> = results
            .into_iter()
            .map(|(article, analysis)| build_lead(&article, analysis, &source, now))
            .filter(|lead| lead.final_score >= min_score)
            .collect();

        let new_ids = self.repo.upsert_leads(&leads).await?;
        self.notify_new(&settings, &leads, &new_ids).await;

        let next_index = (index + 1) % total_sources;
        let next_state = CronState {
            feed_index: next_index,
            last_run: now.to_rfc3339(),
            total_feeds: total_sources,
        };
        self.kv().set_json(CRON_STATE_KEY, &next_state).await?;

        Ok(CronOutcome::Step(CronStep {
            source,
            source_index: index,
            next_source_index: next_index,
            next_source_name: source_name(has_naver, &feeds, next_index),
            total_sources,
            articles_found,
            new_leads: leads.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::SOURCE_RSS;

    fn article(link: &str, pub_date: &str) -> NormalizedArticle {
        NormalizedArticle {
            title: "t".into(),
            link: link.into(),
            content_snippet: "c".into(),
            pub_date: pub_date.into(),
            source: SOURCE_RSS.into(),
            keyword: None,
            category: Some("신상품/신기술".into()),
        }
    }

    fn analysis(company: &str, score: f64) -> AiAnalysis {
        let mut a = AiAnalysis::failed("t", "");
        a.company_name = company.into();
        a.ai_score = score;
        a
    }

    #[test]
    fn links_are_deduplicated_and_blank_links_dropped() {
        let out = dedupe_by_link(vec![
            article("https://a/1", ""),
            article(" https://a/1 ", ""),
            article("", ""),
            article("https://a/2", ""),
        ]);
        let links: Vec<&str> = out.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links, vec!["https://a/1", "https://a/2"]);
    }

    #[test]
    fn newest_article_wins_per_company() {
        let items = vec![
            (article("https://a/1", "2024-01-01T00:00:00Z"), analysis("Acme", 90.0)),
            (article("https://a/2", "2024-01-03T00:00:00Z"), analysis(" acme ", 40.0)),
            (article("https://a/3", ""), analysis("", 10.0)),
            (article("https://b/1", "2024-01-02T00:00:00Z"), analysis("Beta", 50.0)),
            (article("https://b/2", "2024-01-02T00:00:00Z"), analysis("Beta", 70.0)),
        ];
        let out = newest_per_company(items);
        let links: Vec<&str> = out.iter().map(|(a, _)| a.link.as_str()).collect();
        assert_eq!(links, vec!["https://a/2", "https://b/2", "https://a/3"]);
    }

    #[test]
    fn excluded_companies_are_dropped_case_insensitively() {
        let excluded: HashSet<String> = ["acme".to_string()].into_iter().collect();
        let out = drop_excluded_companies(
            vec![
                (article("https://a/1", ""), analysis("ACME ", 90.0)),
                (article("https://b/1", ""), analysis("Beta", 90.0)),
                (article("https://c/1", ""), analysis("", 90.0)),
            ],
            &excluded,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn lead_is_built_with_scoring_and_contacts() {
        let now = Utc::now();
        let mut a = analysis("Acme", 80.0);
        a.contact_email = Some("pr@acme.kr".into());
        a.contact_phone = Some("".into());
        let mut art = article("https://A/1 ", &now.to_rfc2822());
        art.source = crate::ingestion::SOURCE_NAVER.into();
        let lead = build_lead(&art, a, "네이버 뉴스", now);
        assert_eq!(lead.final_score, 63);
        assert_eq!(lead.link, "https://A/1");
        assert_eq!(lead.lead_id, lead_id("https://a/1"));
        assert_eq!(lead.contact.email.as_deref(), Some("pr@acme.kr"));
        assert_eq!(lead.contact.phone, None);
        assert_eq!(lead.contact.source.as_deref(), Some("NEWS"));
    }

    #[test]
    fn rotation_names() {
        let feeds = vec![RssFeedConfig::new("스타트업", "https://x"), RssFeedConfig::new(" ", "https://y")];
        assert_eq!(source_name(true, &feeds, 0), NAVER_SOURCE_NAME);
        assert_eq!(source_name(true, &feeds, 1), "스타트업");
        assert_eq!(source_name(true, &feeds, 2), "RSS 2");
        assert_eq!(source_name(false, &feeds, 0), "스타트업");
    }
}
