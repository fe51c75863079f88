//! Analytics counters: search terms, CTA clicks, admin saves and image uploads.
//! All day/month buckets are computed in Korea Standard Time.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::storage::{KvBatch, KvStore};

const KST_OFFSET_SECONDS: i32 = 9 * 3600;
const MAX_TERM_CHARS: usize = 50;
const MAX_QUERY_CHARS: usize = 120;
const RECENT_SEARCH_CAP: i64 = 200;

pub const SEARCH_RECENT_KEY: &str = "stats:search:recent";

pub const ALLOWED_CTAS: &[&str] = &[
    "estimate_open",
    "download_pdf",
    "contact_open",
    "header_estimate",
    "hero_estimate",
    "footer_estimate",
];

pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
}

pub fn to_kst(t: DateTime<Utc>) -> DateTime<FixedOffset> {
    t.with_timezone(&kst())
}

/// `YYYY-MM-DD` in KST for the given instant.
pub fn kst_date_at(t: DateTime<Utc>) -> String {
    to_kst(t).format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` in KST for the given instant.
pub fn kst_month_at(t: DateTime<Utc>) -> String {
    to_kst(t).format("%Y-%m").to_string()
}

pub fn kst_date() -> String {
    kst_date_at(Utc::now())
}

pub fn search_count_day_key(date: &str) -> String {
    format!("stats:search:count:day:{}", date)
}

pub fn search_terms_day_key(date: &str) -> String {
    format!("stats:search:terms:day:{}", date)
}

pub fn search_terms_month_key(month: &str) -> String {
    format!("stats:search:terms:month:{}", month)
}

pub fn cta_day_key(id: &str, date: &str) -> String {
    format!("stats:cta:{}:count:day:{}", id, date)
}

pub fn cta_month_key(id: &str, month: &str) -> String {
    format!("stats:cta:{}:count:month:{}", id, month)
}

pub fn cta_global_day_key(date: &str) -> String {
    format!("stats:cta:global:count:day:{}", date)
}

pub fn admin_save_day_key(date: &str) -> String {
    format!("stats:admin:save:day:{}", date)
}

pub fn admin_upload_day_key(date: &str) -> String {
    format!("stats:admin:image_upload:day:{}", date)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermScore {
    pub term: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub date: String,
    pub month: String,
    pub today_search_count: i64,
    pub today_saves: i64,
    pub today_uploads: i64,
    pub today_cta_count: i64,
    pub today_top_terms: Vec<TermScore>,
    pub month_top_terms: Vec<TermScore>,
    pub recent_terms: Vec<String>,
}

/// Record one search. Blank terms are ignored.
pub async fn track_search(kv: &KvStore, term: &str) -> Result<()> {
    let clean: String = term.trim().chars().take(MAX_TERM_CHARS).collect();
    if clean.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let (date, month) = (kst_date_at(now), kst_month_at(now));

    let batch = KvBatch::new()
        .incr(search_count_day_key(&date))
        .zincrby(search_terms_day_key(&date), clean.clone(), 1.0)
        .zincrby(search_terms_month_key(&month), clean.clone(), 1.0)
        .lpush(SEARCH_RECENT_KEY, clean)
        .ltrim(SEARCH_RECENT_KEY, 0, RECENT_SEARCH_CAP - 1);
    kv.exec(batch).await
}

pub async fn track_cta_click(kv: &KvStore, cta_id: &str) -> Result<()> {
    if cta_id.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let (date, month) = (kst_date_at(now), kst_month_at(now));

    let batch = KvBatch::new()
        .incr(cta_day_key(cta_id, &date))
        .incr(cta_month_key(cta_id, &month))
        .incr(cta_global_day_key(&date));
    kv.exec(batch).await
}

pub async fn track_image_upload(kv: &KvStore) -> Result<()> {
    kv.incr(&admin_upload_day_key(&kst_date())).await
}

pub async fn dashboard(kv: &KvStore) -> Result<Dashboard> {
    let now = Utc::now();
    let (date, month) = (kst_date_at(now), kst_month_at(now));

    let search_key = search_count_day_key(&date);
    let saves_key = admin_save_day_key(&date);
    let uploads_key = admin_upload_day_key(&date);
    let cta_key = cta_global_day_key(&date);
    let day_terms_key = search_terms_day_key(&date);
    let month_terms_key = search_terms_month_key(&month);

    let (search_count, saves, uploads, cta_count, day_terms, month_terms, recent) = tokio::try_join!(
        kv.get_count(&search_key),
        kv.get_count(&saves_key),
        kv.get_count(&uploads_key),
        kv.get_count(&cta_key),
        kv.zrange_rev_with_scores(&day_terms_key, 0, 9),
        kv.zrange_rev_with_scores(&month_terms_key, 0, 9),
        kv.lrange(SEARCH_RECENT_KEY, 0, 19),
    )?;

    let to_terms = |rows: Vec<(String, f64)>| {
        rows.into_iter()
            .map(|(term, score)| TermScore { term, score })
            .collect::<Vec<_>>()
    };

    Ok(Dashboard {
        date,
        month,
        today_search_count: search_count,
        today_saves: saves,
        today_uploads: uploads,
        today_cta_count: cta_count,
        today_top_terms: to_terms(day_terms),
        month_top_terms: to_terms(month_terms),
        recent_terms: recent,
    })
}

/// Replace phone numbers and e-mail addresses before a query is stored.
pub fn mask_pii(text: &str) -> String {
    static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3}-\d{3,4}-\d{4}").expect("static regex compile"));
    static EMAIL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("static regex compile"));

    let masked = PHONE_RE.replace_all(text, "***-****-****");
    EMAIL_RE.replace_all(&masked, "*****@***.**").into_owned()
}

/// Outcome of preparing a raw search query for tracking.
#[derive(Debug, PartialEq)]
pub enum SearchQuery {
    TooShort,
    Track(String),
}

pub fn prepare_search_query(q: &str) -> SearchQuery {
    let trimmed: String = q.trim().chars().take(MAX_QUERY_CHARS).collect();
    if trimmed.chars().count() < 2 {
        return SearchQuery::TooShort;
    }
    SearchQuery::Track(mask_pii(&trimmed))
}

/// CTA ids are either allow-listed or plain slugs.
pub fn is_valid_cta_id(id: &str) -> bool {
    static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("static regex compile"));
    ALLOWED_CTAS.contains(&id) || SLUG_RE.is_match(id)
}
