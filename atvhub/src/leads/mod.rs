//! Sales leads: data model, storage keys and scoring.

pub mod config;
pub mod crm;
pub mod scan;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::ingestion::{parse_pub_date, SOURCE_NAVER};
use crate::llm::analyzer::AiAnalysis;

pub const IDX_ALL_KEY: &str = "sales:idx:all";
pub const SETTINGS_KEY: &str = "config:sales:settings";
pub const BLOCKED_COMPANIES_KEY: &str = "scan:blocked:companies";
pub const CRON_STATE_KEY: &str = "scan:cron:state";
pub const CRON_QUEUE_KEY: &str = "scan:cron:queue";

pub fn lead_key(id: &str) -> String {
    format!("sales:lead:{}", id)
}

pub fn state_key(id: &str) -> String {
    format!("sales:leadstate:{}", id)
}

pub fn notes_key(id: &str) -> String {
    format!("sales:leadnotes:{}", id)
}

pub fn status_index_key(status: LeadStatus) -> String {
    format!("sales:idx:status:{}", status)
}

pub fn scan_cache_key(limit: i64, min_score: i64) -> String {
    format!("sales:leads:scan:limit={}:min={}", limit, min_score)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    InProgress,
    OnHold,
    Won,
    Lost,
    Excluded,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 7] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::InProgress,
        LeadStatus::OnHold,
        LeadStatus::Won,
        LeadStatus::Lost,
        LeadStatus::Excluded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::InProgress => "IN_PROGRESS",
            LeadStatus::OnHold => "ON_HOLD",
            LeadStatus::Won => "WON",
            LeadStatus::Lost => "LOST",
            LeadStatus::Excluded => "EXCLUDED",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("invalid status: {}", s))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_agency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// NEWS, HOMEPAGE or MANUAL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Contact {
    pub fn from_analysis(a: &AiAnalysis) -> Self {
        let keep = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Self {
            email: keep(&a.contact_email),
            phone: keep(&a.contact_phone),
            pr_agency: keep(&a.pr_agency),
            homepage: keep(&a.homepage_url),
            source: Some("NEWS".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadCore {
    pub lead_id: String,
    pub title: String,
    pub link: String,
    #[serde(rename = "contentSnippet", default)]
    pub content_snippet: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub ai_analysis: AiAnalysis,
    #[serde(default)]
    pub contact: Contact,
    pub final_score: i64,
    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadState {
    pub lead_id: String,
    pub status: LeadStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub status_changed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<i64>,
}

impl LeadState {
    pub fn initial(lead_id: &str, now_ms: i64) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            status: LeadStatus::New,
            tags: Vec::new(),
            next_action: None,
            assigned_to: None,
            status_changed_at: now_ms,
            last_contacted_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadNote {
    pub id: String,
    pub lead_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: i64,
}

/// Lead as shown in the pipeline: core data, CRM state and note count.
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    #[serde(flatten)]
    pub core: LeadCore,
    pub state: LeadState,
    pub notes_count: i64,
}

/// Deterministic id: hex SHA-1 of the trimmed, lower-cased link.
pub fn lead_id(link: &str) -> String {
    let normalized = link.trim().to_lowercase();
    hex::encode(Sha1::digest(normalized.as_bytes()))
}

/// 10 points under a day old, 5 under three days, else 0. Unparseable dates get nothing.
pub fn recency_bonus(pub_date: &str, now: DateTime<Utc>) -> f64 {
    let Some(published) = parse_pub_date(pub_date) else {
        return 0.0;
    };
    let age_days = (now - published).num_milliseconds() as f64 / 86_400_000.0;
    if age_days < 1.0 {
        10.0
    } else if age_days < 3.0 {
        5.0
    } else {
        0.0
    }
}

pub fn source_bonus(source: &str) -> f64 {
    if source == SOURCE_NAVER {
        5.0
    } else {
        0.0
    }
}

pub fn final_score(ai_score: f64, recency: f64, source: f64) -> i64 {
    let total = ai_score * 0.6 + recency + source;
    (total.round() as i64).clamp(0, 100)
}

pub fn company_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_ignore_case_and_whitespace() {
        let a = lead_id(" https://Example.com/News/1 ");
        assert_eq!(a, lead_id("https://example.com/news/1"));
        assert_eq!(a, "ae8c12c0f4b2c1c33f86c3c5a4f534e440ad9c5f");
        assert_ne!(a, lead_id("https://example.com/news/2"));
    }

    #[test]
    fn scoring() {
        assert_eq!(final_score(80.0, 10.0, 5.0), 63);
        assert_eq!(final_score(100.0, 10.0, 5.0), 75);
        assert_eq!(final_score(0.0, 0.0, 0.0), 0);
        assert_eq!(final_score(84.0, 0.0, 0.0), 50);
        assert_eq!(source_bonus("NAVER"), 5.0);
        assert_eq!(source_bonus("RSS"), 0.0);
    }

    #[test]
    fn recency_windows() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(recency_bonus("Wed, 10 Jan 2024 09:00:00 +0900", now), 10.0);
        assert_eq!(recency_bonus("2024-01-08T13:00:00Z", now), 5.0);
        assert_eq!(recency_bonus("2024-01-01T00:00:00Z", now), 0.0);
        assert_eq!(recency_bonus("not a date", now), 0.0);
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        for s in LeadStatus::ALL {
            assert_eq!(s.as_str().parse::<LeadStatus>().unwrap(), s);
        }
        assert!("DONE".parse::<LeadStatus>().is_err());
        assert_eq!(serde_json::to_string(&LeadStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(status_index_key(LeadStatus::OnHold), "sales:idx:status:ON_HOLD");
    }
}
