use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SETTINGS_KEY;
use crate::content::MASKED;
use crate::ingestion::RssFeedConfig;
use crate::naver::NaverCredentials;
use crate::storage::KvStore;

pub const MAX_KEYWORDS: usize = 20;
pub const DEFAULT_NOTIFY_THRESHOLD: i64 = 70;

pub const SEED_KEYWORDS: &[&str] = &[
    "신제품 출시",
    "서비스 출시",
    "브랜드 런칭",
    "투자 유치",
    "시리즈 A",
    "시리즈 B",
    "마케팅 캠페인",
    "광고 캠페인",
    "CF 공개",
    "엠버서더 발탁",
    "플랫폼 출시",
    "앱 출시",
    "글로벌 진출",
    "한국 진출",
    "파트너십 체결",
    "MOU 체결",
    "리브랜딩",
    "신규 진출",
    "사업 확장",
    "대규모 캠페인",
];

/// (category, url, original url, title)
const SEED_FEEDS: &[(&str, &str, &str, &str)] = &[
    (
        "신상품/신기술",
        "https://www.newswire.co.kr/rss/industry/200",
        "https://www.newswire.co.kr/rss/industry/200",
        "뉴스와이어 - 신상품/신기술",
    ),
    (
        "소비재/쇼핑",
        "https://www.newswire.co.kr/rss/industry/500",
        "https://www.newswire.co.kr/rss/industry/500",
        "뉴스와이어 - 소비재/쇼핑",
    ),
    (
        "생활/식음료",
        "https://www.newswire.co.kr/rss/industry/504",
        "https://www.newswire.co.kr/rss/industry/504",
        "뉴스와이어 - 생활/식음료",
    ),
    (
        "헬스케어",
        "https://www.newswire.co.kr/rss/industry/900",
        "https://www.newswire.co.kr/rss/industry/900",
        "뉴스와이어 - 헬스케어",
    ),
    (
        "IT/플랫폼",
        "https://www.newswire.co.kr/rss/industry/300",
        "https://www.newswire.co.kr/rss/industry/300",
        "뉴스와이어 - IT/인터넷",
    ),
    ("스타트업", "https://platum.kr/feed", "https://platum.kr", "플래텀 - 스타트업 뉴스"),
    ("벤처/투자", "https://venturesquare.net/feed", "https://venturesquare.net", "벤처스퀘어"),
    ("IT/테크", "https://www.bloter.net/feed", "https://www.bloter.net", "블로터"),
];

/// (url, category, title)
const MAINTENANCE_FEEDS: &[(&str, &str, &str)] = &[
    ("https://api.newswire.co.kr/rss/industry/621", "모바일/게임", "게임"),
    ("https://api.newswire.co.kr/rss/industry/614", "모바일/게임", "모바일 앱"),
    ("https://api.newswire.co.kr/rss/industry/916", "식음료", "식품·음료"),
    ("https://api.newswire.co.kr/rss/industry/904", "화장품/뷰티", "화장품"),
    ("https://api.newswire.co.kr/rss/industry/903", "패션", "의류·잡화"),
    ("https://api.newswire.co.kr/rss/industry/1004", "건강/헬스케어", "건강기능식품"),
    ("https://api.newswire.co.kr/rss/industry/1001", "건강/헬스케어", "제약"),
    ("https://api.newswire.co.kr/rss/industry/112", "마케팅/광고 집행 시그널", "광고·마케팅"),
];

pub fn seed_keywords() -> Vec<String> {
    SEED_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn feed(category: &str, url: &str, original_url: &str, title: &str) -> RssFeedConfig {
    RssFeedConfig {
        category: category.to_string(),
        url: url.to_string(),
        title: Some(title.to_string()),
        original_url: Some(original_url.to_string()),
        enabled: Some(true),
    }
}

pub fn seed_feeds() -> Vec<RssFeedConfig> {
    SEED_FEEDS.iter().map(|(c, u, o, t)| feed(c, u, o, t)).collect()
}

pub fn maintenance_feeds() -> Vec<RssFeedConfig> {
    MAINTENANCE_FEEDS.iter().map(|(u, c, t)| feed(c, u, u, t)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryExclusion {
    pub name: String,
    /// Unix millis
    pub expires_at: i64,
}

/// Lead-generation settings stored at `config:sales:settings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalesSettings {
    #[serde(default)]
    pub naver_client_id: String,
    #[serde(default)]
    pub naver_client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naver_enabled: Option<bool>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rss_feeds: Option<Vec<RssFeedConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_notifications_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_lead_score_for_notify: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_companies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_companies_temporary: Vec<TemporaryExclusion>,
    #[serde(default, rename = "updated_at", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl SalesSettings {
    pub async fn load(kv: &KvStore) -> Result<Option<Self>> {
        kv.get_json(SETTINGS_KEY).await
    }

    pub async fn load_or_default(kv: &KvStore) -> Result<Self> {
        Ok(Self::load(kv).await?.unwrap_or_default())
    }

    pub async fn save(&self, kv: &KvStore) -> Result<()> {
        kv.set_json(SETTINGS_KEY, self).await
    }

    pub fn credentials(&self) -> NaverCredentials {
        NaverCredentials {
            client_id: self.naver_client_id.clone(),
            client_secret: self.naver_client_secret.clone(),
        }
    }

    /// Naver participates unless switched off, and only with both credentials.
    pub fn naver_usable(&self) -> bool {
        self.naver_enabled != Some(false) && self.credentials().is_set()
    }

    pub fn feeds(&self) -> &[RssFeedConfig] {
        self.rss_feeds.as_deref().unwrap_or(&[])
    }

    pub fn enabled_feeds(&self) -> Vec<RssFeedConfig> {
        self.feeds().iter().filter(|f| f.is_enabled()).cloned().collect()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.lead_notifications_enabled != Some(false)
    }

    pub fn notify_threshold(&self) -> i64 {
        self.min_lead_score_for_notify.unwrap_or(DEFAULT_NOTIFY_THRESHOLD)
    }

    /// Lower-cased names of permanently and still-active temporarily excluded companies.
    pub fn excluded_company_keys(&self, now_ms: i64) -> Vec<String> {
        let permanent = self.excluded_companies.iter().map(String::as_str);
        let temporary = self
            .excluded_companies_temporary
            .iter()
            .filter(|t| t.expires_at > now_ms)
            .map(|t| t.name.as_str());
        permanent
            .chain(temporary)
            .map(super::company_key)
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// JSON view with the Naver secret masked. The mask is shown even when no secret is stored.
    pub fn masked(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("naverClientSecret".into(), Value::String(MASKED.to_string()));
        }
        value
    }

    /// Apply a settings update. Only the keys present in `body` change; a masked
    /// or empty secret keeps the stored one.
    pub fn apply_update(&mut self, body: &Map<String, Value>) -> Result<()> {
        if let Some(id) = body.get("naverClientId") {
            self.naver_client_id = id.as_str().unwrap_or_default().trim().to_string();
        }
        if let Some(secret) = body.get("naverClientSecret").and_then(Value::as_str) {
            let secret = secret.trim();
            if !secret.is_empty() && secret != MASKED {
                self.naver_client_secret = secret.to_string();
            }
        }
        if let Some(keywords) = body.get("keywords") {
            self.keywords = clean_keywords(keywords);
        }
        if let Some(v) = body.get("naverEnabled") {
            self.naver_enabled = v.as_bool();
        }
        if let Some(v) = body.get("rssFeeds") {
            self.rss_feeds = serde_json::from_value(v.clone())?;
        }
        if let Some(v) = body.get("leadNotificationsEnabled") {
            self.lead_notifications_enabled = v.as_bool();
        }
        if let Some(v) = body.get("minLeadScoreForNotify") {
            self.min_lead_score_for_notify = v.as_i64();
        }
        if let Some(v) = body.get("minScore") {
            self.min_score = v.as_i64();
        }
        if let Some(v) = body.get("excludedCompanies") {
            self.excluded_companies = serde_json::from_value(v.clone())?;
        }
        if let Some(v) = body.get("excludedCompaniesTemporary") {
            self.excluded_companies_temporary = serde_json::from_value(v.clone())?;
        }
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }

    /// Replace keywords and feeds with the seed set, keeping credentials.
    pub fn apply_seed(&mut self) {
        self.keywords = seed_keywords();
        self.rss_feeds = Some(seed_feeds());
        self.touch();
    }

    /// Append the maintenance feeds not yet configured. Returns the titles added.
    pub fn add_missing_feeds(&mut self) -> Vec<String> {
        let feeds = self.rss_feeds.get_or_insert_with(Vec::new);
        let mut added = Vec::new();
        for candidate in maintenance_feeds() {
            if feeds.iter().any(|f| f.url == candidate.url) {
                continue;
            }
            added.push(candidate.title.clone().unwrap_or_default());
            feeds.push(candidate);
        }
        if !added.is_empty() {
            self.touch();
        }
        added
    }
}

/// Keep trimmed, non-empty strings; at most [`MAX_KEYWORDS`].
pub fn clean_keywords(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .take(MAX_KEYWORDS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn masked_secret_keeps_stored_value() {
        let mut s = SalesSettings {
            naver_client_id: "id".into(),
            naver_client_secret: "real-secret".into(),
            rss_feeds: Some(seed_feeds()),
            ..Default::default()
        };
        s.apply_update(&body(json!({"naverClientId": "  new-id ", "naverClientSecret": MASKED, "keywords": ["a"]})))
            .unwrap();
        assert_eq!(s.naver_client_id, "new-id");
        assert_eq!(s.naver_client_secret, "real-secret");
        assert_eq!(s.feeds().len(), 8);
        assert!(s.updated_at.is_some());

        s.apply_update(&body(json!({"naverClientSecret": ""}))).unwrap();
        assert_eq!(s.naver_client_secret, "real-secret");
        s.apply_update(&body(json!({"naverClientSecret": "rotated"}))).unwrap();
        assert_eq!(s.naver_client_secret, "rotated");

        let view = s.masked();
        assert_eq!(view["naverClientSecret"], MASKED);
        assert_eq!(view["naverClientId"], "new-id");
    }

    #[test]
    fn keywords_are_cleaned_and_capped() {
        let many: Vec<String> = (0..30).map(|i| format!("kw{}", i)).collect();
        assert_eq!(clean_keywords(&json!(many)).len(), MAX_KEYWORDS);
        assert_eq!(clean_keywords(&json!([" a ", "", 3, "b"])), vec!["a", "b"]);
        assert!(clean_keywords(&json!("a")).is_empty());
    }

    #[test]
    fn exclusions_respect_expiry() {
        let s = SalesSettings {
            excluded_companies: vec![" ACME ".into(), " ".into()],
            excluded_companies_temporary: vec![
                TemporaryExclusion { name: "Old".into(), expires_at: 100 },
                TemporaryExclusion { name: "Fresh".into(), expires_at: 300 },
            ],
            ..Default::default()
        };
        assert_eq!(s.excluded_company_keys(200), vec!["acme", "fresh"]);
    }

    #[test]
    fn add_missing_feeds_is_idempotent() {
        let mut s = SalesSettings::default();
        assert_eq!(s.add_missing_feeds().len(), 8);
        assert!(s.add_missing_feeds().is_empty());
        assert_eq!(s.feeds().len(), 8);
        assert_eq!(s.feeds()[0].original_url.as_deref(), Some(s.feeds()[0].url.as_str()));
    }

    #[test]
    fn seed_keeps_credentials() {
        let mut s = SalesSettings {
            naver_client_id: "id".into(),
            naver_client_secret: "secret".into(),
            ..Default::default()
        };
        s.apply_seed();
        assert_eq!(s.keywords.len(), 20);
        assert_eq!(s.feeds().len(), 8);
        assert_eq!(s.naver_client_secret, "secret");
        assert!(s.naver_usable());
        s.naver_enabled = Some(false);
        assert!(!s.naver_usable());
    }
}
