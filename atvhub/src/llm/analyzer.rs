//! Turns a news article into a structured sales-lead assessment.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

use super::{extract_json_from_text, LlmProvider, LlmRequest};

pub const SYSTEM_PROMPT: &str = r#"You are a sales intelligence analyst for KOBACO (Korea Broadcasting Advertising Corporation).

KOBACO provides:
- Advertising strategy consulting
- Media planning and buying
- Campaign effectiveness measurement
- Broadcasting advertising solutions

Your task is to analyze news articles and events to identify potential sales leads.

For each article, evaluate:
1. **Company/Organization name** mentioned
2. **Event summary** - what's happening
3. **Target audience** - who they're trying to reach
4. **ATV fit** - why KOBACO's advertising/media services would be valuable
5. **Sales angle** - specific approach for outreach
6. **AI Score (0-100)** - lead quality score based on:
   - Budget likelihood (are they spending money?)
   - Decision timeline (is action imminent?)
   - Service fit (do they need advertising/media?)
   - Contact opportunity (can we reach decision makers?)
7. **Contact Information** - Extract public contact info:
   - Representative Email (e.g., press@..., contact@...)
   - Representative Phone (e.g., 02-123-4567, 010-1234-5678)
   - PR Agency name (if mentioned as handling the press release)
   - Company Homepage URL

CRITICAL REQUIREMENTS:
- Output ONLY valid JSON
- NO markdown formatting
- NO code blocks
- NO extra text
- All field values MUST be in Korean (except email/phone/urls)
- Follow this EXACT schema:

{
  "company_name": "기업명",
  "event_summary": "이벤트 요약",
  "target_audience": "타겟 고객층",
  "atv_fit_reason": "KOBACO 서비스 적합 이유",
  "sales_angle": "영업 접근 방식",
  "ai_score": 75,
  "contact_email": "null 또는 이메일",
  "contact_phone": "null 또는 연락처",
  "pr_agency": "null 또는 대행사명",
  "homepage_url": "null 또는 URL"
}

If the article is not relevant to advertising/media/marketing, set ai_score to 0 but still provide analysis."#;

const RETRY_REMINDER: &str =
    "REMINDER: Respond with ONLY valid JSON matching the schema. No markdown, no code blocks, no extra text.";

const NULLABLE_FIELDS: &[&str] = &["contact_email", "contact_phone", "pr_agency", "homepage_url"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiAnalysis {
    pub company_name: String,
    pub event_summary: String,
    pub target_audience: String,
    pub atv_fit_reason: String,
    pub sales_angle: String,
    pub ai_score: f64,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub pr_agency: Option<String>,
    #[serde(default)]
    pub homepage_url: Option<String>,
}

impl AiAnalysis {
    /// Placeholder used when the model could not produce a usable answer.
    pub fn failed(title: &str, content: &str) -> Self {
        Self {
            company_name: "분석 실패".to_string(),
            event_summary: title.to_string(),
            target_audience: "알 수 없음".to_string(),
            atv_fit_reason: "AI 분석 실패".to_string(),
            sales_angle: "수동 검토 필요".to_string(),
            ai_score: 0.0,
            contact_email: detect_email(content),
            contact_phone: detect_phone(content),
            pr_agency: None,
            homepage_url: detect_url(content),
        }
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

pub fn detect_email(text: &str) -> Option<String> {
    static EMAIL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9._-]+").expect("static regex compile"));
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Korean landline or mobile number such as 02-123-4567 or 010-1234-5678.
pub fn detect_phone(text: &str) -> Option<String> {
    static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"0\d{1,2}-\d{3,4}-\d{4}").expect("static regex compile"));
    PHONE_RE.find(text).map(|m| m.as_str().to_string())
}

/// First URL that is not a newswire page.
pub fn detect_url(text: &str) -> Option<String> {
    static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("static regex compile"));
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|u| !u.contains("newswire.co.kr"))
        .map(str::to_string)
}

/// Parse a raw model answer into a validated analysis.
pub fn parse_analysis(raw: &str) -> Result<AiAnalysis> {
    let json_text = extract_json_from_text(raw).unwrap_or_else(|| raw.trim().to_string());
    let mut value: Value = serde_json::from_str(&json_text).context("JSON parse failed")?;

    if let Some(obj) = value.as_object_mut() {
        for field in NULLABLE_FIELDS {
            if obj.get(*field).and_then(Value::as_str) == Some("null") {
                obj.insert((*field).to_string(), Value::Null);
            }
        }
    }

    let analysis: AiAnalysis = serde_json::from_value(value).context("Schema validation failed")?;
    if !(0.0..=100.0).contains(&analysis.ai_score) {
        anyhow::bail!("Schema validation failed: ai_score {} out of range", analysis.ai_score);
    }
    Ok(analysis)
}

/// Lead analysis on top of any [`LlmProvider`].
#[derive(Clone)]
pub struct LeadAnalyzer {
    provider: Arc<dyn LlmProvider>,
}

impl LeadAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn ask(&self, title: &str, content: &str, source: &str) -> Result<AiAnalysis> {
        let prompt = format!(
            "Analyze this article for sales lead potential and contact info:\n\nTitle: {}\nContent: {}\nSource: {}\n\nProvide analysis in the exact JSON format specified.",
            title, content, source
        );
        let response = self
            .provider
            .generate(LlmRequest {
                system: Some(SYSTEM_PROMPT.to_string()),
                prompt,
                temperature: Some(0.3),
                json_mode: true,
                ..Default::default()
            })
            .await?;
        parse_analysis(&response.content)
    }

    /// Analyze one article. Never fails: after one retry a score-0 placeholder is returned.
    pub async fn analyze_article(&self, title: &str, content: &str, source: &str) -> AiAnalysis {
        match self.ask(title, content, source).await {
            Ok(mut analysis) => {
                if is_blank(&analysis.contact_email) {
                    analysis.contact_email = detect_email(content).or_else(|| detect_email(title));
                }
                if is_blank(&analysis.contact_phone) {
                    analysis.contact_phone = detect_phone(content).or_else(|| detect_phone(title));
                }
                if is_blank(&analysis.homepage_url) {
                    analysis.homepage_url = detect_url(content).or_else(|| detect_url(title));
                }
                analysis
            }
            Err(e) => {
                warn!(provider = self.provider.name(), "analyzer: first attempt failed, retrying: {:#}", e);
                let reminded = format!("{}\n\n{}", content, RETRY_REMINDER);
                match self.ask(title, &reminded, source).await {
                    Ok(mut analysis) => {
                        if is_blank(&analysis.contact_email) {
                            analysis.contact_email = detect_email(content);
                        }
                        analysis
                    }
                    Err(e) => {
                        error!(provider = self.provider.name(), "analyzer: failed after retry: {:#}", e);
                        AiAnalysis::failed(title, content)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_strings_become_none() {
        let raw = r#"```json
{"company_name":"가","event_summary":"나","target_audience":"다","atv_fit_reason":"라","sales_angle":"마",
 "ai_score":82,"contact_email":"null","contact_phone":"02-555-1234","pr_agency":"null"}
```"#;
        let a = parse_analysis(raw).expect("valid");
        assert_eq!(a.ai_score, 82.0);
        assert!(a.contact_email.is_none());
        assert!(a.pr_agency.is_none());
        assert!(a.homepage_url.is_none());
        assert_eq!(a.contact_phone.as_deref(), Some("02-555-1234"));
    }

    #[test]
    fn out_of_range_scores_and_missing_fields_fail() {
        let base = r#"{"company_name":"a","event_summary":"b","target_audience":"c","atv_fit_reason":"d","sales_angle":"e","ai_score":SCORE}"#;
        assert!(parse_analysis(&base.replace("SCORE", "101")).is_err());
        assert!(parse_analysis(&base.replace("SCORE", "-1")).is_err());
        assert!(parse_analysis(&base.replace("SCORE", "0")).is_ok());
        assert!(parse_analysis(r#"{"company_name":"a","ai_score":50}"#).is_err());
        assert!(parse_analysis("not json").is_err());
    }

    #[test]
    fn contact_detection() {
        let text = "문의: pr@brand.co.kr / 02-1234-5678 https://www.newswire.co.kr/a https://brand.co.kr/event";
        assert_eq!(detect_email(text).as_deref(), Some("pr@brand.co.kr"));
        assert_eq!(detect_phone(text).as_deref(), Some("02-1234-5678"));
        assert_eq!(detect_url(text).as_deref(), Some("https://brand.co.kr/event"));
        assert_eq!(detect_url("only https://newswire.co.kr/x"), None);
    }

    #[test]
    fn failed_analysis_keeps_detected_contacts() {
        let a = AiAnalysis::failed("제목", "연락처 010-9876-5432");
        assert_eq!(a.company_name, "분석 실패");
        assert_eq!(a.event_summary, "제목");
        assert_eq!(a.ai_score, 0.0);
        assert_eq!(a.contact_phone.as_deref(), Some("010-9876-5432"));
    }
}
