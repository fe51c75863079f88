//! Slack and Telegram alerts for newly discovered high-score leads, and the
//! Slack notice for consultation requests.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use common::NotificationConfig;

use crate::content::MASKED;
use crate::stats;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const SLACK_TIMEOUT_SECS: u64 = 5;
const TELEGRAM_TIMEOUT_SECS: u64 = 10;

/// Eighteen escaped dashes, a MarkdownV2 separator line.
const TEL_SEP: &str = "\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-\\-";

#[derive(Debug, Clone, PartialEq)]
pub struct LeadAlert {
    pub title: String,
    pub company: String,
    pub score: i64,
    pub angle: String,
    pub link: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyTargets {
    pub slack_url: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Which channels accepted the alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub slack: bool,
    pub telegram: bool,
}

/// Escape every character MarkdownV2 treats as markup.
pub fn escape_markdown_v2(text: &str) -> String {
    static SPECIAL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[_*\[\]()~`>#+\-=|{}.!]").expect("static regex compile"));
    SPECIAL_RE.replace_all(text, "\\$0").into_owned()
}

fn or_dash(v: &Option<String>) -> &str {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")
}

pub fn slack_payload(alert: &LeadAlert) -> Value {
    json!({
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("🎯 새로운 고점수 광고주 후보 발견! ({}점)", alert.score),
                    "emoji": true
                }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*기업명:*\n{}", alert.company) },
                    { "type": "mrkdwn", "text": format!("*점수:*\n{}점", alert.score) }
                ]
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*기사제목:*\n<{}|{}>", alert.link, alert.title) }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*영업전략:*\n{}", alert.angle) }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*이메일:*\n{}", or_dash(&alert.email)) },
                    { "type": "mrkdwn", "text": format!("*연락처:*\n{}", or_dash(&alert.phone)) }
                ]
            }
        ]
    })
}

/// String fields as-is, other values as JSON, absent or empty ones as `fallback`.
fn field_text(entry: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match entry.get(key) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::String(s)) if s.is_empty() => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

pub fn consultation_payload(entry: &Map<String, Value>, now: DateTime<Utc>) -> Value {
    let created = stats::to_kst(now).format("%Y. %-m. %-d. %H:%M:%S");
    json!({
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": "📞 새로운 상담 문의가 도착했습니다!",
                    "emoji": true
                }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*담당자명:*\n{}", field_text(entry, "name", "-")) },
                    { "type": "mrkdwn", "text": format!("*회사명:*\n{}", field_text(entry, "company", "-")) },
                    { "type": "mrkdwn", "text": format!("*연락처:*\n{}", field_text(entry, "phone", "-")) },
                    { "type": "mrkdwn", "text": format!("*이메일:*\n{}", field_text(entry, "email", "-")) }
                ]
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*문의 내용:*\n{}", field_text(entry, "message", "내용 없음"))
                }
            },
            {
                "type": "context",
                "elements": [{ "type": "mrkdwn", "text": format!("Created at {}", created) }]
            }
        ]
    })
}

/// MarkdownV2 message body. The link target is left unescaped.
pub fn telegram_message(alert: &LeadAlert) -> String {
    [
        "🎯 *새로운 고점수 광고주 후보 발견\\!*".to_string(),
        TEL_SEP.to_string(),
        format!("🏢 *기업:* {}", escape_markdown_v2(&alert.company)),
        format!("⭐ *점수:* {}점", alert.score),
        TEL_SEP.to_string(),
        format!("📰 *기사:* [{}]({})", escape_markdown_v2(&alert.title), alert.link),
        format!("💡 *전략:* {}", escape_markdown_v2(&alert.angle)),
        TEL_SEP.to_string(),
        format!("📧 *이메일:* {}", escape_markdown_v2(or_dash(&alert.email))),
        format!("📞 *연락처:* {}", escape_markdown_v2(or_dash(&alert.phone))),
    ]
    .join("\n")
}

/// A usable credential: present, non-blank and not the settings mask.
fn usable(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty() && *s != MASKED)
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    telegram_api_url: String,
    env: NotificationConfig,
}

impl Notifier {
    pub fn new(client: reqwest::Client, cfg: &NotificationConfig) -> Self {
        Self {
            client,
            telegram_api_url: cfg
                .telegram_api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            env: cfg.clone(),
        }
    }

    /// Targets from the admin system settings, falling back to environment variables.
    pub fn targets(&self, system: &Map<String, Value>) -> NotifyTargets {
        let pick = |key: &str, env_name: Option<&String>, default_env: &str| {
            system
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .or_else(|| std::env::var(env_name.map(String::as_str).unwrap_or(default_env)).ok())
        };
        NotifyTargets {
            slack_url: pick("slackWebhookUrl", self.env.slack_webhook_env.as_ref(), "SLACK_WEBHOOK_URL"),
            telegram_token: pick("telegramBotToken", self.env.telegram_bot_token_env.as_ref(), "TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: pick("telegramChatId", self.env.telegram_chat_id_env.as_ref(), "TELEGRAM_CHAT_ID"),
        }
    }

    async fn send_slack(&self, payload: &Value, url: &str) -> Result<()> {
        self.client
            .post(url)
            .json(payload)
            .timeout(Duration::from_secs(SLACK_TIMEOUT_SECS))
            .send()
            .await
            .context("slack request failed")?
            .error_for_status()
            .context("slack rejected the message")?;
        Ok(())
    }

    async fn send_telegram(&self, text: &str, token: &str, chat_id: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.telegram_api_url, token);
        let response = self
            .client
            .post(url)
            .json(&json!({ "chat_id": chat_id, "text": text, "parse_mode": "MarkdownV2" }))
            .timeout(Duration::from_secs(TELEGRAM_TIMEOUT_SECS))
            .send()
            .await
            .context("telegram request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram error {}: {}", status, body);
        }
        Ok(())
    }

    /// Slack only. Failures are logged and reported as `false`.
    pub async fn send_consultation(&self, entry: &Map<String, Value>, targets: &NotifyTargets) -> bool {
        let Some(url) = usable(&targets.slack_url) else {
            warn!("notify: Slack webhook URL not configured");
            return false;
        };
        match self.send_slack(&consultation_payload(entry, Utc::now()), url).await {
            Ok(()) => {
                info!("notify: consultation sent to Slack");
                true
            }
            Err(e) => {
                warn!("notify: failed to send consultation to Slack: {:#}", e);
                false
            }
        }
    }

    /// Send to every configured channel concurrently. Failures are logged, never returned.
    pub async fn send_lead_alert(&self, alert: &LeadAlert, targets: &NotifyTargets) -> Delivery {
        let slack = async {
            let Some(url) = usable(&targets.slack_url) else {
                warn!("notify: Slack webhook URL not configured");
                return false;
            };
            match self.send_slack(&slack_payload(alert), url).await {
                Ok(()) => {
                    info!(company = %alert.company, "notify: Slack notification sent");
                    true
                }
                Err(e) => {
                    warn!("notify: failed to send Slack notification: {:#}", e);
                    false
                }
            }
        };
        let telegram = async {
            let (Some(token), Some(chat_id)) = (usable(&targets.telegram_token), usable(&targets.telegram_chat_id))
            else {
                warn!("notify: Telegram bot token or chat id not configured");
                return false;
            };
            match self.send_telegram(&telegram_message(alert), token, chat_id).await {
                Ok(()) => {
                    info!(company = %alert.company, %chat_id, "notify: Telegram notification sent");
                    true
                }
                Err(e) => {
                    warn!("notify: failed to send Telegram notification: {:#}", e);
                    false
                }
            }
        };
        let (slack, telegram) = tokio::join!(slack, telegram);
        Delivery { slack, telegram }
    }
}
