//! Landing page content: home layout, typed sections, system settings and
//! pricing policies, all kept in the key-value store with an optional JSON
//! mirror on disk.

pub mod schemas;

use anyhow::Context;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::stats;
use crate::storage::{KvBatch, KvStore};
use schemas::SchemaError;

pub const HOME_KEY: &str = "landing:home";
pub const ETAG_KEY: &str = "landing:etag";
pub const SYSTEM_CONFIG_KEY: &str = "config:system";

/// Placeholder returned instead of stored secrets.
pub const MASKED: &str = "********";

/// System settings that are never returned in clear.
pub const SECRET_SETTINGS: &[&str] = &["telegramBotToken", "telegramChatId", "slackWebhookUrl"];

pub const POLICY_TYPES: &[&str] = &["channels", "bonuses", "surcharges", "segments"];

pub fn section_key(id: &str) -> String {
    format!("landing:section:{}", id)
}

/// Section ids name mirror files, so they are restricted to a plain slug.
pub fn is_section_id(id: &str) -> bool {
    static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex compile"));
    ID_RE.is_match(id)
}

fn check_section_id(id: &str) -> Result<(), ContentError> {
    if is_section_id(id) {
        Ok(())
    } else {
        Err(ContentError::InvalidId(id.to_string()))
    }
}

pub fn policy_key(kind: &str) -> String {
    format!("policy:{}", kind)
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Unknown Section Type: {0}")]
    UnknownType(String),
    #[error("Invalid Section ID: {0}")]
    InvalidId(String),
    #[error("Validation Failed: {0}")]
    Validation(String),
    #[error("Invalid Home Data: sections array required")]
    InvalidHome,
    #[error("Invalid policy type. Allowed: channels, bonuses, surcharges, segments")]
    InvalidPolicy,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<SchemaError> for ContentError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::UnknownType(t) => ContentError::UnknownType(t),
            SchemaError::Invalid(issues) => ContentError::Validation(issues.join("; ")),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SeedReport {
    pub home: bool,
    pub sections: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LandingSection {
    pub id: String,
    #[serde(rename = "type")]
    pub section_type: String,
    pub data: Value,
}

/// Everything the public landing page needs in one read.
#[derive(Debug, Serialize)]
pub struct LandingPage {
    pub etag: Option<String>,
    pub sections: Vec<LandingSection>,
}

#[derive(Clone)]
pub struct ContentStore {
    kv: KvStore,
    mirror_dir: Option<PathBuf>,
}

impl ContentStore {
    pub fn new(kv: KvStore, mirror_dir: Option<PathBuf>) -> Self {
        Self { kv, mirror_dir }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    fn home_path(&self) -> Option<PathBuf> {
        self.mirror_dir.as_ref().map(|d| d.join("home.json"))
    }

    fn section_path(&self, id: &str) -> Option<PathBuf> {
        if !is_section_id(id) {
            return None;
        }
        self.mirror_dir.as_ref().map(|d| d.join("sections").join(format!("{}.json", id)))
    }

    pub async fn get_home(&self) -> anyhow::Result<Option<Value>> {
        if let Some(home) = self.kv.get_json::<Value>(HOME_KEY).await? {
            return Ok(Some(home));
        }
        Ok(match self.home_path() {
            Some(p) => read_mirror(&p).await,
            None => None,
        })
    }

    pub async fn get_section(&self, id: &str) -> anyhow::Result<Option<Value>> {
        if let Some(section) = self.kv.get_json::<Value>(&section_key(id)).await? {
            return Ok(Some(section));
        }
        Ok(match self.section_path(id) {
            Some(p) => read_mirror(&p).await,
            None => None,
        })
    }

    pub async fn etag(&self) -> anyhow::Result<Option<String>> {
        self.kv.get(ETAG_KEY).await
    }

    /// Store the home layout. Returns the stored document.
    pub async fn save_home(&self, body: &Value) -> Result<Value, ContentError> {
        let sections = body.get("sections").and_then(Value::as_array).ok_or(ContentError::InvalidHome)?;
        let payload = json!({
            "version": 1,
            "updatedAt": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "sections": sections,
        });

        let batch = KvBatch::new()
            .set_json(HOME_KEY, &payload)?
            .set(ETAG_KEY, new_etag())
            .incr(stats::admin_save_day_key(&stats::kst_date()));
        self.kv.exec(batch).await?;
        info!(sections = sections.len(), "content: home saved");

        if let Some(p) = self.home_path() {
            write_mirror(&p, &payload).await;
        }
        Ok(payload)
    }

    /// Validate and store a section. Returns the normalised data.
    pub async fn save_section(&self, id: &str, section_type: &str, data: &Value) -> Result<Value, ContentError> {
        check_section_id(id)?;
        let safe = schemas::validate_section(section_type, data)?;

        let batch = KvBatch::new()
            .set_json(section_key(id), &safe)?
            .set(ETAG_KEY, new_etag())
            .incr(stats::admin_save_day_key(&stats::kst_date()));
        self.kv.exec(batch).await?;
        info!(%id, %section_type, "content: section saved");

        if let Some(p) = self.section_path(id) {
            write_mirror(&p, &safe).await;
        }
        Ok(safe)
    }

    pub async fn delete_section(&self, id: &str) -> Result<(), ContentError> {
        check_section_id(id)?;
        self.kv
            .exec(KvBatch::new().del(section_key(id)).set(ETAG_KEY, new_etag()))
            .await?;
        info!(%id, "content: section deleted");

        if let Some(p) = self.section_path(id) {
            if let Err(e) = tokio::fs::remove_file(&p).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %p.display(), "content: failed to delete mirror file: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Drop a section reference from the home layout and re-save it when it changed.
    pub async fn unlink_from_home(&self, id: &str) -> Result<(), ContentError> {
        let Some(home) = self.get_home().await? else {
            return Ok(());
        };
        let Some(sections) = home.get("sections").and_then(Value::as_array) else {
            return Ok(());
        };
        let kept: Vec<Value> = sections
            .iter()
            .filter(|s| s.get("id").and_then(Value::as_str) != Some(id))
            .cloned()
            .collect();
        let mut updated = home.clone();
        updated["sections"] = Value::Array(kept);
        self.save_home(&updated).await?;
        Ok(())
    }

    /// Enabled sections of the home layout with their data resolved.
    pub async fn landing(&self) -> anyhow::Result<LandingPage> {
        let etag = self.etag().await?;
        let mut sections = Vec::new();
        let refs = match self.get_home().await? {
            Some(home) => home.get("sections").and_then(Value::as_array).cloned().unwrap_or_default(),
            None => Vec::new(),
        };

        for r in refs {
            if r.get("enabled").and_then(Value::as_bool) != Some(true) {
                continue;
            }
            let Some(id) = r.get("id").and_then(Value::as_str) else {
                continue;
            };
            let section_type = r.get("type").and_then(Value::as_str).unwrap_or(id).to_string();
            match self.get_section(id).await? {
                Some(data) => sections.push(LandingSection { id: id.to_string(), section_type, data }),
                None => debug!(%id, "content: enabled section has no data, skipped"),
            }
        }
        Ok(LandingPage { etag, sections })
    }

    /// Load the mirror directory into the store through the validating save paths.
    pub async fn seed(&self) -> anyhow::Result<SeedReport> {
        let mut report = SeedReport::default();
        let Some(dir) = self.mirror_dir.clone() else {
            report.errors.push("Content mirror directory not configured".to_string());
            return Ok(report);
        };

        let home_path = dir.join("home.json");
        if tokio::fs::try_exists(&home_path).await.unwrap_or(false) {
            match read_json_file(&home_path).await {
                Ok(home) => match self.save_home(&home).await {
                    Ok(_) => report.home = true,
                    Err(e) => report.errors.push(format!("Home Seed Error: {}", e)),
                },
                Err(e) => report.errors.push(format!("Home Seed Error: {:#}", e)),
            }
        }

        let sections_dir = dir.join("sections");
        let mut entries = match tokio::fs::read_dir(&sections_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(format!("Sections Dir Error: {}", e));
                return Ok(report);
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("failed to list sections directory")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let file = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
            let id = file.trim_end_matches(".json").to_string();
            let result = match read_json_file(&path).await {
                Ok(data) => self.save_section(&id, &id, &data).await.map_err(|e| e.to_string()),
                Err(e) => Err(format!("{:#}", e)),
            };
            match result {
                Ok(_) => report.sections += 1,
                Err(e) => report.errors.push(format!("Section {} Seed Error: {}", file, e)),
            }
        }

        info!(home = report.home, sections = report.sections, errors = report.errors.len(), "content: seed finished");
        Ok(report)
    }

    pub async fn get_system_config(&self) -> anyhow::Result<Map<String, Value>> {
        Ok(self
            .kv
            .get_json::<Map<String, Value>>(SYSTEM_CONFIG_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Merge `incoming` over the stored settings. Masked secrets keep their stored value.
    pub async fn save_system_config(&self, incoming: &Map<String, Value>) -> anyhow::Result<Map<String, Value>> {
        let current = self.get_system_config().await?;
        let merged = merge_settings(&current, incoming);
        self.kv.set_json(SYSTEM_CONFIG_KEY, &merged).await?;
        info!(keys = merged.len(), "content: system config saved");
        Ok(merged)
    }

    pub async fn get_policy(&self, kind: &str) -> Result<Value, ContentError> {
        if !POLICY_TYPES.contains(&kind) {
            return Err(ContentError::InvalidPolicy);
        }
        Ok(self
            .kv
            .get_json::<Value>(&policy_key(kind))
            .await?
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    pub async fn save_policy(&self, kind: &str, data: &Value) -> Result<(), ContentError> {
        if !POLICY_TYPES.contains(&kind) {
            return Err(ContentError::InvalidPolicy);
        }
        self.kv.set_json(&policy_key(kind), data).await?;
        info!(%kind, "content: policy saved");
        Ok(())
    }
}

/// Copy of the settings with every present secret replaced by [`MASKED`].
pub fn mask_settings(config: &Map<String, Value>) -> Map<String, Value> {
    let mut out = config.clone();
    for key in SECRET_SETTINGS {
        if out.get(*key).map(is_truthy).unwrap_or(false) {
            out.insert((*key).to_string(), Value::String(MASKED.to_string()));
        }
    }
    out
}

fn merge_settings(current: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = current.clone();
    for (k, v) in incoming {
        if SECRET_SETTINGS.contains(&k.as_str()) && v.as_str() == Some(MASKED) {
            continue;
        }
        merged.insert(k.clone(), v.clone());
    }
    merged
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn new_etag() -> String {
    format!("v{}", Utc::now().timestamp_millis())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn read_mirror(path: &Path) -> Option<Value> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return None;
    }
    match read_json_file(path).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("content: mirror read failed: {:#}", e);
            None
        }
    }
}

/// Best effort: read-only deployments simply skip the mirror.
async fn write_mirror(path: &Path, value: &Value) {
    let result = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pretty = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
        tokio::fs::write(path, pretty).await
    }
    .await;

    if let Err(e) = result {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            debug!(path = %path.display(), "content: mirror not writable");
        } else {
            warn!(path = %path.display(), "content: mirror write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(mirror: Option<PathBuf>) -> ContentStore {
        let kv = KvStore::in_memory().await.expect("kv");
        ContentStore::new(kv, mirror)
    }

    #[tokio::test]
    async fn save_section_bumps_etag_and_mirrors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = store(Some(dir.path().to_path_buf())).await;

        assert!(content.etag().await.unwrap().is_none());
        content
            .save_section("hero", "hero", &json!({ "title": "Hello", "ctas": [{ "label": "Go" }] }))
            .await
            .expect("save");

        let etag = content.etag().await.unwrap().expect("etag");
        assert!(etag.starts_with('v'));
        let stored = content.get_section("hero").await.unwrap().expect("section");
        assert_eq!(stored["ctas"][0]["actionType"], "link");
        assert!(dir.path().join("sections/hero.json").exists());

        let saves = content
            .kv()
            .get_count(&stats::admin_save_day_key(&stats::kst_date()))
            .await
            .unwrap();
        assert_eq!(saves, 1);
    }

    #[tokio::test]
    async fn invalid_sections_are_rejected() {
        let content = store(None).await;
        assert!(matches!(
            content.save_section("x", "banner", &json!({})).await,
            Err(ContentError::UnknownType(_))
        ));
        assert!(matches!(
            content.save_section("hero", "hero", &json!({ "title": "" })).await,
            Err(ContentError::Validation(_))
        ));
        assert!(matches!(content.save_home(&json!({ "sections": "no" })).await, Err(ContentError::InvalidHome)));
        assert!(content.get_section("hero").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn section_ids_must_be_plain_slugs() {
        let root = tempfile::tempdir().expect("tempdir");
        let mirror = root.path().join("content");
        let content = store(Some(mirror.clone())).await;

        for id in ["../../escaped", "a/b", "..", "hero.json", ""] {
            assert!(
                matches!(
                    content.save_section(id, "faq", &json!({})).await,
                    Err(ContentError::InvalidId(_))
                ),
                "{id:?} accepted"
            );
            assert!(matches!(content.delete_section(id).await, Err(ContentError::InvalidId(_))));
        }
        assert!(!root.path().join("escaped.json").exists());
        assert!(!mirror.exists());
        assert!(content.etag().await.unwrap().is_none());

        std::fs::write(root.path().join("outside.json"), r#"{"title":"leak"}"#).unwrap();
        assert!(content.get_section("../../outside").await.unwrap().is_none());

        content.save_section("faq_2-b", "faq", &json!({})).await.expect("slug id");
        assert!(mirror.join("sections/faq_2-b.json").exists());
    }

    #[tokio::test]
    async fn delete_unlinks_from_home_and_landing_resolves() {
        let content = store(None).await;
        content
            .save_home(&json!({ "sections": [
                { "id": "hero", "enabled": true },
                { "id": "faq", "enabled": true },
                { "id": "why", "enabled": false }
            ]}))
            .await
            .unwrap();
        content.save_section("hero", "hero", &json!({ "title": "A" })).await.unwrap();
        content.save_section("faq", "faq", &json!({})).await.unwrap();
        content.save_section("why", "why", &json!({ "title": "W" })).await.unwrap();

        let page = content.landing().await.unwrap();
        let ids: Vec<_> = page.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["hero", "faq"]);

        content.delete_section("faq").await.unwrap();
        content.unlink_from_home("faq").await.unwrap();
        let home = content.get_home().await.unwrap().unwrap();
        assert_eq!(home["sections"].as_array().unwrap().len(), 2);
        assert_eq!(home["version"], 1);
    }

    #[tokio::test]
    async fn system_config_keeps_masked_secrets() {
        let content = store(None).await;
        let first: Map<String, Value> =
            serde_json::from_value(json!({ "telegramBotToken": "secret", "slackWebhookUrl": "", "alerts": true })).unwrap();
        content.save_system_config(&first).await.unwrap();

        let masked = mask_settings(&content.get_system_config().await.unwrap());
        assert_eq!(masked["telegramBotToken"], MASKED);
        assert_eq!(masked["slackWebhookUrl"], "");

        let update: Map<String, Value> =
            serde_json::from_value(json!({ "telegramBotToken": MASKED, "alerts": false })).unwrap();
        let merged = content.save_system_config(&update).await.unwrap();
        assert_eq!(merged["telegramBotToken"], "secret");
        assert_eq!(merged["alerts"], false);
    }

    #[tokio::test]
    async fn policies_default_to_empty_list() {
        let content = store(None).await;
        assert_eq!(content.get_policy("channels").await.unwrap(), json!([]));
        content.save_policy("bonuses", &json!([{ "rate": 0.1 }])).await.unwrap();
        assert_eq!(content.get_policy("bonuses").await.unwrap()[0]["rate"], 0.1);
        assert!(matches!(content.get_policy("prices").await, Err(ContentError::InvalidPolicy)));
    }

    #[tokio::test]
    async fn seed_loads_mirror_and_collects_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("sections")).unwrap();
        std::fs::write(dir.path().join("home.json"), r#"{"sections":[{"id":"hero","enabled":true}]}"#).unwrap();
        std::fs::write(dir.path().join("sections/hero.json"), r#"{"title":"Hi"}"#).unwrap();
        std::fs::write(dir.path().join("sections/mystery.json"), r#"{"title":"?"}"#).unwrap();

        let content = store(Some(dir.path().to_path_buf())).await;
        let report = content.seed().await.unwrap();
        assert!(report.home);
        assert_eq!(report.sections, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("mystery.json"));
    }
}
