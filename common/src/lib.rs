/*!
common/src/lib.rs

Shared configuration types and DB helper functions for atvhub.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- A helper to initialize the SQLite pool backing the key-value store
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/atvhub.db")
    pub path: String,
}

/// HTTP listener settings, merged into Rocket's figment at launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Landing page content settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Directory mirroring saved content as pretty JSON (`home.json`, `sections/<id>.json`).
    /// Used as the read fallback and as the seed source.
    pub mirror_dir: Option<String>,
}

/// A single Basic-auth realm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub username: String,
    /// Argon2 PHC string, produced by the `hash_password` binary
    pub password_hash: String,
}

/// Credentials for the protected areas. A missing realm locks that area.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub admin: Option<CredentialConfig>,
    pub sales: Option<CredentialConfig>,
}

/// Blob storage config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobConfig {
    /// "local" or "hosted"
    pub backend: Option<String>,
    /// Directory for the local backend
    pub local_dir: Option<String>,
    /// Public URL prefix under which local blobs are served (e.g. "http://localhost:8000/blobs")
    pub public_base_url: Option<String>,
    /// Base URL of the hosted blob API
    pub api_url: Option<String>,
    /// Env var holding the hosted read/write token
    pub token_env: Option<String>,
    /// Host fragment every hosted blob URL contains
    pub url_host: Option<String>,
    pub max_upload_bytes: Option<u64>,
}

/// Remote model endpoint config (shared by every provider)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "gemini" or "deepseek"
    pub provider: Option<String>,
    pub gemini: Option<RemoteLlmConfig>,
    pub deepseek: Option<RemoteLlmConfig>,
}

/// Naver news search API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NaverConfig {
    pub api_url: Option<String>,
}

/// Env var names for notification fallbacks (system config values take precedence)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub slack_webhook_env: Option<String>,
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
    pub telegram_api_url: Option<String>,
}

/// Background scan schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between two incremental scan steps. Absent disables the worker loop.
    pub cron_interval_minutes: Option<u64>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub naver: NaverConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub politeness: Option<PolitenessConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        toml::from_str(data).context("Failed to parse TOML configuration")
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Outbound fetch timeout, 10s unless configured
    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.politeness
            .as_ref()
            .and_then(|p| p.fetch_timeout_seconds)
            .unwrap_or(10)
    }

    pub fn user_agent(&self) -> String {
        self.politeness
            .as_ref()
            .and_then(|p| p.user_agent.clone())
            .unwrap_or_else(|| "KOBACO-Lead-Sniper/1.0".to_string())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and opens the database in WAL mode.
/// Defaults are conservative: max_connections = 5.
///
/// Example:
///   let pool = init_db_pool("data/atvhub.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every connection to `sqlite::memory:` is a separate
/// database, so the pool must never open a second one.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory sqlite database")?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [auth.admin]
            username = "admin"
            password_hash = "$argon2id$v=19$m=4096,t=3,p=1$c2FsdA$aGFzaA"

            [llm]
            provider = "deepseek"

            [llm.deepseek]
            api_key_env = "DEEPSEEK_API_KEY"
            model = "deepseek-chat"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.database.path, "data/test.db");
        assert_eq!(cfg.auth.admin.as_ref().map(|a| a.username.as_str()), Some("admin"));
        assert!(cfg.auth.sales.is_none());
        let llm = cfg.llm.clone().expect("llm section");
        assert_eq!(llm.provider.as_deref(), Some("deepseek"));
        assert_eq!(llm.deepseek.and_then(|d| d.model).as_deref(), Some("deepseek-chat"));
        assert_eq!(cfg.fetch_timeout_seconds(), 10);
        assert!(cfg.scheduler.cron_interval_minutes.is_none());
    }

    #[tokio::test]
    async fn override_file_wins_key_by_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        std::fs::write(
            &default_path,
            "[database]\npath = \"data/default.db\"\n\n[politeness]\nfetch_timeout_seconds = 7\nuser_agent = \"default-agent\"\n",
        )
        .expect("write default");
        std::fs::write(&override_path, "[politeness]\nfetch_timeout_seconds = 20\n").expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        assert_eq!(cfg.database.path, "data/default.db");
        assert_eq!(cfg.fetch_timeout_seconds(), 20);
        assert_eq!(cfg.user_agent(), "default-agent");
    }

    #[tokio::test]
    async fn db_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("atvhub.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db_pool(&db_path_str).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
