//! Uploaded file storage behind the [`BlobStore`] trait.
//!
//! Two backends: a local directory served by the HTTP server under `/blobs`,
//! and a hosted REST store compatible with the Vercel Blob API.

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use common::BlobConfig;

pub const DEFAULT_HOSTED_URL_HOST: &str = "blob.vercel-storage.com";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub url: String,
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob storage not configured")]
    NotConfigured,
    #[error("Not a blob storage URL")]
    NotOwned,
    #[error("Invalid blob pathname: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, pathname: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Result<Blob, BlobError>;

    async fn list(&self) -> Result<Vec<Blob>, BlobError>;

    async fn delete(&self, url: &str) -> Result<(), BlobError>;

    /// Whether `url` points into this store.
    fn owns_url(&self, url: &str) -> bool;
}

/// Build the configured backend. `Ok(None)` when storage is not set up.
pub fn from_config(cfg: &BlobConfig, client: reqwest::Client) -> Result<Option<Arc<dyn BlobStore>>> {
    match cfg.backend.as_deref() {
        None => Ok(None),
        Some("local") => {
            let dir = cfg.local_dir.clone().unwrap_or_else(|| "data/blobs".to_string());
            let base = cfg
                .public_base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:8000/blobs".to_string());
            Ok(Some(Arc::new(LocalBlobStore::new(dir, base))))
        }
        Some("hosted") => {
            let token_env = cfg.token_env.as_deref().unwrap_or("BLOB_READ_WRITE_TOKEN");
            let token = match std::env::var(token_env) {
                Ok(t) if !t.is_empty() => t,
                _ => {
                    warn!(%token_env, "blob: hosted backend selected but token is not set");
                    return Ok(None);
                }
            };
            let api_url = cfg
                .api_url
                .clone()
                .unwrap_or_else(|| "https://blob.vercel-storage.com".to_string());
            let host = cfg
                .url_host
                .clone()
                .unwrap_or_else(|| DEFAULT_HOSTED_URL_HOST.to_string());
            Ok(Some(Arc::new(HostedBlobStore::new(client, api_url, token, host))))
        }
        Some(other) => anyhow::bail!("unknown blob backend: {}", other),
    }
}

/// Reject absolute paths and parent traversal; returns the cleaned relative path.
fn clean_pathname(pathname: &str) -> Result<String, BlobError> {
    let trimmed = pathname.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(BlobError::InvalidPath(pathname.to_string()));
    }
    for c in Path::new(trimmed).components() {
        if !matches!(c, Component::Normal(_)) {
            return Err(BlobError::InvalidPath(pathname.to_string()));
        }
    }
    Ok(trimmed.to_string())
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// `dir/name.png` -> `dir/name-Ab12Cd34.png`
fn with_suffix(pathname: &str, suffix: &str) -> String {
    let (dir, file) = match pathname.rsplit_once('/') {
        Some((d, f)) => (Some(d), f),
        None => (None, pathname),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", file, suffix),
    };
    match dir {
        Some(d) => format!("{}/{}", d, file),
        None => file,
    }
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, pathname: &str) -> String {
        format!("{}/{}", self.public_base_url, pathname)
    }

    async fn blob_for(&self, pathname: String, path: &Path) -> Result<Blob, BlobError> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let uploaded_at = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());
        Ok(Blob {
            url: self.url_for(&pathname),
            content_type: None,
            size: Some(meta.len()),
            uploaded_at,
            pathname,
        })
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, pathname: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Result<Blob, BlobError> {
        let mut name = clean_pathname(pathname)?;
        if tokio::fs::try_exists(self.root.join(&name)).await.unwrap_or(false) {
            name = with_suffix(&name, &random_suffix());
        }
        let path = self.root.join(&name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(pathname = %name, bytes = bytes.len(), "blob: stored locally");

        let mut blob = self.blob_for(name, &path).await?;
        blob.content_type = content_type.map(str::to_string);
        Ok(blob)
    }

    async fn list(&self) -> Result<Vec<Blob>, BlobError> {
        let mut out = Vec::new();
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(out);
        }
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await.context("failed to read directory entry")? {
                let path = entry.path();
                let file_type = entry.file_type().await.context("failed to read file type")?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let rel = path
                        .strip_prefix(&self.root)
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .unwrap_or_default();
                    out.push(self.blob_for(rel, &path).await?);
                }
            }
        }
        out.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then_with(|| a.pathname.cmp(&b.pathname)));
        Ok(out)
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let rel = url
            .strip_prefix(&self.public_base_url)
            .map(|r| r.trim_start_matches('/'))
            .ok_or(BlobError::NotOwned)?;
        let rel = clean_pathname(rel)?;
        let path = self.root.join(&rel);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete {}", path.display()))?;
        info!(pathname = %rel, "blob: deleted locally");
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        url.starts_with(&format!("{}/", self.public_base_url))
    }
}

/// Client for a hosted blob API (`PUT /{pathname}`, `GET /?limit=`, `POST /delete`).
pub struct HostedBlobStore {
    client: reqwest::Client,
    api_url: String,
    token: String,
    url_host: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ListResponse {
    blobs: Vec<Blob>,
}

impl HostedBlobStore {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>, token: impl Into<String>, url_host: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            url_host: url_host.into(),
            timeout: Duration::from_secs(30),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("x-api-version", "7")
            .timeout(self.timeout)
    }
}

async fn ensure_ok(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("blob {} failed with status {}: {}", what, status, body);
    }
    Ok(response)
}

#[async_trait::async_trait]
impl BlobStore for HostedBlobStore {
    async fn put(&self, pathname: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Result<Blob, BlobError> {
        let name = clean_pathname(pathname)?;
        let mut req = self
            .request(reqwest::Method::PUT, &format!("{}/{}", self.api_url, name))
            .header("x-add-random-suffix", "1")
            .body(bytes);
        if let Some(ct) = content_type {
            req = req.header("x-content-type", ct);
        }
        let response = req.send().await.context("blob upload request failed")?;
        let blob: Blob = ensure_ok(response, "upload")
            .await?
            .json()
            .await
            .context("failed to parse blob upload response")?;
        info!(url = %blob.url, "blob: uploaded");
        Ok(blob)
    }

    async fn list(&self) -> Result<Vec<Blob>, BlobError> {
        let response = self
            .request(reqwest::Method::GET, &format!("{}?limit=1000", self.api_url))
            .send()
            .await
            .context("blob list request failed")?;
        let list: ListResponse = ensure_ok(response, "list")
            .await?
            .json()
            .await
            .context("failed to parse blob list response")?;
        Ok(list.blobs)
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        if !self.owns_url(url) {
            return Err(BlobError::NotOwned);
        }
        let response = self
            .request(reqwest::Method::POST, &format!("{}/delete", self.api_url))
            .json(&serde_json::json!({ "urls": [url] }))
            .send()
            .await
            .context("blob delete request failed")?;
        ensure_ok(response, "delete").await?;
        info!(%url, "blob: deleted");
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        url.contains(&self.url_host)
    }
}
