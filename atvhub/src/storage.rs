//! Key-value store with Redis-like semantics on top of SQLite.
//!
//! Three keyspaces share one namespace: plain strings (with optional expiry),
//! sorted sets and lists. Writes go through [`KvBatch`] so that a group of
//! operations commits in one transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum KvOp {
    Set { key: String, value: String, ttl_seconds: Option<u64> },
    Del { key: String },
    Incr { key: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
    ZIncrBy { key: String, member: String, delta: f64 },
    LPush { key: String, value: String },
    LTrim { key: String, start: i64, stop: i64 },
}

/// Ordered group of writes applied atomically by [`KvStore::exec`].
#[derive(Debug, Clone, Default)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(KvOp::Set { key: key.into(), value: value.into(), ttl_seconds: None });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl_seconds: u64) -> Self {
        self.ops.push(KvOp::Set { key: key.into(), value: value.into(), ttl_seconds: Some(ttl_seconds) });
        self
    }

    pub fn set_json<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        let json = serde_json::to_string(value).context("failed to serialize value")?;
        Ok(self.set(key, json))
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Del { key: key.into() });
        self
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Incr { key: key.into() });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(KvOp::ZAdd { key: key.into(), member: member.into(), score });
        self
    }

    pub fn zrem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(KvOp::ZRem { key: key.into(), member: member.into() });
        self
    }

    pub fn zincrby(mut self, key: impl Into<String>, member: impl Into<String>, delta: f64) -> Self {
        self.ops.push(KvOp::ZIncrBy { key: key.into(), member: member.into(), delta });
        self
    }

    pub fn lpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(KvOp::LPush { key: key.into(), value: value.into() });
        self
    }

    pub fn ltrim(mut self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.ops.push(KvOp::LTrim { key: key.into(), start, stop });
        self
    }
}

/// Handle to the store. Cheap to clone (the pool is reference counted).
#[derive(Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fresh in-memory store with its schema, for tests and one-off tools.
    pub async fn in_memory() -> Result<Self> {
        let pool = common::init_memory_pool().await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the keyspace tables. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        tracing::info!("storage: ensuring KV schema");
        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS kv_strings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS kv_zsets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (key, member)
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_kv_zsets_score ON kv_zsets (key, score);",
            r#"
            CREATE TABLE IF NOT EXISTS kv_lists (
                key TEXT NOT NULL,
                seq INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, seq)
            );
            "#,
        ];

        for s in &stmts {
            sqlx::query(s)
                .execute(&self.pool)
                .await
                .with_context(|| "failed to ensure KV schema")?;
        }
        Ok(())
    }

    /// Apply every operation of the batch inside one transaction.
    pub async fn exec(&self, batch: KvBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.context("failed to begin KV transaction")?;
        for op in &batch.ops {
            apply_op(&mut tx, op).await?;
        }
        tx.commit().await.context("failed to commit KV transaction")?;
        debug!(ops = batch.len(), "storage: batch committed");
        Ok(())
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.exec(KvBatch::new().set(key, value)).await
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.exec(KvBatch::new().set_json(key, value)?).await
    }

    pub async fn set_json_ex<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let json = serde_json::to_string(value).context("failed to serialize value")?;
        self.exec(KvBatch::new().set_ex(key, json, ttl_seconds)).await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        self.exec(KvBatch::new().del(key)).await
    }

    pub async fn incr(&self, key: &str) -> Result<()> {
        self.exec(KvBatch::new().incr(key)).await
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.exec(KvBatch::new().zadd(key, member, score)).await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.exec(KvBatch::new().zrem(key, member)).await
    }

    /// Raw string value, ignoring expired entries.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_strings WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read key {}", key))?;
        Ok(value)
    }

    /// JSON value. A stored value that does not decode is logged and treated as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    warn!(%key, "storage: stored value is not valid JSON for the requested type: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Integer counter, 0 when missing.
    pub async fn get_count(&self, key: &str) -> Result<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0))
    }

    /// Members by descending score (ties by descending member), Redis `ZRANGE .. REV` indices.
    pub async fn zrange_rev(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zrange_rev_with_scores(key, start, stop)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    pub async fn zrange_rev_with_scores(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>> {
        let (limit, offset) = limit_offset(start, stop);
        let rows = sqlx::query(
            "SELECT member, score FROM kv_zsets WHERE key = ? ORDER BY score DESC, member DESC LIMIT ? OFFSET ?",
        )
        .bind(key)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to range sorted set {}", key))?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("member"), r.get::<f64, _>("score")))
            .collect())
    }

    /// Members with `min <= score <= max`, ascending.
    pub async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let members = sqlx::query_scalar::<_, String>(
            "SELECT member FROM kv_zsets WHERE key = ? AND score >= ? AND score <= ? ORDER BY score ASC, member ASC",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to range sorted set {} by score", key))?;
        Ok(members)
    }

    #[cfg(test)]
    pub async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let score = sqlx::query_scalar::<_, f64>("SELECT score FROM kv_zsets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read score in {}", key))?;
        Ok(score)
    }

    /// List elements head first (index 0 is the most recent `lpush`).
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let (limit, offset) = limit_offset(start, stop);
        let values = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_lists WHERE key = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
        )
        .bind(key)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to range list {}", key))?;
        Ok(values)
    }

    pub async fn llen(&self, key: &str) -> Result<i64> {
        let len = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM kv_lists WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to count list {}", key))?;
        Ok(len)
    }
}

/// Translate Redis-style inclusive indices (negative stop = through the end) into LIMIT/OFFSET.
/// Negative start indices are not supported and clamp to 0.
fn limit_offset(start: i64, stop: i64) -> (i64, i64) {
    let offset = start.max(0);
    let limit = if stop < 0 { -1 } else { (stop - offset + 1).max(0) };
    (limit, offset)
}

async fn apply_op(conn: &mut SqliteConnection, op: &KvOp) -> Result<()> {
    match op {
        KvOp::Set { key, value, ttl_seconds } => {
            let expires_at = ttl_seconds.map(|ttl| Utc::now().timestamp_millis() + (ttl as i64) * 1000);
            sqlx::query(
                r#"
                INSERT INTO kv_strings (key, value, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to set {}", key))?;
        }
        KvOp::Del { key } => {
            for table in ["kv_strings", "kv_zsets", "kv_lists"] {
                sqlx::query(&format!("DELETE FROM {} WHERE key = ?", table))
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .with_context(|| format!("failed to delete {}", key))?;
            }
        }
        KvOp::Incr { key } => {
            let now = Utc::now().timestamp_millis();
            // An expired counter restarts from zero.
            sqlx::query(
                r#"
                INSERT INTO kv_strings (key, value, expires_at) VALUES (?, '1', NULL)
                ON CONFLICT(key) DO UPDATE SET
                    value = CASE
                        WHEN kv_strings.expires_at IS NOT NULL AND kv_strings.expires_at <= ? THEN '1'
                        ELSE CAST(CAST(kv_strings.value AS INTEGER) + 1 AS TEXT)
                    END
                "#,
            )
            .bind(key)
            .bind(now)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to increment {}", key))?;
        }
        KvOp::ZAdd { key, member, score } => {
            sqlx::query(
                r#"
                INSERT INTO kv_zsets (key, member, score) VALUES (?, ?, ?)
                ON CONFLICT(key, member) DO UPDATE SET score = excluded.score
                "#,
            )
            .bind(key)
            .bind(member)
            .bind(score)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to zadd into {}", key))?;
        }
        KvOp::ZRem { key, member } => {
            sqlx::query("DELETE FROM kv_zsets WHERE key = ? AND member = ?")
                .bind(key)
                .bind(member)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("failed to zrem from {}", key))?;
        }
        KvOp::ZIncrBy { key, member, delta } => {
            sqlx::query(
                r#"
                INSERT INTO kv_zsets (key, member, score) VALUES (?, ?, ?)
                ON CONFLICT(key, member) DO UPDATE SET score = kv_zsets.score + excluded.score
                "#,
            )
            .bind(key)
            .bind(member)
            .bind(delta)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to zincrby in {}", key))?;
        }
        KvOp::LPush { key, value } => {
            sqlx::query(
                r#"
                INSERT INTO kv_lists (key, seq, value)
                SELECT ?, COALESCE(MIN(seq), 0) - 1, ? FROM kv_lists WHERE key = ?
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(key)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to lpush into {}", key))?;
        }
        KvOp::LTrim { key, start, stop } => {
            let (limit, offset) = limit_offset(*start, *stop);
            sqlx::query(
                r#"
                DELETE FROM kv_lists WHERE key = ? AND seq NOT IN (
                    SELECT seq FROM kv_lists WHERE key = ? ORDER BY seq ASC LIMIT ? OFFSET ?
                )
                "#,
            )
            .bind(key)
            .bind(key)
            .bind(limit)
            .bind(offset)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to ltrim {}", key))?;
        }
    }
    Ok(())
}
