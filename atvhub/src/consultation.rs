//! Consultation requests submitted from the public landing page.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::storage::{KvBatch, KvStore};

/// Newest request first.
pub const CONSULTATIONS_KEY: &str = "consultations:list";

const REQUIRED_FIELDS: &[&str] = &["name", "phone", "email"];

/// Caller-supplied webhook targets are never honoured or stored.
const DROPPED_FIELDS: &[&str] = &["webhookUrl"];

#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("Missing required fields")]
    MissingFields,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn is_filled(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// The submitted fields plus `id`, `createdAt` and `status: "new"`.
pub fn new_entry(
    body: &Value,
    now: DateTime<Utc>,
) -> Result<Map<String, Value>, ConsultationError> {
    let fields = body.as_object().ok_or(ConsultationError::MissingFields)?;
    if !REQUIRED_FIELDS.iter().all(|f| is_filled(fields.get(*f))) {
        return Err(ConsultationError::MissingFields);
    }

    let mut entry: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| !DROPPED_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entry.insert("id".into(), Value::String(now.timestamp_millis().to_string()));
    entry.insert(
        "createdAt".into(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    entry.insert("status".into(), Value::String("new".into()));
    Ok(entry)
}

/// Validate and store a request. Returns the stored entry.
pub async fn submit(kv: &KvStore, body: &Value) -> Result<Map<String, Value>, ConsultationError> {
    let entry = new_entry(body, Utc::now())?;
    let raw = serde_json::to_string(&entry).context("failed to encode consultation")?;
    kv.exec(KvBatch::new().lpush(CONSULTATIONS_KEY, raw)).await?;
    info!(id = %entry["id"], "consultation: request stored");
    Ok(entry)
}
