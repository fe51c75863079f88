//! Sales lead API under `/api/sales`, all behind [`SalesUser`].

use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, FromForm, State};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::auth::SalesUser;
use super::response::{internal, ApiError, ApiResult};
use super::AppState;
use crate::content::MASKED;
use crate::discovery::discover_feed;
use crate::leads::config::{seed_feeds, seed_keywords, SalesSettings};
use crate::leads::crm::{CrmError, StatePatch, DEFAULT_LIST_LIMIT};
use crate::leads::scan::{CronOutcome, ScanError, DEFAULT_SCAN_LIMIT, DEFAULT_SCAN_MIN_SCORE, MAX_SCAN_LIMIT};
use crate::leads::LeadStatus;

fn scan_error(e: ScanError, error: &'static str) -> ApiError {
    match e {
        ScanError::NoProvider => ApiError::internal(e.to_string()),
        ScanError::Failed(e) => {
            tracing::error!("{}: {:#}", error, e);
            ApiError::internal(error).with_message(e.to_string())
        }
    }
}

/// Non-empty list of string ids under `leadIds`.
fn lead_ids(body: &Value) -> Result<Vec<String>, ApiError> {
    let ids: Vec<String> = body
        .get("leadIds")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(ApiError::bad_request("Lead IDs are required"));
    }
    Ok(ids)
}

fn parse_i64(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}

#[get("/api/sales/config")]
pub async fn get_config(_sales: SalesUser, state: &State<AppState>) -> ApiResult {
    let settings = SalesSettings::load_or_default(state.content.kv())
        .await
        .map_err(internal("Failed to fetch config"))?;
    Ok(Json(settings.masked()))
}

#[post("/api/sales/config", data = "<body>")]
pub async fn save_config(_sales: SalesUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let update = body.as_object().ok_or_else(|| ApiError::bad_request("Invalid request"))?;
    let kv = state.content.kv();
    let mut settings = SalesSettings::load_or_default(kv)
        .await
        .map_err(internal("Failed to save config"))?;
    settings
        .apply_update(update)
        .map_err(|e| ApiError::bad_request("Invalid config").with_message(e.to_string()))?;
    settings.save(kv).await.map_err(internal("Failed to save config"))?;
    info!(keywords = settings.keywords.len(), "sales: config saved");

    Ok(Json(json!({
        "success": true,
        "naverClientId": settings.naver_client_id,
        "naverClientSecret": MASKED,
        "keywords": settings.keywords,
    })))
}

#[post("/api/sales/config/test-feed", data = "<body>")]
pub async fn test_feed(_sales: SalesUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let url = body
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("URL is required"))?;

    match discover_feed(&state.http, url).await {
        Ok(found) => Ok(Json(json!({
            "success": true,
            "feedUrl": found.feed_url,
            "title": found.title.unwrap_or_else(|| "(untitled)".to_string()),
        }))),
        Err(e) => {
            warn!(%url, "sales: feed test failed: {}", e);
            Ok(Json(json!({ "success": false, "error": e.to_string() })))
        }
    }
}

#[get("/api/sales/seed")]
pub async fn seed_preview(_sales: SalesUser) -> ApiResult {
    Ok(Json(json!({ "keywords": seed_keywords(), "rssFeeds": seed_feeds() })))
}

#[post("/api/sales/seed")]
pub async fn seed_apply(_sales: SalesUser, state: &State<AppState>) -> ApiResult {
    let kv = state.content.kv();
    let mut settings = SalesSettings::load_or_default(kv)
        .await
        .map_err(internal("Failed to seed config"))?;
    settings.apply_seed();
    settings.save(kv).await.map_err(internal("Failed to seed config"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Config seeded successfully",
        "keywords_count": settings.keywords.len(),
        "feeds_count": settings.feeds().len(),
    })))
}

#[get("/api/sales/maintenance/add-feeds")]
pub async fn add_feeds(_sales: SalesUser, state: &State<AppState>) -> ApiResult {
    let kv = state.content.kv();
    let result = async {
        let mut settings = SalesSettings::load_or_default(kv).await?;
        let added = settings.add_missing_feeds();
        if !added.is_empty() {
            settings.save(kv).await?;
        }
        Ok::<_, anyhow::Error>(added)
    }
    .await;

    match result {
        Ok(added) if added.is_empty() => Ok(Json(json!({
            "success": true,
            "message": "No new feeds were added. They might already exist.",
            "added": added,
        }))),
        Ok(added) => Ok(Json(json!({
            "success": true,
            "message": format!("{} new feeds added.", added.len()),
            "added": added,
        }))),
        Err(e) => Err(internal("Failed to add feeds")(e)),
    }
}

#[derive(Debug, FromForm)]
pub struct ScanQuery<'r> {
    limit: Option<&'r str>,
    #[field(name = "minScore")]
    min_score: Option<&'r str>,
}

#[post("/api/sales/scan?<query..>")]
pub async fn scan(_sales: SalesUser, state: &State<AppState>, query: ScanQuery<'_>) -> ApiResult {
    let limit = parse_i64(query.limit)
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_SCAN_LIMIT)
        .min(MAX_SCAN_LIMIT);
    let min_score = parse_i64(query.min_score).unwrap_or(DEFAULT_SCAN_MIN_SCORE);

    let report = state
        .scanner
        .scan(limit, min_score)
        .await
        .map_err(|e| scan_error(e, "Scan failed"))?;

    let mut body = json!({
        "success": true,
        "cached": report.cached,
        "leads": report.leads,
        "limit": limit,
        "minScore": min_score,
    });
    if let Some(stats) = report.stats {
        body["stats"] = json!(stats);
    }
    Ok(Json(body))
}

#[derive(Debug, FromForm)]
pub struct CronQuery<'r> {
    #[field(name = "minScore")]
    min_score: Option<&'r str>,
}

#[get("/api/sales/scan/cron?<query..>")]
pub async fn cron(_sales: SalesUser, state: &State<AppState>, query: CronQuery<'_>) -> ApiResult {
    let outcome = state
        .scanner
        .cron_step(parse_i64(query.min_score))
        .await
        .map_err(|e| scan_error(e, "Cron scan failed"))?;

    match outcome {
        CronOutcome::NoSources => Ok(Json(json!({
            "success": true,
            "message": "No feeds configured",
            "leads": 0,
        }))),
        CronOutcome::Step(step) => {
            let mut body = json!(step);
            body["success"] = Value::Bool(true);
            Ok(Json(body))
        }
    }
}

#[get("/api/sales/scan/queue")]
pub async fn queue(_sales: SalesUser, state: &State<AppState>) -> ApiResult {
    let len = state
        .scanner
        .queue_length()
        .await
        .map_err(internal("Failed to read queue"))?;
    Ok(Json(json!({ "queueLength": len })))
}

#[derive(Debug, FromForm)]
pub struct LeadsQuery<'r> {
    status: Option<&'r str>,
    limit: Option<&'r str>,
}

#[get("/api/sales/leads?<query..>")]
pub async fn list_leads(_sales: SalesUser, state: &State<AppState>, query: LeadsQuery<'_>) -> ApiResult {
    let status_raw = query.status.filter(|s| !s.is_empty()).unwrap_or("ALL");
    let status = match status_raw {
        "ALL" => None,
        other => Some(
            other
                .parse::<LeadStatus>()
                .map_err(|_| ApiError::bad_request("Invalid status parameter"))?,
        ),
    };
    let limit = parse_i64(query.limit).unwrap_or(DEFAULT_LIST_LIMIT);

    let leads = state
        .leads
        .list(status, limit)
        .await
        .map_err(internal("Failed to fetch leads"))?;
    Ok(Json(json!({
        "success": true,
        "total": leads.len(),
        "leads": leads,
        "status": status_raw,
        "limit": limit,
    })))
}

#[delete("/api/sales/leads/<id>")]
pub async fn delete_lead(_sales: SalesUser, state: &State<AppState>, id: &str) -> ApiResult {
    state.leads.delete(id).await.map_err(internal("Failed to delete lead"))?;
    info!(lead_id = %id, "sales: lead deleted");
    Ok(Json(json!({ "success": true, "leadId": id })))
}

#[get("/api/sales/leads/<id>/notes")]
pub async fn list_notes(_sales: SalesUser, state: &State<AppState>, id: &str) -> ApiResult {
    let notes = state.leads.notes(id).await.map_err(internal("Failed to fetch notes"))?;
    Ok(Json(json!({ "success": true, "total": notes.len(), "notes": notes })))
}

#[post("/api/sales/leads/<id>/notes", data = "<body>")]
pub async fn add_note(_sales: SalesUser, state: &State<AppState>, id: &str, body: Json<Value>) -> ApiResult {
    let content = body
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Note content is required"))?;
    let author = body
        .get("author")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let note = state
        .leads
        .add_note(id, content, author)
        .await
        .map_err(internal("Failed to add note"))?;
    Ok(Json(json!({ "success": true, "note": note })))
}

#[patch("/api/sales/leads/<id>/state", data = "<patch>")]
pub async fn patch_state(_sales: SalesUser, state: &State<AppState>, id: &str, patch: Json<StatePatch>) -> ApiResult {
    match state.leads.patch_state(id, patch.into_inner()).await {
        Ok(lead_state) => Ok(Json(json!({ "success": true, "state": lead_state }))),
        Err(CrmError::NotFound) => Err(ApiError::not_found(CrmError::NotFound.to_string())),
        Err(CrmError::InvalidStatus) => Err(ApiError::bad_request(CrmError::InvalidStatus.to_string())),
        Err(CrmError::Store(e)) => Err(internal("Failed to update state")(e)),
    }
}

#[post("/api/sales/leads/bulk-delete", data = "<body>")]
pub async fn bulk_delete(_sales: SalesUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let ids = lead_ids(&body)?;
    let deleted = state
        .leads
        .bulk_delete(&ids)
        .await
        .map_err(internal("Failed to delete leads"))?;
    Ok(Json(json!({ "success": true, "deletedCount": deleted })))
}

#[post("/api/sales/leads/bulk-state", data = "<body>")]
pub async fn bulk_state(_sales: SalesUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let ids = lead_ids(&body)?;
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<LeadStatus>().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid status"))?;
    let updated = state
        .leads
        .bulk_state(&ids, status)
        .await
        .map_err(internal("Failed to update lead states"))?;
    Ok(Json(json!({ "success": true, "updatedCount": updated })))
}
