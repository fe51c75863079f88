//! Admin console API under `/api/admin`, all behind [`AdminUser`].

use std::sync::Arc;

use chrono::Utc;
use rocket::data::{Data, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::{delete, get, post, FromForm, State};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::auth::AdminUser;
use super::response::{internal, ApiError, ApiResult};
use super::AppState;
use crate::blob::{Blob, BlobError, BlobStore};
use crate::content::{mask_settings, ContentError, SeedReport, POLICY_TYPES};
use crate::stats::{self, Dashboard};

fn blob_store(state: &AppState) -> Result<&Arc<dyn BlobStore>, ApiError> {
    state
        .blobs
        .as_ref()
        .ok_or_else(|| ApiError::internal(BlobError::NotConfigured.to_string()))
}

/// Map a content failure onto a status, with `fallback` as the 500 error.
fn content_error(e: ContentError, fallback: &'static str) -> ApiError {
    match e {
        ContentError::Validation(_) => ApiError::bad_request("Validation Error").with_message(e.to_string()),
        ContentError::UnknownType(_) | ContentError::InvalidPolicy | ContentError::InvalidId(_) => {
            ApiError::bad_request(e.to_string())
        }
        ContentError::InvalidHome => ApiError::bad_request("Invalid Home Config"),
        ContentError::Store(e) => {
            error!("{}: {:#}", fallback, e);
            ApiError::internal(fallback).with_message(e.to_string())
        }
    }
}

fn str_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[post("/api/admin/blob/upload?<filename>", data = "<data>")]
pub async fn upload_blob(
    _admin: AdminUser,
    state: &State<AppState>,
    filename: Option<String>,
    content_type: Option<&ContentType>,
    data: Data<'_>,
) -> ApiResult<Blob> {
    let store = blob_store(state)?;
    let filename = filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| format!("upload-{}.png", Utc::now().timestamp_millis()));

    let bytes = data
        .open(state.max_upload_bytes().bytes())
        .into_bytes()
        .await
        .map_err(internal("Upload failed"))?;
    if !bytes.is_complete() {
        return Err(ApiError::new(Status::PayloadTooLarge, "Payload too large"));
    }

    let mime = content_type.map(|c| c.to_string());
    let blob = match store.put(&filename, mime.as_deref(), bytes.into_inner()).await {
        Ok(blob) => blob,
        Err(BlobError::InvalidPath(p)) => {
            return Err(ApiError::bad_request("Upload failed").with_message(format!("Invalid blob pathname: {}", p)))
        }
        Err(e) => return Err(internal("Upload failed")(e)),
    };

    stats::track_image_upload(state.content.kv())
        .await
        .map_err(internal("Upload failed"))?;
    info!(url = %blob.url, "admin: blob uploaded");
    Ok(Json(blob))
}

#[delete("/api/admin/blob/delete", data = "<body>")]
pub async fn delete_blob(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let store = blob_store(state)?;
    let url = str_field(&body, "url").ok_or_else(|| ApiError::bad_request("URL is required"))?;
    if !store.owns_url(url) {
        return Err(ApiError::bad_request(BlobError::NotOwned.to_string()));
    }
    store.delete(url).await.map_err(internal("Delete failed"))?;
    info!(%url, "admin: blob deleted");
    Ok(Json(json!({ "success": true })))
}

#[get("/api/admin/blob/list")]
pub async fn list_blobs(_admin: AdminUser, state: &State<AppState>) -> ApiResult<Vec<Blob>> {
    let store = blob_store(state)?;
    let blobs = store.list().await.map_err(internal("Failed to list blobs"))?;
    Ok(Json(blobs))
}

#[get("/api/admin/config")]
pub async fn get_config(_admin: AdminUser, state: &State<AppState>) -> ApiResult<Map<String, Value>> {
    let config = state
        .content
        .get_system_config()
        .await
        .map_err(internal("Failed to fetch config"))?;
    Ok(Json(mask_settings(&config)))
}

#[post("/api/admin/config", data = "<body>")]
pub async fn save_config(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let incoming = body
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Invalid request"))?;
    state
        .content
        .save_system_config(incoming)
        .await
        .map_err(internal("Failed to save config"))?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, FromForm)]
pub struct ContentQuery {
    #[field(name = "type")]
    kind: Option<String>,
    id: Option<String>,
}

#[get("/api/admin/content?<query..>")]
pub async fn get_content(_admin: AdminUser, state: &State<AppState>, query: ContentQuery) -> ApiResult {
    match (query.kind.as_deref(), query.id.as_deref()) {
        (Some("home"), _) => state
            .content
            .get_home()
            .await
            .map_err(internal("Failed to fetch content"))?
            .map(Json)
            .ok_or_else(|| ApiError::not_found("File not found")),
        (Some("section"), Some(id)) if !id.is_empty() => {
            let section = state
                .content
                .get_section(id)
                .await
                .map_err(internal("Failed to fetch content"))?;
            Ok(Json(section.unwrap_or_else(|| json!({}))))
        }
        _ => Err(ApiError::bad_request("Invalid request")),
    }
}

#[post("/api/admin/home/save", data = "<body>")]
pub async fn save_home(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    if !body.get("sections").map(Value::is_array).unwrap_or(false) {
        return Err(ApiError::bad_request("Invalid Home Config"));
    }
    state
        .content
        .save_home(&body)
        .await
        .map_err(|e| content_error(e, "Save Failed"))?;
    Ok(Json(json!({ "success": true })))
}

#[post("/api/admin/section/save", data = "<body>")]
pub async fn save_section(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let (Some(id), Some(section_type), Some(data)) = (
        str_field(&body, "id"),
        str_field(&body, "type"),
        body.get("data").filter(|d| !d.is_null()),
    ) else {
        return Err(ApiError::bad_request("Missing Required Fields (id, type, data)"));
    };
    state
        .content
        .save_section(id, section_type, data)
        .await
        .map_err(|e| content_error(e, "Save Failed"))?;
    Ok(Json(json!({ "success": true })))
}

#[delete("/api/admin/section/delete", data = "<body>")]
pub async fn delete_section(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let id = str_field(&body, "id").ok_or_else(|| ApiError::bad_request("Section ID is required"))?;
    state
        .content
        .delete_section(id)
        .await
        .map_err(|e| content_error(e, "Delete failed"))?;
    state
        .content
        .unlink_from_home(id)
        .await
        .map_err(internal("Delete failed"))?;
    Ok(Json(json!({ "success": true })))
}

#[post("/api/admin/seed")]
pub async fn seed(_admin: AdminUser, state: &State<AppState>) -> ApiResult<SeedReport> {
    let report = state.content.seed().await.map_err(internal("Seed failed"))?;
    Ok(Json(report))
}

#[derive(Debug, FromForm)]
pub struct PolicyQuery {
    #[field(name = "type")]
    kind: Option<String>,
}

fn invalid_policy_type() -> ApiError {
    ApiError::bad_request(ContentError::InvalidPolicy.to_string())
}

#[get("/api/admin/policy?<query..>")]
pub async fn get_policy(_admin: AdminUser, state: &State<AppState>, query: PolicyQuery) -> ApiResult {
    let kind = query
        .kind
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::bad_request("Type required"))?;
    if !POLICY_TYPES.contains(&kind.as_str()) {
        return Err(invalid_policy_type());
    }
    let policy = state
        .content
        .get_policy(&kind)
        .await
        .map_err(|e| content_error(e, "Failed to load"))?;
    Ok(Json(policy))
}

#[post("/api/admin/policy", data = "<body>")]
pub async fn save_policy(_admin: AdminUser, state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let (Some(kind), Some(data)) = (str_field(&body, "type"), body.get("data").filter(|d| !d.is_null())) else {
        return Err(ApiError::bad_request("Invalid data"));
    };
    if !POLICY_TYPES.contains(&kind) {
        return Err(invalid_policy_type());
    }
    state
        .content
        .save_policy(kind, data)
        .await
        .map_err(|e| content_error(e, "Failed to save"))?;
    Ok(Json(json!({ "success": true })))
}

#[get("/api/admin/stats/overview")]
pub async fn stats_overview(_admin: AdminUser, state: &State<AppState>) -> ApiResult<Dashboard> {
    let dashboard = stats::dashboard(state.content.kv())
        .await
        .map_err(internal("Failed to fetch stats"))?;
    Ok(Json(dashboard))
}
