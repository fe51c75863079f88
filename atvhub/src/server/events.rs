use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use super::response::{internal, ApiError, ApiResult};
use super::AppState;
use crate::consultation::{self as consultation_store, ConsultationError};
use crate::content::LandingPage;
use crate::stats::{self, SearchQuery};

/// Public landing page: home layout with its enabled sections and the current etag.
#[get("/api/content/landing")]
pub async fn landing(state: &State<AppState>) -> ApiResult<LandingPage> {
    let page = state.content.landing().await.map_err(internal("Failed to load content"))?;
    Ok(Json(page))
}

#[post("/api/events/cta", data = "<body>")]
pub async fn cta(state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let cta_id = body.get("ctaId").and_then(Value::as_str).unwrap_or_default();
    if cta_id.is_empty() || !stats::is_valid_cta_id(cta_id) {
        return Err(ApiError::bad_request("Invalid CTA ID"));
    }
    stats::track_cta_click(state.content.kv(), cta_id)
        .await
        .map_err(internal("Internal Error"))?;
    Ok(Json(json!({ "success": true })))
}

#[post("/api/events/search", data = "<body>")]
pub async fn search(state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let q = match body.get("q").and_then(Value::as_str) {
        Some(q) if !q.is_empty() => q,
        _ => return Err(ApiError::bad_request("Invalid query")),
    };
    match stats::prepare_search_query(q) {
        SearchQuery::TooShort => Ok(Json(json!({ "msg": "Query too short, skipped" }))),
        SearchQuery::Track(term) => {
            stats::track_search(state.content.kv(), &term)
                .await
                .map_err(internal("Internal Error"))?;
            Ok(Json(json!({ "success": true })))
        }
    }
}

/// Store a consultation request and tell the sales channel on Slack.
#[post("/api/consultation/submit", data = "<body>")]
pub async fn consultation(state: &State<AppState>, body: Json<Value>) -> ApiResult {
    let entry = match consultation_store::submit(state.content.kv(), &body).await {
        Ok(entry) => entry,
        Err(ConsultationError::MissingFields) => {
            return Err(ApiError::bad_request("Missing required fields"));
        }
        Err(ConsultationError::Store(e)) => {
            error!("consultation submit failed: {:#}", e);
            return Err(ApiError::internal("Internal Server Error"));
        }
    };

    let system = state.content.get_system_config().await.unwrap_or_else(|e| {
        warn!("consultation: system config unavailable: {:#}", e);
        Map::new()
    });
    let targets = state.notifier.targets(&system);
    state.notifier.send_consultation(&entry, &targets).await;

    Ok(Json(json!({ "success": true, "message": "Consultation requested successfully" })))
}
