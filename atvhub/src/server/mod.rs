//! HTTP surface: public content and event routes, the admin console API and
//! the sales lead API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::fairing::AdHoc;
use rocket::fs::{FileServer, Options};
use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, routes, Build, Rocket, State};
use serde::Serialize;

use common::Config;

use crate::blob::{self, BlobStore};
use crate::content::ContentStore;
use crate::ingestion;
use crate::leads::crm::LeadRepo;
use crate::leads::scan::LeadScanner;
use crate::llm::{self, analyzer::LeadAnalyzer, LlmProvider};
use crate::naver::NaverClient;
use crate::notify::Notifier;
use crate::storage::KvStore;

pub mod admin;
pub mod auth;
pub mod events;
pub mod response;
pub mod sales;

use auth::AuthChallenge;
use response::ApiError;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub content: ContentStore,
    pub leads: LeadRepo,
    pub scanner: LeadScanner,
    pub notifier: Notifier,
    pub blobs: Option<Arc<dyn BlobStore>>,
    pub ai_provider: Option<String>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Wire every service from configuration. Providers whose secrets are
    /// missing are left out and the routes depending on them answer 500.
    pub fn from_config(config: Arc<Config>, kv: KvStore) -> Result<Self> {
        let http = ingestion::build_client(&config.user_agent())?;
        let provider = llm::from_config(config.llm.as_ref(), http.clone())?;
        let blobs = blob::from_config(&config.blob, http.clone())?;
        Ok(Self::assemble(config, kv, http, provider, blobs))
    }

    pub fn assemble(
        config: Arc<Config>,
        kv: KvStore,
        http: reqwest::Client,
        provider: Option<Arc<dyn LlmProvider>>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        let mirror_dir = config.content.mirror_dir.as_ref().map(PathBuf::from);
        let content = ContentStore::new(kv.clone(), mirror_dir);
        let analyzer = provider.map(LeadAnalyzer::new);
        let ai_provider = analyzer.as_ref().map(|a| a.provider_name().to_string());
        let naver = NaverClient::new(http.clone(), config.naver.api_url.clone());
        let notifier = Notifier::new(http.clone(), &config.notifications);
        let scanner =
            LeadScanner::new(content.clone(), http.clone(), naver, analyzer, notifier.clone());

        Self {
            started_at: Utc::now(),
            config,
            content,
            leads: LeadRepo::new(kv),
            scanner,
            notifier,
            blobs,
            ai_provider,
            http,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.config
            .blob
            .max_upload_bytes
            .unwrap_or(blob::DEFAULT_MAX_UPLOAD_BYTES)
    }

    /// Directory served at `/blobs` when the local backend is selected.
    fn local_blob_dir(&self) -> Option<PathBuf> {
        match self.config.blob.backend.as_deref() {
            Some("local") if self.blobs.is_some() => Some(PathBuf::from(
                self.config
                    .blob
                    .local_dir
                    .clone()
                    .unwrap_or_else(|| "data/blobs".to_string()),
            )),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    ai_provider: Option<String>,
    blob_backend: Option<String>,
    cron_interval_minutes: Option<u64>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        ai_provider: state.ai_provider.clone(),
        blob_backend: state.blobs.as_ref().and(state.config.blob.backend.clone()),
        cron_interval_minutes: state.config.scheduler.cron_interval_minutes,
    })
}

#[catch(401)]
fn unauthorized(req: &Request<'_>) -> AuthChallenge {
    AuthChallenge::for_request(req)
}

#[catch(default)]
fn json_error(status: Status, _req: &Request<'_>) -> ApiError {
    let error = match status.code {
        400 => "Invalid request",
        404 => "Not found",
        413 => "Payload too large",
        422 => "Invalid JSON body",
        500 => "Internal Error",
        _ => status.reason().unwrap_or("Error"),
    };
    ApiError::new(status, error)
}

/// Build the Rocket instance with `figment` as its configuration source.
pub fn build_rocket_with(figment: rocket::figment::Figment, state: AppState) -> Rocket<Build> {
    let blob_dir = state.local_blob_dir();

    let mut rocket = rocket::custom(figment)
        .manage(state)
        .attach(AdHoc::on_response("Private API no-store", |req, res| {
            Box::pin(async move {
                let path = req.uri().path();
                if path.starts_with("/api/admin") || path.starts_with("/api/sales") {
                    res.set_raw_header("Cache-Control", "no-store");
                }
            })
        }))
        .register("/", catchers![unauthorized, json_error])
        .mount(
            "/",
            routes![
                health,
                status,
                events::landing,
                events::cta,
                events::search,
                events::consultation
            ],
        )
        .mount(
            "/",
            routes![
                admin::upload_blob,
                admin::delete_blob,
                admin::list_blobs,
                admin::get_config,
                admin::save_config,
                admin::get_content,
                admin::save_home,
                admin::save_section,
                admin::delete_section,
                admin::seed,
                admin::get_policy,
                admin::save_policy,
                admin::stats_overview,
            ],
        )
        .mount(
            "/",
            routes![
                sales::get_config,
                sales::save_config,
                sales::test_feed,
                sales::seed_preview,
                sales::seed_apply,
                sales::add_feeds,
                sales::scan,
                sales::cron,
                sales::queue,
                sales::list_leads,
                sales::delete_lead,
                sales::list_notes,
                sales::add_note,
                sales::patch_state,
                sales::bulk_delete,
                sales::bulk_state,
            ],
        );

    if let Some(dir) = blob_dir {
        rocket = rocket.mount("/blobs", FileServer::new(dir, Options::Missing | Options::NormalizeDirs));
    }
    rocket
}

/// Rocket with the default figment plus `[server]` bind and port.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &state.config.server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = state.config.server.port {
        fig = fig.merge(("port", port));
    }
    build_rocket_with(fig, state)
}

pub async fn launch_rocket(state: AppState) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;
    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
